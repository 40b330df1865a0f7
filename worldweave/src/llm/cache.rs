//! Two-tier LLM response cache: bounded in-process TTL cache layered over an
//! optional durable store. A durable hit populates the in-process tier.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::LlmError;

/// Cached reply body, enough to rebuild a completion without a live call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CachedReply {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub model: String,
}

/// In-process TTL cache. At capacity the oldest tenth of entries is evicted.
/// Reads take the same lock as writes but hold it briefly.
pub struct InMemoryLlmCache {
    ttl: Duration,
    max_size: usize,
    entries: Mutex<HashMap<String, (Instant, CachedReply)>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryLlmCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size: max_size.max(1),
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<CachedReply> {
        let mut entries = self.entries.lock().expect("llm cache poisoned");
        match entries.get(key) {
            Some((inserted, reply)) => {
                if inserted.elapsed() > self.ttl {
                    entries.remove(key);
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                } else {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(reply.clone())
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: String, reply: CachedReply) {
        let mut entries = self.entries.lock().expect("llm cache poisoned");
        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            Self::evict_oldest(&mut entries);
        }
        entries.insert(key, (Instant::now(), reply));
    }

    fn evict_oldest(entries: &mut HashMap<String, (Instant, CachedReply)>) {
        if entries.is_empty() {
            return;
        }
        let mut keys: Vec<(String, Instant)> = entries
            .iter()
            .map(|(key, (inserted, _))| (key.clone(), *inserted))
            .collect();
        keys.sort_by_key(|(_, inserted)| *inserted);
        let remove = (keys.len() / 10).max(1);
        for (key, _) in keys.into_iter().take(remove) {
            entries.remove(&key);
        }
    }

    pub fn clear(&self) {
        self.entries.lock().expect("llm cache poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("llm cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}

/// Durable second tier. May suspend (this is one of the engine's sanctioned
/// suspension points).
#[async_trait]
pub trait DurableCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CachedReply>, LlmError>;
    async fn set(&self, key: &str, reply: &CachedReply, ttl: Duration) -> Result<(), LlmError>;
    async fn clear(&self) -> Result<(), LlmError>;
}

/// SQLite-backed durable tier.
pub struct SqliteLlmCache {
    db_path: std::path::PathBuf,
}

impl SqliteLlmCache {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, LlmError> {
        let db_path = path.as_ref().to_path_buf();
        let conn =
            rusqlite::Connection::open(&db_path).map_err(|e| LlmError::Cache(e.to_string()))?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS llm_cache (
                cache_key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| LlmError::Cache(e.to_string()))?;
        Ok(Self { db_path })
    }

    fn open(&self) -> Result<rusqlite::Connection, LlmError> {
        rusqlite::Connection::open(&self.db_path).map_err(|e| LlmError::Cache(e.to_string()))
    }
}

#[async_trait]
impl DurableCache for SqliteLlmCache {
    async fn get(&self, key: &str) -> Result<Option<CachedReply>, LlmError> {
        let conn = self.open()?;
        let now = chrono::Utc::now().timestamp_millis();
        let mut statement = conn
            .prepare("SELECT body FROM llm_cache WHERE cache_key = ?1 AND expires_at > ?2")
            .map_err(|e| LlmError::Cache(e.to_string()))?;
        let body: Option<String> = statement
            .query_row(rusqlite::params![key, now], |row| row.get(0))
            .map(Some)
            .or_else(|error| match error {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .map_err(|e| LlmError::Cache(e.to_string()))?;

        match body {
            Some(body) => {
                let reply =
                    serde_json::from_str(&body).map_err(|e| LlmError::Cache(e.to_string()))?;
                Ok(Some(reply))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, reply: &CachedReply, ttl: Duration) -> Result<(), LlmError> {
        let body = serde_json::to_string(reply).map_err(|e| LlmError::Cache(e.to_string()))?;
        let expires_at = chrono::Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO llm_cache (cache_key, body, expires_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![key, body, expires_at],
        )
        .map_err(|e| LlmError::Cache(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), LlmError> {
        let conn = self.open()?;
        conn.execute("DELETE FROM llm_cache", [])
            .map_err(|e| LlmError::Cache(e.to_string()))?;
        Ok(())
    }
}

/// The gateway-facing cache: in-process first, durable second.
pub struct TwoTierCache {
    memory: InMemoryLlmCache,
    durable: Option<std::sync::Arc<dyn DurableCache>>,
    ttl: Duration,
}

impl TwoTierCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            memory: InMemoryLlmCache::new(ttl, max_size),
            durable: None,
            ttl,
        }
    }

    pub fn with_durable(mut self, durable: std::sync::Arc<dyn DurableCache>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub async fn get(&self, key: &str) -> Option<CachedReply> {
        if let Some(reply) = self.memory.get(key) {
            return Some(reply);
        }
        if let Some(durable) = &self.durable {
            match durable.get(key).await {
                Ok(Some(reply)) => {
                    self.memory.set(key.to_string(), reply.clone());
                    return Some(reply);
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(%error, "durable llm cache read failed");
                }
            }
        }
        None
    }

    pub async fn set(&self, key: &str, reply: CachedReply) {
        self.memory.set(key.to_string(), reply.clone());
        if let Some(durable) = &self.durable {
            if let Err(error) = durable.set(key, &reply, self.ttl).await {
                tracing::warn!(%error, "durable llm cache write failed");
            }
        }
    }

    pub fn memory(&self) -> &InMemoryLlmCache {
        &self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(content: &str) -> CachedReply {
        CachedReply {
            content: content.into(),
            prompt_tokens: 10,
            completion_tokens: 5,
            model: "mock".into(),
        }
    }

    /// **Scenario**: set-then-get round-trips until the TTL expires.
    #[test]
    fn roundtrip_until_ttl() {
        let cache = InMemoryLlmCache::new(Duration::from_millis(40), 10);
        cache.set("k".into(), reply("v"));
        assert_eq!(cache.get("k").unwrap().content, "v");

        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get("k").is_none());
    }

    /// **Scenario**: at capacity, the oldest entries are evicted, newest kept.
    #[test]
    fn eviction_drops_oldest() {
        let cache = InMemoryLlmCache::new(Duration::from_secs(60), 3);
        cache.set("a".into(), reply("a"));
        std::thread::sleep(Duration::from_millis(5));
        cache.set("b".into(), reply("b"));
        std::thread::sleep(Duration::from_millis(5));
        cache.set("c".into(), reply("c"));
        cache.set("d".into(), reply("d"));

        assert!(cache.get("a").is_none());
        assert!(cache.get("d").is_some());
    }

    /// **Scenario**: a durable hit populates the in-process tier.
    #[tokio::test]
    async fn durable_hit_populates_memory() {
        let dir = tempfile::tempdir().unwrap();
        let durable = std::sync::Arc::new(
            SqliteLlmCache::new(dir.path().join("cache.db")).unwrap(),
        );
        durable
            .set("k", &reply("persisted"), Duration::from_secs(60))
            .await
            .unwrap();

        let cache = TwoTierCache::new(Duration::from_secs(60), 10).with_durable(durable);
        assert_eq!(cache.get("k").await.unwrap().content, "persisted");
        // Now present in the fast tier.
        assert_eq!(cache.memory().get("k").unwrap().content, "persisted");
    }

    /// **Scenario**: expired durable rows don't resolve.
    #[tokio::test]
    async fn durable_respects_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let durable = SqliteLlmCache::new(dir.path().join("cache.db")).unwrap();
        durable
            .set("k", &reply("v"), Duration::from_millis(0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(durable.get("k").await.unwrap().is_none());
    }
}
