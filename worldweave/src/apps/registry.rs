//! App registry: native registrations plus JSON definitions from a
//! persistence store. Native always wins on id collision; inactive JSON
//! definitions are skipped.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::apps::definition::AppDefinition;
use crate::apps::paypal::paypal_definition;
use crate::apps::runtime::AppInstance;
use crate::apps::AppError;

/// Storage for JSON app definitions.
pub trait DefinitionStore: Send + Sync {
    /// All stored definitions, as their raw JSON wire form.
    fn list(&self) -> Result<Vec<Value>, AppError>;

    /// Inserts or replaces a definition keyed by its `app_id`.
    fn save(&self, definition: &Value) -> Result<(), AppError>;
}

/// SQLite-backed definition store. Definitions are stored as JSON text keyed
/// by app id.
pub struct SqliteDefinitionStore {
    db_path: std::path::PathBuf,
}

impl SqliteDefinitionStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let db_path = path.as_ref().to_path_buf();
        let conn =
            rusqlite::Connection::open(&db_path).map_err(|e| AppError::Storage(e.to_string()))?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS app_definitions (
                app_id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT 0
            )
            "#,
            [],
        )
        .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(Self { db_path })
    }

    fn open(&self) -> Result<rusqlite::Connection, AppError> {
        rusqlite::Connection::open(&self.db_path).map_err(|e| AppError::Storage(e.to_string()))
    }
}

impl DefinitionStore for SqliteDefinitionStore {
    fn list(&self) -> Result<Vec<Value>, AppError> {
        let conn = self.open()?;
        let mut statement = conn
            .prepare("SELECT body FROM app_definitions ORDER BY app_id")
            .map_err(|e| AppError::Storage(e.to_string()))?;
        let rows = statement
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| AppError::Storage(e.to_string()))?;

        let mut definitions = Vec::new();
        for row in rows {
            let body = row.map_err(|e| AppError::Storage(e.to_string()))?;
            let value: Value =
                serde_json::from_str(&body).map_err(|e| AppError::Storage(e.to_string()))?;
            definitions.push(value);
        }
        Ok(definitions)
    }

    fn save(&self, definition: &Value) -> Result<(), AppError> {
        let app_id = definition
            .get("app_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::Validation("definition missing app_id".into()))?;
        let body =
            serde_json::to_string(definition).map_err(|e| AppError::Storage(e.to_string()))?;
        let conn = self.open()?;
        conn.execute(
            "INSERT OR REPLACE INTO app_definitions (app_id, body, updated_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![app_id, body, chrono::Utc::now().timestamp_millis()],
        )
        .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// Discovers apps for a simulation: in-process (native) registrations plus
/// JSON-defined apps.
#[derive(Default)]
pub struct AppRegistry {
    definitions: HashMap<String, AppDefinition>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in apps.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register_native(paypal_definition())
            .expect("builtin definition is valid");
        registry
    }

    /// Registers an in-process definition. Native registration replaces any
    /// previously loaded definition with the same id.
    pub fn register_native(&mut self, definition: AppDefinition) -> Result<(), AppError> {
        definition.validate().map_err(AppError::Validation)?;
        self.definitions
            .insert(definition.app_id.clone(), definition);
        Ok(())
    }

    /// Loads JSON definitions from the store. A stored definition never
    /// displaces a native one; inactive definitions are skipped.
    pub fn load_from_store(&mut self, store: &dyn DefinitionStore) -> Result<usize, AppError> {
        let mut loaded = 0;
        for raw in store.list()? {
            let definition = match AppDefinition::from_json(&raw) {
                Ok(definition) => definition,
                Err(error) => {
                    tracing::warn!(%error, "skipping unparseable app definition");
                    continue;
                }
            };
            if !definition.is_active {
                tracing::debug!(app = %definition.app_id, "skipping inactive app definition");
                continue;
            }
            if self.definitions.contains_key(&definition.app_id) {
                tracing::debug!(
                    app = %definition.app_id,
                    "native registration wins id collision"
                );
                continue;
            }
            definition.validate().map_err(AppError::Validation)?;
            self.definitions
                .insert(definition.app_id.clone(), definition);
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn get(&self, app_id: &str) -> Option<&AppDefinition> {
        self.definitions.get(app_id)
    }

    pub fn app_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.definitions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Builds a fresh (uninitialized) instance of a registered app.
    pub fn create_instance(&self, app_id: &str) -> Result<AppInstance, AppError> {
        let definition = self
            .get(app_id)
            .ok_or_else(|| AppError::UnknownApp(app_id.to_string()))?;
        AppInstance::new(definition.clone())
    }
}
