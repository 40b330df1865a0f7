//! Embedders: text to fixed-size vectors for relevance scoring.
//!
//! The engine degrades gracefully without one (relevance contributes zero);
//! [`HashEmbedder`] gives deterministic offline vectors for tests and seeded
//! runs; [`OpenAiEmbedder`] uses the real Embeddings API.

use async_trait::async_trait;

use async_openai::{
    config::OpenAIConfig,
    types::embeddings::{CreateEmbeddingRequest, EmbeddingInput},
    Client,
};
use sha2::{Digest, Sha256};

use crate::memory::MemoryError;

/// Produces fixed-size float vectors from text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError>;

    /// Vector dimension returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;
}

/// Deterministic bag-of-words embedder: each token hashes to a pseudo-random
/// unit direction, the text embeds as the normalized token sum. Texts sharing
/// words land near each other, which is enough structure for retrieval tests
/// and seeded offline runs.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn token_vector(&self, token: &str) -> Vec<f32> {
        let mut vector = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;
        let mut bytes: Vec<u8> = Vec::new();
        while vector.len() < self.dimension {
            if bytes.is_empty() {
                let mut hasher = Sha256::new();
                hasher.update(token.as_bytes());
                hasher.update(counter.to_be_bytes());
                bytes = hasher.finalize().to_vec();
                counter += 1;
            }
            let b = bytes.remove(0);
            vector.push((b as f32 / 255.0) * 2.0 - 1.0);
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let mut sum = vec![0.0_f32; self.dimension];
            for token in text
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
            {
                for (slot, value) in sum.iter_mut().zip(self.token_vector(token)) {
                    *slot += value;
                }
            }
            let norm: f32 = sum.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for value in sum.iter_mut() {
                    *value /= norm;
                }
            }
            out.push(sum);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// OpenAI Embeddings client implementing [`Embedder`].
///
/// Default model `text-embedding-3-small` (1536 dimensions). Requires
/// `OPENAI_API_KEY` or an explicit config.
pub struct OpenAiEmbedder {
    config: OpenAIConfig,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        let dimensions = Self::model_dimensions(&model);
        Self {
            config: OpenAIConfig::new(),
            model,
            dimensions,
        }
    }

    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimensions = Self::model_dimensions(&model);
        Self {
            config,
            model,
            dimensions,
        }
    }

    fn model_dimensions(model: &str) -> usize {
        match model {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, MemoryError> {
        let inputs: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();
        let input = if inputs.len() == 1 {
            EmbeddingInput::String(inputs.into_iter().next().unwrap_or_default())
        } else {
            EmbeddingInput::StringArray(inputs)
        };

        let request = CreateEmbeddingRequest {
            input,
            model: self.model.clone(),
            ..Default::default()
        };

        let client = Client::with_config(self.config.clone());
        let response = client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;

        Ok(response.data.into_iter().map(|e| e.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: hash embeddings are deterministic and unit-length.
    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(32);
        let a = embedder.embed(&["the quick brown fox"]).await.unwrap();
        let b = embedder.embed(&["the quick brown fox"]).await.unwrap();
        assert_eq!(a, b);

        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    /// **Scenario**: overlapping texts are closer than disjoint ones.
    #[tokio::test]
    async fn hash_embedder_reflects_overlap() {
        let embedder = HashEmbedder::new(64);
        let vectors = embedder
            .embed(&[
                "alice sent money to bob",
                "alice sent money to charlie",
                "完全 unrelated 話題 entirely",
            ])
            .await
            .unwrap();

        let dot = |x: &[f32], y: &[f32]| -> f32 { x.iter().zip(y).map(|(a, b)| a * b).sum() };
        let near = dot(&vectors[0], &vectors[1]);
        let far = dot(&vectors[0], &vectors[2]);
        assert!(near > far, "near={} far={}", near, far);
    }

    /// **Scenario**: model names resolve their documented dimensions.
    #[test]
    fn openai_dimensions() {
        assert_eq!(OpenAiEmbedder::new("text-embedding-3-small").dimension(), 1536);
        assert_eq!(OpenAiEmbedder::new("text-embedding-3-large").dimension(), 3072);
    }
}
