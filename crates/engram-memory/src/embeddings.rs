//! Embedding provider contract and implementations
//!
//! The engine consumes an embedding function; it never implements the
//! model. The mock provider generates deterministic vectors for tests,
//! the OpenAI provider (behind the `openai` feature) calls the
//! embeddings API.

use async_trait::async_trait;
use engram_core::Error;
use engram_store::normalize;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{debug, info};

/// Errors raised by embedding providers
#[derive(Debug, ThisError)]
pub enum EmbeddingError {
    /// The backing model is unreachable
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),

    /// Input the provider cannot embed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Provider missing required configuration
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Response could not be decoded
    #[error("Response parsing error: {0}")]
    ParseError(String),
}

/// Result type for embedding operations
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

impl From<EmbeddingError> for Error {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::Unavailable(msg) => Error::EmbeddingUnavailable(msg),
            EmbeddingError::InvalidInput(msg) => Error::Validation(msg),
            EmbeddingError::NotConfigured(msg) => Error::Internal(msg),
            EmbeddingError::ParseError(msg) => Error::Serialization(msg),
        }
    }
}

/// Contract for mapping text to a fixed-dimension vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension of every vector this provider produces
    fn dimension(&self) -> usize;

    /// Embed a single text
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Embed a batch of texts, preserving order
    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Configuration for embedding providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name
    pub model: String,

    /// Vector dimension
    pub dimension: usize,

    /// API key for cloud providers
    pub api_key: Option<String>,

    /// Base URL for custom endpoints
    pub api_base_url: Option<String>,
}

impl EmbeddingConfig {
    /// Mock configuration for testing
    pub fn mock(dimension: usize) -> Self {
        Self {
            model: "mock-embedding".to_string(),
            dimension,
            api_key: None,
            api_base_url: None,
        }
    }

    /// OpenAI text-embedding-3-small configuration
    #[cfg(feature = "openai")]
    pub fn openai_small(api_key: &str) -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            api_key: Some(api_key.to_string()),
            api_base_url: Some("https://api.openai.com/v1".to_string()),
        }
    }
}

/// Deterministic mock provider for tests
///
/// The same text always embeds to the same unit vector, and texts sharing
/// word stems land near each other, which makes similarity-threshold and
/// dedup behavior testable without a real model.
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    /// Create a mock provider with the given dimension
    pub fn new(dimension: usize) -> Self {
        info!("Created mock embedding provider ({} dims)", dimension);
        Self { dimension }
    }

    fn text_to_vector(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        // Sum one pseudo-random unit contribution per word, so texts
        // sharing words produce nearby vectors.
        let mut vector = vec![0.0f32; self.dimension];
        for word in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let mut state = hasher.finish() | 1;
            for slot in vector.iter_mut() {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                *slot += ((state >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0) as f32;
            }
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".to_string()));
        }
        debug!("Mock embedding for {} chars", text.len());
        Ok(self.text_to_vector(text))
    }
}

/// OpenAI embeddings API provider
#[cfg(feature = "openai")]
pub struct OpenAIEmbeddingProvider {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

#[cfg(feature = "openai")]
impl OpenAIEmbeddingProvider {
    /// Create a provider from configuration
    pub fn new(config: EmbeddingConfig) -> EmbeddingResult<Self> {
        if config.api_key.is_none() {
            return Err(EmbeddingError::NotConfigured(
                "OpenAI API key required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        info!("Created OpenAI embedding provider ({})", config.model);
        Ok(Self { config, client })
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let texts = [text.to_string()];
        let mut batch = self.embed_batch(&texts).await?;
        batch
            .pop()
            .ok_or_else(|| EmbeddingError::ParseError("empty response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            input: &'a [String],
        }

        #[derive(Deserialize)]
        struct Response {
            data: Vec<Entry>,
        }

        #[derive(Deserialize)]
        struct Entry {
            embedding: Vec<f32>,
            index: usize,
        }

        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| EmbeddingError::NotConfigured("API key missing".to_string()))?;
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1");

        let response = self
            .client
            .post(format!("{base}/embeddings"))
            .bearer_auth(api_key)
            .json(&Request {
                model: &self.config.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Unavailable(format!("{status}: {body}")));
        }

        let parsed: Response = response
            .json()
            .await
            .map_err(|e| EmbeddingError::ParseError(e.to_string()))?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Create a provider from configuration
///
/// Without the `openai` feature every configuration resolves to the mock
/// provider.
pub fn create_embedder(config: EmbeddingConfig) -> EmbeddingResult<Arc<dyn EmbeddingProvider>> {
    #[cfg(feature = "openai")]
    if config.api_key.is_some() {
        return Ok(Arc::new(OpenAIEmbeddingProvider::new(config)?));
    }
    Ok(Arc::new(MockEmbeddingProvider::new(config.dimension)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_store::cosine_similarity;

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let provider = MockEmbeddingProvider::new(64);
        let a = provider.embed("machine learning basics").await.unwrap();
        let b = provider.embed("machine learning basics").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_mock_vectors_are_normalized() {
        let provider = MockEmbeddingProvider::new(64);
        let v = provider.embed("hello world").await.unwrap();
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_shared_words_embed_closer() {
        let provider = MockEmbeddingProvider::new(64);
        let base = provider.embed("rust memory engine").await.unwrap();
        let overlap = provider.embed("rust memory model").await.unwrap();
        let disjoint = provider.embed("pizza dinner tonight").await.unwrap();

        assert!(cosine_similarity(&base, &overlap) > cosine_similarity(&base, &disjoint));
    }

    #[tokio::test]
    async fn test_identical_text_has_unit_similarity() {
        let provider = MockEmbeddingProvider::new(64);
        let a = provider.embed("Machine Learning").await.unwrap();
        let b = provider.embed("machine learning").await.unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let provider = MockEmbeddingProvider::new(64);
        assert!(matches!(
            provider.embed("  ").await,
            Err(EmbeddingError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let provider = MockEmbeddingProvider::new(32);
        let texts = vec!["first".to_string(), "second".to_string()];
        let batch = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], provider.embed("first").await.unwrap());
        assert_eq!(batch[1], provider.embed("second").await.unwrap());
    }

    #[test]
    fn test_error_mapping() {
        let err: Error = EmbeddingError::Unavailable("down".to_string()).into();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));
        assert!(err.is_retryable());

        let err: Error = EmbeddingError::InvalidInput("bad".to_string()).into();
        assert!(matches!(err, Error::Validation(_)));
    }
}
