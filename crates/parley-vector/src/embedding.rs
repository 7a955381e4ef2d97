//! Embedding service trait and implementations.
//!
//! - `OpenAiEmbedding` calls any OpenAI-compatible `/embeddings` endpoint
//!   (OpenAI, Ollama, vLLM, ...). This is the production embedding backend.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing
//!   and offline runs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use parley_core::config::EmbeddingConfig;
use parley_core::error::ParleyError;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors that capture
/// semantic meaning. Used for both ingestion (indexing) and retrieval (query).
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, ParleyError>> + Send;

    /// Return the dimensionality of vectors produced by this service, if known
    /// before the first call.
    fn dimensions(&self) -> Option<usize>;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// Because `EmbeddingService::embed` returns `impl Future` it is not
/// object-safe. This trait uses a boxed future instead, allowing
/// `Arc<dyn DynEmbeddingService>` to be shared between the ingestion
/// pipeline and the retriever.
///
/// A blanket implementation is provided so that every `EmbeddingService`
/// automatically implements `DynEmbeddingService`.
pub trait DynEmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text (boxed future).
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, ParleyError>> + Send + 'a>>;

    /// Return the dimensionality of vectors produced by this service, if known.
    fn dimensions(&self) -> Option<usize>;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>, ParleyError>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> Option<usize> {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// OpenAiEmbedding - OpenAI-compatible HTTP embeddings API
// ---------------------------------------------------------------------------

/// Embedding service backed by an OpenAI-compatible `/embeddings` endpoint.
///
/// Failures are reported as [`ParleyError::Embedding`] and never retried here;
/// the pipeline aborts the exchange instead.
pub struct OpenAiEmbedding {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedding")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl OpenAiEmbedding {
    /// Create a client for the given endpoint.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ParleyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ParleyError::Embedding(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    /// Create a client from the `[embedding]` config section, reading the API
    /// key from the configured environment variable.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, ParleyError> {
        let api_key = std::env::var(&config.api_key_env).ok();
        Self::new(
            &config.base_url,
            &config.model,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }
}

impl EmbeddingService for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
        if text.is_empty() {
            return Err(ParleyError::Embedding("Cannot embed empty text".to_string()));
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
        };

        let mut builder = self
            .client
            .post(self.embeddings_url())
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(ref key) = self.api_key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| ParleyError::Embedding(format!("Embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ParleyError::Embedding(format!(
                "Embedding request failed: HTTP {} - {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ParleyError::Embedding(format!("Failed to parse response: {}", e)))?;

        let vector = parsed
            .data
            .into_iter()
            .min_by_key(|d| d.index)
            .map(|d| d.embedding)
            .ok_or_else(|| ParleyError::Embedding("No embedding returned".to_string()))?;

        if vector.is_empty() {
            return Err(ParleyError::Embedding("Empty embedding returned".to_string()));
        }

        debug!(model = %self.model, dimensions = vector.len(), "Embedded text");
        Ok(vector)
    }

    fn dimensions(&self) -> Option<usize> {
        match self.model.as_str() {
            "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
            "text-embedding-3-large" => Some(3072),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic unit vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs. Unrelated texts land on near-orthogonal
/// vectors, which is enough to exercise ranking without a real model.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedding {
    /// 384-dimensional mock (same width as all-MiniLM-L6-v2).
    pub fn new() -> Self {
        Self::with_dimensions(384)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
        if text.is_empty() {
            return Err(ParleyError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cosine_similarity;

    #[tokio::test]
    async fn test_mock_embedding_dimension() {
        let service = MockEmbedding::new();
        let vec = service.embed("hello world").await.unwrap();
        assert_eq!(vec.len(), 384);
        assert_eq!(EmbeddingService::dimensions(&service), Some(384));
    }

    #[tokio::test]
    async fn test_mock_embedding_custom_dimension() {
        let service = MockEmbedding::with_dimensions(16);
        let vec = service.embed("hello").await.unwrap();
        assert_eq!(vec.len(), 16);
    }

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let service = MockEmbedding::new();
        let v1 = service.embed("same text").await.unwrap();
        let v2 = service.embed("same text").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_empty_text() {
        let service = MockEmbedding::new();
        let result = service.embed("").await;
        assert!(matches!(result, Err(ParleyError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_mock_embedding_is_unit_length() {
        let service = MockEmbedding::new();
        let vec = service.embed("normalize me").await.unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_same_text_more_similar_than_unrelated_text() {
        let service = MockEmbedding::new();
        let a1 = service.embed("What are vectors useful for?").await.unwrap();
        let a2 = service.embed("What are vectors useful for?").await.unwrap();
        let b = service.embed("A group of parrots is a pandemonium.").await.unwrap();
        assert!(cosine_similarity(&a1, &a2) >= cosine_similarity(&a1, &b));
    }

    #[tokio::test]
    async fn test_dyn_dispatch_matches_static() {
        let service = MockEmbedding::with_dimensions(8);
        let dynamic: &dyn DynEmbeddingService = &service;
        let v1 = dynamic.embed_boxed("text").await.unwrap();
        let v2 = service.embed("text").await.unwrap();
        assert_eq!(v1, v2);
        assert_eq!(dynamic.dimensions(), Some(8));
    }

    #[test]
    fn test_openai_embedding_url_trims_trailing_slash() {
        let service = OpenAiEmbedding::new(
            "http://localhost:11434/v1/",
            "nomic-embed-text",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(service.embeddings_url(), "http://localhost:11434/v1/embeddings");
        assert_eq!(EmbeddingService::dimensions(&service), None);
    }

    #[test]
    fn test_openai_embedding_known_dimensions() {
        let service = OpenAiEmbedding::new(
            "https://api.openai.com/v1",
            "text-embedding-3-large",
            Some("key".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(EmbeddingService::dimensions(&service), Some(3072));
        assert!(format!("{:?}", service).contains("has_api_key: true"));
    }

    #[tokio::test]
    async fn test_openai_embedding_rejects_empty_text() {
        let service = OpenAiEmbedding::new(
            "http://127.0.0.1:9",
            "model",
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(matches!(
            service.embed("").await,
            Err(ParleyError::Embedding(_))
        ));
    }

    #[tokio::test]
    async fn test_openai_embedding_unreachable_host_is_embedding_error() {
        let service = OpenAiEmbedding::new(
            "http://127.0.0.1:9",
            "model",
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        let err = service.embed("hello").await.unwrap_err();
        assert!(matches!(err, ParleyError::Embedding(_)));
    }

    #[test]
    fn test_embedding_response_parsing() {
        let json = r#"{"data": [{"index": 0, "embedding": [0.1, 0.2, 0.3]}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data[0].embedding.len(), 3);
    }
}
