//! Embedding provider abstraction and implementations.
//!
//! The retrieval engine only needs one operation from a provider: turn the
//! query text into a vector comparable with the stored paper embeddings.
//! Providers are injected into the engine, so tests can swap in fakes.

#[cfg(feature = "local-embeddings")]
pub mod fastembed;
pub mod openai;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The provider could not be reached (network failure, timeout)
    #[error("Embedding service unavailable: {0}")]
    Unavailable(String),

    /// The provider answered with an error status
    #[error("API request failed: {0}")]
    ApiError(String),

    /// Invalid input text (e.g., empty, too long)
    #[error("Invalid input text: {0}")]
    InvalidInput(String),

    /// Configuration error (e.g., missing API key)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Other unexpected errors
    #[error("Unexpected error: {0}")]
    Other(String),
}

impl EmbeddingError {
    /// Whether this error means the provider itself cannot serve requests.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, EmbeddingError::Unavailable(_) | EmbeddingError::ApiError(_))
    }
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for text embedding providers.
///
/// The trait is async to support API-based embedding services. A provider
/// instance is shared read-only by every query running on an engine.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Errors
    /// Returns `EmbeddingError` if the embedding generation fails
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order.
    ///
    /// The default implementation embeds one text at a time; API-backed
    /// providers override it with a single batched request.
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Number of dimensions in the produced vectors.
    fn dimension(&self) -> usize;

    /// Model identifier (e.g. "text-embedding-3-small").
    fn model_name(&self) -> &str;
}

/// Normalizes text for consistent embedding generation.
///
/// Lowercases, trims, and collapses runs of whitespace to a single space.
///
/// # Example
/// ```
/// use paper_graphrag::embedding::normalize_text;
/// assert_eq!(normalize_text("  Agency   Theory "), "agency theory");
/// ```
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("Hello World"), "hello world");
        assert_eq!(normalize_text("  Multiple   Spaces  "), "multiple spaces");
        assert_eq!(normalize_text("Line\nBreaks\tand tabs"), "line breaks and tabs");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn test_unavailable_classification() {
        assert!(EmbeddingError::Unavailable("down".into()).is_unavailable());
        assert!(EmbeddingError::ApiError("503".into()).is_unavailable());
        assert!(!EmbeddingError::InvalidInput("empty".into()).is_unavailable());
        assert!(!EmbeddingError::ConfigError("no key".into()).is_unavailable());
    }

    struct Constant;

    #[async_trait]
    impl EmbeddingProvider for Constant {
        async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "constant"
        }
    }

    #[tokio::test]
    async fn test_default_embed_batch_preserves_order() {
        let embeddings = Constant.embed_batch(&["a", "abc"]).await.unwrap();
        assert_eq!(embeddings, vec![vec![1.0, 1.0], vec![3.0, 1.0]]);
    }
}
