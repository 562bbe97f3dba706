//! Local ONNX embedding provider backed by the fastembed library.
//!
//! Only compiled with the `local-embeddings` feature. Model names follow
//! fastembed's enum spelling (e.g. "AllMiniLML6V2"), which is also what gets
//! written into a graph's stored embedding config.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::Mutex;

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};

/// Models this provider knows the dimension of.
const SUPPORTED_MODELS: &[(EmbeddingModel, usize)] = &[
    (EmbeddingModel::AllMiniLML6V2, 384),
    (EmbeddingModel::BGESmallENV15, 384),
    (EmbeddingModel::BGEBaseENV15, 768),
    (EmbeddingModel::BGELargeENV15, 1024),
    (EmbeddingModel::NomicEmbedTextV15, 768),
    (EmbeddingModel::ParaphraseMLMiniLML12V2, 384),
];

#[derive(Clone)]
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    embedding_dimension: usize,
}

impl FastEmbedProvider {
    /// Load a model by its fastembed name, downloading it into `cache_dir`
    /// on first use.
    pub fn from_model_name(name: &str, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let (model, dimension) = SUPPORTED_MODELS
            .iter()
            .find(|(model, _)| format!("{model:?}").eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| EmbeddingError::ConfigError(format!("Unsupported local embedding model: {name}")))?;

        let mut options = InitOptions::new(model.clone());
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }
        let text_embedding = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::ConfigError(format!("Failed to initialize FastEmbed model: {e}")))?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_embedding)),
            model_name: format!("{model:?}"),
            embedding_dimension: dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Other("No embedding generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("All texts must be non-empty".to_string()));
        }

        let model = self.model.lock().await;
        let inputs: Vec<String> = texts.iter().map(|text| text.to_string()).collect();
        model
            .embed(inputs, None)
            .map_err(|e| EmbeddingError::Other(format!("Embedding generation failed: {e}")))
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("embedding_dimension", &self.embedding_dimension)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_model_is_config_error() {
        match FastEmbedProvider::from_model_name("text-embedding-3-small", None) {
            Err(EmbeddingError::ConfigError(msg)) => assert!(msg.contains("Unsupported")),
            other => panic!("Expected ConfigError, got {other:?}"),
        }
    }
}
