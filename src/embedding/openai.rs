//! OpenAI embedding provider implementation.
//!
//! Talks to the `/v1/embeddings` endpoint of OpenAI or any compatible
//! server (set `base_url` to point elsewhere).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenAI embedding provider.
#[derive(Debug, Clone)]
pub struct OpenAIEmbedding {
    client: reqwest::Client,

    /// API key sent as a bearer token
    api_key: String,

    /// Endpoint root, without the trailing `/embeddings`
    base_url: String,

    /// Model identifier (e.g., "text-embedding-3-small")
    model: String,

    /// Expected dimension of the embedding vectors
    embedding_dimension: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Known dimensions of the hosted embedding models.
pub fn model_dimension(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

impl OpenAIEmbedding {
    /// Create a new OpenAI embedding provider.
    ///
    /// `model` defaults to "text-embedding-3-small". Fails with
    /// [`EmbeddingError::ConfigError`] if the HTTP client cannot be built
    /// with its request timeout.
    pub fn new(api_key: String, model: Option<String>) -> EmbeddingResult<Self> {
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let embedding_dimension = model_dimension(&model);
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbeddingError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model,
            embedding_dimension,
        })
    }

    /// Point the provider at an OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build a provider from `OPENAI_API_KEY` and, if set, `OPENAI_BASE_URL`.
    pub fn from_env(model: Option<String>) -> EmbeddingResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            EmbeddingError::ConfigError("OPENAI_API_KEY environment variable is not set".to_string())
        })?;
        let provider = Self::new(api_key, model)?;
        Ok(match std::env::var("OPENAI_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => provider.with_base_url(url),
            _ => provider,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    async fn request(&self, input: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        debug!(model = %self.model, inputs = input.len(), "requesting embeddings");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                400 => EmbeddingError::InvalidInput(body),
                401 | 403 => EmbeddingError::ConfigError(format!("{status}: {body}")),
                _ => EmbeddingError::ApiError(format!("{status}: {body}")),
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Other(format!("Malformed embedding response: {e}")))?;

        let mut data = parsed.data;
        if data.len() != input.len() {
            return Err(EmbeddingError::Other(format!(
                "Expected {} embeddings, received {}",
                input.len(),
                data.len()
            )));
        }
        data.sort_by_key(|datum| datum.index);
        Ok(data.into_iter().map(|datum| datum.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Text cannot be empty".to_string()));
        }
        self.request(&[text])
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
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
