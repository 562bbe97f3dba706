//! Retrieval configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```toml
//! top_k = 8
//! similarity_threshold = 0.5
//! entity_timeout_ms = 2000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of results per channel
pub const DEFAULT_TOP_K: usize = 5;

/// Default minimum cosine similarity for the vector channel
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Results kept per channel when a query does not say otherwise
    pub top_k: usize,

    /// Vector-channel cut-off when a query does not say otherwise
    pub similarity_threshold: f32,

    /// Upper bound on concurrent store lookups and scoring chunks
    pub max_concurrency: usize,

    pub vector_timeout_ms: u64,
    pub graph_timeout_ms: u64,
    pub entity_timeout_ms: u64,

    /// Query tokens shorter than this are not used as entity keywords
    pub min_keyword_len: usize,

    /// At most this many keywords are looked up per query
    pub max_keywords: usize,

    /// Corpus size from which vector scoring is split across worker threads
    pub parallel_scoring_min: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_concurrency: 4,
            vector_timeout_ms: 10_000,
            graph_timeout_ms: 10_000,
            entity_timeout_ms: 10_000,
            min_keyword_len: 3,
            max_keywords: 8,
            parallel_scoring_min: 4096,
        }
    }
}

impl RetrievalConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be at least 1".into()));
        }
        if !self.similarity_threshold.is_finite() || !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold must be within [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid("max_concurrency must be at least 1".into()));
        }
        if self.vector_timeout_ms == 0 || self.graph_timeout_ms == 0 || self.entity_timeout_ms == 0 {
            return Err(ConfigError::Invalid("channel timeouts must be positive".into()));
        }
        if self.min_keyword_len == 0 {
            return Err(ConfigError::Invalid("min_keyword_len must be at least 1".into()));
        }
        if self.max_keywords == 0 {
            return Err(ConfigError::Invalid("max_keywords must be at least 1".into()));
        }
        Ok(())
    }

    pub fn vector_timeout(&self) -> Duration {
        Duration::from_millis(self.vector_timeout_ms)
    }

    pub fn graph_timeout(&self) -> Duration {
        Duration::from_millis(self.graph_timeout_ms)
    }

    pub fn entity_timeout(&self) -> Duration {
        Duration::from_millis(self.entity_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RetrievalConfig::default();
        config.validate().unwrap();
        assert_eq!(config.top_k, 5);
        assert!((config.similarity_threshold - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RetrievalConfig::from_toml_str("top_k = 8\nentity_timeout_ms = 250\n").unwrap();
        assert_eq!(config.top_k, 8);
        assert_eq!(config.entity_timeout(), Duration::from_millis(250));
        assert_eq!(config.max_concurrency, 4);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            RetrievalConfig::from_toml_str("similarity_threshold = 1.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RetrievalConfig::from_toml_str("max_concurrency = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RetrievalConfig::from_toml_str("min_keyword_len = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RetrievalConfig::from_toml_str("top_k = \"five\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            RetrievalConfig::from_toml_str("unknown_key = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retrieval.toml");
        std::fs::write(&path, "similarity_threshold = 0.55\n").unwrap();
        let config = RetrievalConfig::load(&path).unwrap();
        assert!((config.similarity_threshold - 0.55).abs() < 1e-6);

        assert!(matches!(
            RetrievalConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
