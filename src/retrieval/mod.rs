//! GraphRAG retrieval: three channels fused into one explainable ranking.
//!
//! - [`vector`]: embedding similarity between the question and each paper
//! - [`graph`]: papers sharing entities with the vector channel's hits
//! - [`entity`]: papers linked to entities named in the question
//! - [`fusion`]: union, provenance merge and final ordering
//! - [`engine`]: the public entry point sequencing the above
//!
//! Empty channels are normal outcomes. Errors are reserved for "could not
//! search": an unreachable backend, an invalid query, or cancellation.

pub mod engine;
pub mod entity;
pub mod fusion;
pub mod graph;
pub mod similarity;
pub mod vector;

use std::fmt;

use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::storage::StorageError;

pub use engine::{GraphRagEngine, Retriever};
pub use entity::{extract_keywords, EntityMatcher};
pub use fusion::fuse;
pub use graph::GraphExpander;
pub use similarity::{cosine_similarity, SimilarityError};
pub use vector::VectorRetriever;

/// External collaborator a query depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    EmbeddingProvider,
    GraphStore,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::EmbeddingProvider => f.write_str("embedding provider"),
            Service::GraphStore => f.write_str("graph store"),
        }
    }
}

/// Errors that can occur during retrieval.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// A backend could not be reached; the query was abandoned
    #[error("{service} unavailable: {reason}")]
    ServiceUnavailable { service: Service, reason: String },

    /// Every channel exceeded its time budget
    #[error("All retrieval channels timed out")]
    AllChannelsTimedOut,

    /// Embedding failed for a reason other than availability
    #[error("Embedding error: {0}")]
    Embedding(EmbeddingError),

    /// Graph store query failed for a reason other than availability
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Invalid query parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The caller cancelled the query
    #[error("Query cancelled")]
    Cancelled,

    /// A worker task failed
    #[error("Internal retrieval error: {0}")]
    Internal(String),
}

impl RetrievalError {
    /// Whether the failure means "could not search" because of the backends,
    /// as opposed to a bad request or cancellation.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            RetrievalError::ServiceUnavailable { .. } | RetrievalError::AllChannelsTimedOut
        )
    }
}

impl From<EmbeddingError> for RetrievalError {
    fn from(err: EmbeddingError) -> Self {
        if err.is_unavailable() {
            RetrievalError::ServiceUnavailable {
                service: Service::EmbeddingProvider,
                reason: err.to_string(),
            }
        } else {
            RetrievalError::Embedding(err)
        }
    }
}

impl From<StorageError> for RetrievalError {
    fn from(err: StorageError) -> Self {
        if err.is_unavailable() {
            RetrievalError::ServiceUnavailable {
                service: Service::GraphStore,
                reason: err.to_string(),
            }
        } else {
            RetrievalError::Storage(err)
        }
    }
}

/// Result type for retrieval operations.
pub type RetrievalOutcome<T> = Result<T, RetrievalError>;

/// A question plus optional overrides of the engine's configured defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub question: String,

    /// Results kept per channel (engine default: 5)
    pub top_k: Option<usize>,

    /// Minimum cosine similarity for the vector channel (engine default: 0.4)
    pub similarity_threshold: Option<f32>,
}

impl RetrievalQuery {
    pub fn new(question: String, top_k: Option<usize>, similarity_threshold: Option<f32>) -> Self {
        Self {
            question,
            top_k,
            similarity_threshold,
        }
    }
}

impl From<&str> for RetrievalQuery {
    fn from(question: &str) -> Self {
        Self::new(question.to_string(), None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_errors_classified() {
        let err: RetrievalError = StorageError::ConnectionError("refused".into()).into();
        assert!(matches!(
            err,
            RetrievalError::ServiceUnavailable {
                service: Service::GraphStore,
                ..
            }
        ));
        assert!(err.is_unavailable());

        let err: RetrievalError = StorageError::QueryError("bad sql".into()).into();
        assert!(matches!(err, RetrievalError::Storage(_)));
        assert!(!err.is_unavailable());

        let err: RetrievalError = EmbeddingError::Unavailable("timeout".into()).into();
        assert!(err.to_string().starts_with("embedding provider unavailable"));

        let err: RetrievalError = EmbeddingError::InvalidInput("empty".into()).into();
        assert!(matches!(err, RetrievalError::Embedding(_)));
    }

    #[test]
    fn test_query_from_str_uses_defaults() {
        let query = RetrievalQuery::from("agency theory");
        assert_eq!(query.question, "agency theory");
        assert!(query.top_k.is_none());
        assert!(query.similarity_threshold.is_none());
        assert!(RetrievalError::AllChannelsTimedOut.is_unavailable());
        assert!(!RetrievalError::Cancelled.is_unavailable());
    }
}
