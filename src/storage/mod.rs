//! Graph store abstraction and implementations.
//!
//! The retrieval core issues read-only pattern queries against a store that
//! holds papers, named entities and the typed edges between them. Two
//! backends are provided: [`memory::InMemoryGraphStore`] (also loadable from
//! a JSON snapshot) and [`sqlite::SqliteGraphStore`].

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EmbeddingConfig, EntityKind, EntityRef, Paper};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store cannot be reached or opened
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution error
    #[error("Query execution failed: {0}")]
    QueryError(String),

    /// Data serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Schema or migration error
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Other unexpected errors
    #[error("Unexpected storage error: {0}")]
    Other(String),
}

impl StorageError {
    /// Whether this error means the store itself cannot serve requests.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::ConnectionError(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A paper reachable from a seed paper through one shared entity.
///
/// One row per (candidate, entity, seed edge type, candidate edge type);
/// the graph expander aggregates rows into connection strengths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoLinkRow {
    /// The candidate paper (embedding not populated)
    pub paper: Paper,

    /// The entity the candidate shares with a seed
    pub entity: EntityRef,

    /// Type of the seed's edge to the entity
    pub seed_relationship: String,

    /// Type of the candidate's edge to the entity
    pub candidate_relationship: String,
}

/// A paper linked to an entity whose name matched a keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatchRow {
    /// The linked paper (embedding not populated)
    pub paper: Paper,

    /// Canonical name of the matched entity
    pub entity_name: String,
}

/// Read-only query surface the retrieval engine needs from a graph store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// The embedding configuration the stored paper vectors were built with.
    async fn embedding_config(&self) -> StorageResult<Option<EmbeddingConfig>>;

    /// All papers that carry an embedding, with the embedding populated.
    async fn papers_with_embeddings(&self) -> StorageResult<Vec<Paper>>;

    /// Papers sharing at least one entity with any of `seed_ids`.
    ///
    /// Implementations should not return the seeds themselves, but callers
    /// filter them out again regardless.
    async fn co_linked_papers(&self, seed_ids: &[String]) -> StorageResult<Vec<CoLinkRow>>;

    /// Papers linked to entities of `kind` whose canonical name contains
    /// `keyword`, compared case-insensitively.
    ///
    /// At most one row per (paper, entity) pair.
    async fn papers_by_entity_keyword(
        &self,
        kind: EntityKind,
        keyword: &str,
    ) -> StorageResult<Vec<EntityMatchRow>>;
}

#[async_trait]
impl<T: GraphStore + ?Sized> GraphStore for std::sync::Arc<T> {
    async fn embedding_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        (**self).embedding_config().await
    }

    async fn papers_with_embeddings(&self) -> StorageResult<Vec<Paper>> {
        (**self).papers_with_embeddings().await
    }

    async fn co_linked_papers(&self, seed_ids: &[String]) -> StorageResult<Vec<CoLinkRow>> {
        (**self).co_linked_papers(seed_ids).await
    }

    async fn papers_by_entity_keyword(
        &self,
        kind: EntityKind,
        keyword: &str,
    ) -> StorageResult<Vec<EntityMatchRow>> {
        (**self).papers_by_entity_keyword(kind, keyword).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_errors_are_unavailable() {
        assert!(StorageError::ConnectionError("refused".into()).is_unavailable());
        assert!(!StorageError::QueryError("syntax".into()).is_unavailable());
        assert!(!StorageError::NotFound("p1".into()).is_unavailable());
    }
}
