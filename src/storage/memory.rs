//! In-memory graph store.
//!
//! Holds the whole graph in ordered maps, which keeps every query
//! deterministic. Suitable for tests and for graphs exported to a JSON
//! snapshot file.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CoLinkRow, EntityMatchRow, GraphStore, StorageError, StorageResult};
use crate::models::{EmbeddingConfig, EntityKind, Paper, Relationship};

/// Serialized form of a whole graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_config: Option<EmbeddingConfig>,

    #[serde(default)]
    pub papers: Vec<Paper>,

    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryGraphStore {
    config: Option<EmbeddingConfig>,
    papers: BTreeMap<String, Paper>,
    edges: Vec<Relationship>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EmbeddingConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_paper(mut self, paper: Paper) -> Self {
        self.insert_paper(paper);
        self
    }

    pub fn with_edge(mut self, edge: Relationship) -> Self {
        self.insert_edge(edge);
        self
    }

    /// Insert or replace a paper.
    pub fn insert_paper(&mut self, paper: Paper) {
        self.papers.insert(paper.id.clone(), paper);
    }

    /// Add an edge. Exact duplicates are ignored.
    pub fn insert_edge(&mut self, edge: Relationship) {
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
    }

    pub fn paper_count(&self) -> usize {
        self.papers.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Build a store from a snapshot.
    ///
    /// Fails if an edge references a paper the snapshot does not contain.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> StorageResult<Self> {
        let mut store = Self {
            config: snapshot.embedding_config,
            ..Self::default()
        };
        for paper in snapshot.papers {
            store.insert_paper(paper);
        }
        for edge in snapshot.relationships {
            if !store.papers.contains_key(&edge.source) {
                return Err(StorageError::SchemaError(format!(
                    "edge '{}' starts at unknown paper '{}'",
                    edge.relationship_type, edge.source
                )));
            }
            store.insert_edge(edge);
        }
        Ok(store)
    }

    /// Read a JSON snapshot file.
    pub fn load_snapshot(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StorageError::ConnectionError(format!("{}: {e}", path.display())))?;
        let snapshot: GraphSnapshot = serde_json::from_str(&raw)
            .map_err(|e| StorageError::SerializationError(format!("{}: {e}", path.display())))?;
        Self::from_snapshot(snapshot)
    }

    pub fn to_snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            embedding_config: self.config.clone(),
            papers: self.papers.values().cloned().collect(),
            relationships: self.edges.clone(),
        }
    }

    fn summary(&self, id: &str) -> Option<Paper> {
        self.papers.get(id).map(Paper::without_embedding)
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn embedding_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        Ok(self.config.clone())
    }

    async fn papers_with_embeddings(&self) -> StorageResult<Vec<Paper>> {
        Ok(self
            .papers
            .values()
            .filter(|paper| paper.embedding.is_some())
            .cloned()
            .collect())
    }

    async fn co_linked_papers(&self, seed_ids: &[String]) -> StorageResult<Vec<CoLinkRow>> {
        let seeds: BTreeSet<&str> = seed_ids.iter().map(String::as_str).collect();
        let mut rows = Vec::new();

        for seed_edge in self.edges.iter().filter(|edge| seeds.contains(edge.source.as_str())) {
            let Some(entity) = seed_edge.entity() else {
                continue;
            };
            for candidate_edge in &self.edges {
                if seeds.contains(candidate_edge.source.as_str()) || candidate_edge.entity() != Some(entity) {
                    continue;
                }
                if let Some(paper) = self.summary(&candidate_edge.source) {
                    rows.push(CoLinkRow {
                        paper,
                        entity: entity.clone(),
                        seed_relationship: seed_edge.relationship_type.clone(),
                        candidate_relationship: candidate_edge.relationship_type.clone(),
                    });
                }
            }
        }
        Ok(rows)
    }

    async fn papers_by_entity_keyword(
        &self,
        kind: EntityKind,
        keyword: &str,
    ) -> StorageResult<Vec<EntityMatchRow>> {
        let needle = keyword.to_lowercase();
        let mut seen = BTreeSet::new();
        let mut rows = Vec::new();

        for edge in &self.edges {
            let Some(entity) = edge.entity() else {
                continue;
            };
            if entity.kind != kind || !entity.name.to_lowercase().contains(&needle) {
                continue;
            }
            if !seen.insert((edge.source.clone(), entity.name.clone())) {
                continue;
            }
            if let Some(paper) = self.summary(&edge.source) {
                rows.push(EntityMatchRow {
                    paper,
                    entity_name: entity.name.clone(),
                });
            }
        }
        Ok(rows)
    }
}
