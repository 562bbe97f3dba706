//! Fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::embedding::{normalize_text, EmbeddingError, EmbeddingProvider, EmbeddingResult};
use crate::models::{EmbeddingConfig, EntityKind, EntityRef, Paper, Relationship};
use crate::storage::memory::InMemoryGraphStore;
use crate::storage::{CoLinkRow, EntityMatchRow, GraphStore, StorageError, StorageResult};

/// Embeds known texts to fixed vectors and everything else to `fallback`.
#[derive(Clone)]
pub struct FakeEmbedding {
    known: HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
    unavailable: bool,
    pub calls: Arc<AtomicUsize>,
}

impl FakeEmbedding {
    pub fn fixed(vector: Vec<f32>) -> Self {
        Self {
            known: HashMap::new(),
            fallback: vector,
            unavailable: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_text(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.known.insert(normalize_text(text), vector);
        self
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::fixed(vec![1.0])
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedding {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(EmbeddingError::Unavailable("connection refused".to_string()));
        }
        Ok(self.known.get(text).cloned().unwrap_or_else(|| self.fallback.clone()))
    }

    fn dimension(&self) -> usize {
        self.fallback.len()
    }

    fn model_name(&self) -> &str {
        "fake-embedding"
    }
}

/// Wraps a store, adding per-query delays or a hard connection failure.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: InMemoryGraphStore,
    pub embeddings_delay: Option<Duration>,
    pub co_link_delay: Option<Duration>,
    pub keyword_delay: Option<Duration>,
    pub offline: bool,
    pub co_link_calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: InMemoryGraphStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn offline(inner: InMemoryGraphStore) -> Self {
        Self {
            offline: true,
            ..Self::new(inner)
        }
    }

    async fn gate(&self, delay: Option<Duration>) -> StorageResult<()> {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline {
            return Err(StorageError::ConnectionError("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStore for FaultyStore {
    async fn embedding_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        self.gate(None).await?;
        self.inner.embedding_config().await
    }

    async fn papers_with_embeddings(&self) -> StorageResult<Vec<Paper>> {
        self.gate(self.embeddings_delay).await?;
        self.inner.papers_with_embeddings().await
    }

    async fn co_linked_papers(&self, seed_ids: &[String]) -> StorageResult<Vec<CoLinkRow>> {
        self.co_link_calls.fetch_add(1, Ordering::SeqCst);
        self.gate(self.co_link_delay).await?;
        self.inner.co_linked_papers(seed_ids).await
    }

    async fn papers_by_entity_keyword(
        &self,
        kind: EntityKind,
        keyword: &str,
    ) -> StorageResult<Vec<EntityMatchRow>> {
        self.gate(self.keyword_delay).await?;
        self.inner.papers_by_entity_keyword(kind, keyword).await
    }
}

/// Query vector used by [`scenario_graph`].
pub fn query_vector() -> Vec<f32> {
    vec![1.0, 0.0, 0.0]
}

/// Three papers around the question "organizational ambidexterity":
///
/// - A: cosine 0.9 to [`query_vector`], uses two theories
/// - B: shares both theories with A, embedding orthogonal to the query
/// - C: no embedding, studies the "Organizational Ambidexterity" phenomenon
pub fn scenario_graph() -> InMemoryGraphStore {
    let a_embedding = vec![0.9, (1.0_f32 - 0.81).sqrt(), 0.0];
    InMemoryGraphStore::new()
        .with_config(EmbeddingConfig {
            model_name: "fake-embedding".into(),
            dimension: 3,
        })
        .with_paper(Paper::new("A", "Dynamic capabilities in SMEs").with_embedding(a_embedding))
        .with_paper(Paper::new("B", "Resources and routines").with_embedding(vec![0.0, 0.0, 1.0]))
        .with_paper(Paper::new("C", "Balancing exploration and exploitation"))
        .with_edge(Relationship::to_entity("A", EntityRef::theory("Dynamic Capabilities"), "uses_theory"))
        .with_edge(Relationship::to_entity("A", EntityRef::theory("Resource-Based View"), "uses_theory"))
        .with_edge(Relationship::to_entity("B", EntityRef::theory("Dynamic Capabilities"), "uses_theory"))
        .with_edge(Relationship::to_entity("B", EntityRef::theory("Resource-Based View"), "extends_theory"))
        .with_edge(Relationship::to_entity(
            "C",
            EntityRef::phenomenon("Organizational Ambidexterity"),
            "studies_phenomenon",
        ))
}
