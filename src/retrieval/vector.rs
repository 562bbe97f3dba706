//! Vector channel: rank papers by cosine similarity to the question.
//!
//! This is a linear scan over every paper with a stored embedding. Large
//! corpora are scored in chunks on blocking worker threads; an approximate
//! nearest-neighbour index would replace the scan behind the same
//! [`VectorRetriever::retrieve`] contract.

use std::sync::Arc;

use tracing::{debug, warn};

use super::similarity::{cosine_similarity, is_degenerate};
use super::{RetrievalError, RetrievalOutcome};
use crate::embedding::{normalize_text, EmbeddingProvider};
use crate::models::{Paper, VectorHit};
use crate::storage::GraphStore;

pub struct VectorRetriever<'a, E: ?Sized, S: ?Sized> {
    embedder: &'a E,
    store: &'a S,
    max_concurrency: usize,
    parallel_scoring_min: usize,
}

impl<'a, E, S> VectorRetriever<'a, E, S>
where
    E: EmbeddingProvider + ?Sized,
    S: GraphStore + ?Sized,
{
    /// A retriever that scores on the calling task.
    pub fn new(embedder: &'a E, store: &'a S) -> Self {
        Self {
            embedder,
            store,
            max_concurrency: 1,
            parallel_scoring_min: usize::MAX,
        }
    }

    /// Split scoring across up to `max_concurrency` worker threads once the
    /// corpus holds at least `parallel_scoring_min` papers.
    pub fn with_parallelism(mut self, max_concurrency: usize, parallel_scoring_min: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self.parallel_scoring_min = parallel_scoring_min;
        self
    }

    /// Papers whose similarity to `query_text` is at least
    /// `similarity_threshold`, best first, at most `top_k`.
    ///
    /// Ties are broken by paper id ascending. No qualifying paper is an
    /// empty list, not an error.
    pub async fn retrieve(
        &self,
        query_text: &str,
        top_k: usize,
        similarity_threshold: f32,
    ) -> RetrievalOutcome<Vec<VectorHit>> {
        let normalized = normalize_text(query_text);
        if normalized.is_empty() {
            return Err(RetrievalError::InvalidQuery("question is empty".to_string()));
        }

        let query_embedding = self.embedder.embed(&normalized).await?;
        if is_degenerate(&query_embedding) {
            warn!("query embedding has zero norm; vector channel returns no papers");
            return Ok(Vec::new());
        }

        let papers = self.store.papers_with_embeddings().await?;
        let candidates = papers.len();
        if top_k == 0 || papers.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = if self.max_concurrency > 1 && candidates >= self.parallel_scoring_min {
            self.score_parallel(query_embedding, papers, similarity_threshold)
                .await?
        } else {
            score_papers(&query_embedding, papers, similarity_threshold)
        };

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.paper.id.cmp(&b.paper.id))
        });
        hits.truncate(top_k);

        debug!(candidates, kept = hits.len(), similarity_threshold, "vector channel scored");
        Ok(hits)
    }

    async fn score_parallel(
        &self,
        query_embedding: Vec<f32>,
        papers: Vec<Paper>,
        similarity_threshold: f32,
    ) -> RetrievalOutcome<Vec<VectorHit>> {
        let query = Arc::new(query_embedding);
        let chunk_size = papers.len().div_ceil(self.max_concurrency);

        let mut chunks = Vec::with_capacity(self.max_concurrency);
        let mut remaining = papers.into_iter().peekable();
        while remaining.peek().is_some() {
            chunks.push(remaining.by_ref().take(chunk_size).collect::<Vec<_>>());
        }

        let tasks = chunks.into_iter().map(|chunk| {
            let query = Arc::clone(&query);
            tokio::task::spawn_blocking(move || score_papers(&query, chunk, similarity_threshold))
        });

        let scored = futures::future::try_join_all(tasks)
            .await
            .map_err(|e| RetrievalError::Internal(format!("scoring task failed: {e}")))?;
        Ok(scored.into_iter().flatten().collect())
    }
}

/// Score each paper, keeping those at or above the threshold.
///
/// Papers with a missing, degenerate or wrongly sized embedding are logged
/// and skipped.
fn score_papers(query: &[f32], papers: Vec<Paper>, similarity_threshold: f32) -> Vec<VectorHit> {
    let mut hits = Vec::new();
    for paper in papers {
        let Some(embedding) = paper.embedding.as_deref() else {
            continue;
        };
        match cosine_similarity(query, embedding) {
            Ok(similarity) if similarity >= similarity_threshold => hits.push(VectorHit {
                paper: paper.without_embedding(),
                similarity,
            }),
            Ok(_) => {}
            Err(error) => warn!(paper_id = %paper.id, %error, "skipping paper with unusable embedding"),
        }
    }
    hits
}
