//! The retrieval orchestrator.
//!
//! # Usage
//!
//! ```rust,no_run
//! use paper_graphrag::embedding::openai::OpenAIEmbedding;
//! use paper_graphrag::retrieval::{GraphRagEngine, RetrievalQuery};
//! use paper_graphrag::storage::sqlite::SqliteGraphStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = OpenAIEmbedding::new("api-key".to_string(), None)?;
//! let store = SqliteGraphStore::open("papers.db")?;
//! let engine = GraphRagEngine::new(embedder, store);
//!
//! let query = RetrievalQuery::new("What explains organizational ambidexterity?".to_string(), Some(5), None);
//! let result = engine.query(&query).await?;
//!
//! for fused in &result.papers {
//!     println!("{} via {:?} ({:.3})", fused.paper.title, fused.channels(), fused.best_score);
//! }
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::entity::EntityMatcher;
use super::fusion::fuse;
use super::graph::GraphExpander;
use super::vector::VectorRetriever;
use super::{RetrievalError, RetrievalOutcome, RetrievalQuery};
use crate::config::{ConfigError, RetrievalConfig};
use crate::embedding::{normalize_text, EmbeddingProvider};
use crate::models::{Channel, RetrievalResult};
use crate::storage::GraphStore;

/// Anything that can answer a [`RetrievalQuery`].
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &RetrievalQuery) -> RetrievalOutcome<RetrievalResult>;
}

/// Whether a channel finished inside its time budget.
enum Outcome<T> {
    Done(T),
    TimedOut,
}

impl<T> Outcome<Vec<T>> {
    fn or_record(self, channel: Channel, timed_out: &mut Vec<Channel>) -> Vec<T> {
        match self {
            Outcome::Done(hits) => hits,
            Outcome::TimedOut => {
                timed_out.push(channel);
                Vec::new()
            }
        }
    }
}

async fn within<T, F>(channel: Channel, budget: Duration, work: F) -> RetrievalOutcome<Outcome<T>>
where
    F: Future<Output = RetrievalOutcome<T>>,
{
    match tokio::time::timeout(budget, work).await {
        Ok(result) => result.map(Outcome::Done),
        Err(_) => {
            warn!(%channel, budget_ms = budget.as_millis() as u64, "channel timed out");
            Ok(Outcome::TimedOut)
        }
    }
}

/// Three-channel GraphRAG retrieval over a paper graph.
///
/// The vector channel's hits seed graph expansion while entity matching
/// runs alongside; the three lists are then fused. The engine holds no
/// per-query state, so one instance can serve concurrent callers.
pub struct GraphRagEngine<E, S>
where
    E: EmbeddingProvider,
    S: GraphStore,
{
    embedder: E,
    store: S,
    config: RetrievalConfig,
}

impl<E, S> GraphRagEngine<E, S>
where
    E: EmbeddingProvider,
    S: GraphStore,
{
    /// Create an engine with the default [`RetrievalConfig`].
    pub fn new(embedder: E, store: S) -> Self {
        Self {
            embedder,
            store,
            config: RetrievalConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Retrieve with the configured defaults.
    pub async fn ask(&self, question: &str) -> RetrievalOutcome<RetrievalResult> {
        self.query(&RetrievalQuery::from(question)).await
    }

    /// Run all three channels and fuse their results.
    ///
    /// # Errors
    /// - [`RetrievalError::InvalidQuery`] for an empty question, `top_k == 0`
    ///   or a threshold outside [-1, 1]; nothing is queried
    /// - [`RetrievalError::ServiceUnavailable`] as soon as either backend
    ///   fails to respond; the other branch is abandoned
    /// - [`RetrievalError::AllChannelsTimedOut`] when neither the vector nor
    ///   the entity channel finishes in time
    pub async fn query(&self, query: &RetrievalQuery) -> RetrievalOutcome<RetrievalResult> {
        let started = Instant::now();
        let (top_k, threshold) = self.resolve(query)?;
        let question = query.question.as_str();
        debug!(question, top_k, threshold, "retrieval started");

        let vector_retriever = VectorRetriever::new(&self.embedder, &self.store)
            .with_parallelism(self.config.max_concurrency, self.config.parallel_scoring_min);
        let graph_expander = GraphExpander::new(&self.store);
        let entity_matcher = EntityMatcher::new(&self.store)
            .with_min_keyword_len(self.config.min_keyword_len)
            .with_max_keywords(self.config.max_keywords)
            .with_max_concurrency(self.config.max_concurrency);

        let vector_chain = async {
            let vector = within(
                Channel::Vector,
                self.config.vector_timeout(),
                vector_retriever.retrieve(question, top_k, threshold),
            )
            .await?;
            // No seeds without the vector channel.
            let Outcome::Done(vector) = vector else {
                return Ok::<_, RetrievalError>((Outcome::TimedOut, Outcome::TimedOut));
            };

            let seeds: Vec<String> = vector.iter().map(|hit| hit.paper.id.clone()).collect();
            let graph = within(
                Channel::Graph,
                self.config.graph_timeout(),
                graph_expander.expand(&seeds, top_k),
            )
            .await?;
            Ok::<_, RetrievalError>((Outcome::Done(vector), graph))
        };
        let entity_channel = within(
            Channel::Entity,
            self.config.entity_timeout(),
            entity_matcher.find_matches(question, top_k),
        );

        let ((vector, graph), entity) = tokio::try_join!(vector_chain, entity_channel)?;

        if matches!(vector, Outcome::TimedOut) && matches!(entity, Outcome::TimedOut) {
            warn!(question, "every retrieval channel timed out");
            return Err(RetrievalError::AllChannelsTimedOut);
        }

        let mut timed_out = Vec::new();
        let vector = vector.or_record(Channel::Vector, &mut timed_out);
        let graph = graph.or_record(Channel::Graph, &mut timed_out);
        let entity = entity.or_record(Channel::Entity, &mut timed_out);

        let mut result = fuse(vector, graph, entity);
        result.question = query.question.clone();
        result.timed_out = timed_out;

        info!(
            question,
            papers = result.total_papers,
            vector = result.vector.len(),
            graph = result.graph.len(),
            entity = result.entity.len(),
            timed_out = ?result.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieval complete"
        );
        Ok(result)
    }

    /// Like [`query`](Self::query), but gives up as soon as `token` is
    /// cancelled, dropping every outstanding channel.
    ///
    /// Dropping a channel only stops its async work. Blocking work already
    /// handed to a worker thread (a SQLite query, a vector scoring chunk)
    /// runs to completion and its result is discarded. The same holds when
    /// a channel timeout fires or this future is dropped.
    pub async fn query_with_cancellation(
        &self,
        query: &RetrievalQuery,
        token: &CancellationToken,
    ) -> RetrievalOutcome<RetrievalResult> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!(question = %query.question, "retrieval cancelled");
                Err(RetrievalError::Cancelled)
            }
            result = self.query(query) => result,
        }
    }

    fn resolve(&self, query: &RetrievalQuery) -> RetrievalOutcome<(usize, f32)> {
        if normalize_text(&query.question).is_empty() {
            return Err(RetrievalError::InvalidQuery("question is empty".to_string()));
        }

        let top_k = query.top_k.unwrap_or(self.config.top_k);
        if top_k == 0 {
            return Err(RetrievalError::InvalidQuery("top_k must be at least 1".to_string()));
        }

        let threshold = query.similarity_threshold.unwrap_or(self.config.similarity_threshold);
        if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
            return Err(RetrievalError::InvalidQuery(format!(
                "similarity threshold must be within [-1, 1], got {threshold}"
            )));
        }
        Ok((top_k, threshold))
    }
}

#[async_trait]
impl<E, S> Retriever for GraphRagEngine<E, S>
where
    E: EmbeddingProvider,
    S: GraphStore,
{
    async fn retrieve(&self, query: &RetrievalQuery) -> RetrievalOutcome<RetrievalResult> {
        self.query(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Service;
    use crate::storage::memory::InMemoryGraphStore;
    use crate::storage::sqlite::SqliteGraphStore;
    use crate::testing::{query_vector, scenario_graph, FakeEmbedding, FaultyStore};

    const QUESTION: &str = "organizational ambidexterity";

    fn scenario_query() -> RetrievalQuery {
        RetrievalQuery::new(QUESTION.to_string(), Some(5), Some(0.5))
    }

    fn short_timeouts() -> RetrievalConfig {
        RetrievalConfig {
            vector_timeout_ms: 1_000,
            graph_timeout_ms: 1_000,
            entity_timeout_ms: 1_000,
            ..RetrievalConfig::default()
        }
    }

    fn assert_scenario(result: &RetrievalResult) {
        assert_eq!(result.question, QUESTION);
        assert_eq!(result.total_papers, 3);
        assert_eq!(result.paper_ids(), vec!["B", "C", "A"]);

        assert_eq!(result.channels_for("A"), vec![Channel::Vector]);
        assert_eq!(result.channels_for("B"), vec![Channel::Graph]);
        assert_eq!(result.channels_for("C"), vec![Channel::Entity]);

        assert!((result.vector[0].similarity - 0.9).abs() < 1e-5);
        assert_eq!(result.graph[0].connection_strength, 2);
        assert_eq!(result.graph[0].relationship_types, vec!["extends_theory", "uses_theory"]);
        assert_eq!(result.entity[0].entity_name, "Organizational Ambidexterity");
        assert!(result.timed_out.is_empty());
    }

    #[tokio::test]
    async fn test_three_channel_scenario() {
        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), scenario_graph());
        let result = engine.query(&scenario_query()).await.unwrap();
        assert_scenario(&result);
        assert_eq!(engine.embedder().call_count(), 1);
    }

    #[tokio::test]
    async fn test_queries_are_idempotent() {
        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), scenario_graph());
        let first = engine.query(&scenario_query()).await.unwrap();
        let second = engine.query(&scenario_query()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_threshold_one_leaves_only_entity_channel() {
        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), scenario_graph());
        let query = RetrievalQuery::new(QUESTION.to_string(), Some(5), Some(1.0));
        let result = engine.query(&query).await.unwrap();

        assert!(result.vector.is_empty());
        assert!(result.graph.is_empty());
        assert_eq!(result.paper_ids(), vec!["C"]);
        assert!(result.timed_out.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_found_is_not_an_error() {
        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), InMemoryGraphStore::new());
        let result = engine.ask("blockchain governance").await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.total_papers, 0);
    }

    #[tokio::test]
    async fn test_invalid_queries_rejected_before_any_call() {
        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), scenario_graph());
        let invalid = [
            RetrievalQuery::new("   ".to_string(), None, None),
            RetrievalQuery::new(QUESTION.to_string(), Some(0), None),
            RetrievalQuery::new(QUESTION.to_string(), None, Some(1.5)),
            RetrievalQuery::new(QUESTION.to_string(), None, Some(f32::NAN)),
        ];
        for query in &invalid {
            let err = engine.query(query).await.unwrap_err();
            assert!(matches!(err, RetrievalError::InvalidQuery(_)), "{query:?}: {err}");
        }
        assert_eq!(engine.embedder().call_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_backends_fail_the_query() {
        let engine = GraphRagEngine::new(FakeEmbedding::unavailable(), scenario_graph());
        let err = engine.query(&scenario_query()).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::ServiceUnavailable {
                service: Service::EmbeddingProvider,
                ..
            }
        ));

        let engine = GraphRagEngine::new(
            FakeEmbedding::fixed(query_vector()),
            FaultyStore::offline(scenario_graph()),
        );
        let err = engine.query(&scenario_query()).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::ServiceUnavailable {
                service: Service::GraphStore,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailability_abandons_the_other_branch() {
        let store = FaultyStore {
            keyword_delay: Some(Duration::from_secs(60)),
            ..FaultyStore::new(scenario_graph())
        };
        let engine = GraphRagEngine::new(FakeEmbedding::unavailable(), store);

        let started = tokio::time::Instant::now();
        let err = engine.query(&scenario_query()).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_graph_timeout_returns_partial_result() {
        let store = FaultyStore {
            co_link_delay: Some(Duration::from_secs(30)),
            ..FaultyStore::new(scenario_graph())
        };
        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), store)
            .with_config(short_timeouts())
            .unwrap();

        let result = engine.query(&scenario_query()).await.unwrap();
        assert_eq!(result.timed_out, vec![Channel::Graph]);
        assert_eq!(result.paper_ids(), vec!["C", "A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vector_timeout_also_starves_graph() {
        let store = FaultyStore {
            embeddings_delay: Some(Duration::from_secs(30)),
            ..FaultyStore::new(scenario_graph())
        };
        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), store)
            .with_config(short_timeouts())
            .unwrap();

        let result = engine.query(&scenario_query()).await.unwrap();
        assert_eq!(result.timed_out, vec![Channel::Vector, Channel::Graph]);
        assert_eq!(result.paper_ids(), vec!["C"]);
        assert_eq!(engine.store().co_link_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_channels_timing_out_is_unavailable() {
        let store = FaultyStore {
            embeddings_delay: Some(Duration::from_secs(30)),
            keyword_delay: Some(Duration::from_secs(30)),
            ..FaultyStore::new(scenario_graph())
        };
        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), store)
            .with_config(short_timeouts())
            .unwrap();

        let err = engine.query(&scenario_query()).await.unwrap_err();
        assert!(matches!(err, RetrievalError::AllChannelsTimedOut));
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), scenario_graph());
        let token = CancellationToken::new();
        token.cancel();

        let err = engine
            .query_with_cancellation(&scenario_query(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Cancelled));
        assert_eq!(engine.embedder().call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_abandons_slow_channels() {
        let store = FaultyStore {
            embeddings_delay: Some(Duration::from_secs(30)),
            keyword_delay: Some(Duration::from_secs(30)),
            ..FaultyStore::new(scenario_graph())
        };
        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), store);
        let token = CancellationToken::new();

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = engine
            .query_with_cancellation(&scenario_query(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_uncancelled_token_returns_result() {
        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), scenario_graph());
        let token = CancellationToken::new();
        let result = engine
            .query_with_cancellation(&scenario_query(), &token)
            .await
            .unwrap();
        assert_scenario(&result);
    }

    #[tokio::test]
    async fn test_with_config_validates() {
        let bad = RetrievalConfig {
            top_k: 0,
            ..RetrievalConfig::default()
        };
        assert!(GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), scenario_graph())
            .with_config(bad)
            .is_err());
    }

    #[tokio::test]
    async fn test_config_defaults_apply_to_ask() {
        let config = RetrievalConfig {
            top_k: 1,
            similarity_threshold: 0.95,
            ..RetrievalConfig::default()
        };
        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), scenario_graph())
            .with_config(config)
            .unwrap();
        let result = engine.ask(QUESTION).await.unwrap();
        assert!(result.vector.is_empty());
        assert_eq!(result.paper_ids(), vec!["C"]);
    }

    #[tokio::test]
    async fn test_engine_behind_retriever_trait() {
        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), scenario_graph());
        let retriever: &dyn Retriever = &engine;
        let result = retriever.retrieve(&scenario_query()).await.unwrap();
        assert_scenario(&result);
    }

    #[tokio::test]
    async fn test_scenario_over_sqlite_store() {
        let store = SqliteGraphStore::open_in_memory().unwrap();
        store.initialize().await.unwrap();
        let snapshot = scenario_graph().to_snapshot();
        if let Some(config) = &snapshot.embedding_config {
            store.store_config(config).await.unwrap();
        }
        for paper in &snapshot.papers {
            store.insert_paper(paper).await.unwrap();
        }
        for edge in &snapshot.relationships {
            store.insert_edge(edge).await.unwrap();
        }

        let engine = GraphRagEngine::new(FakeEmbedding::fixed(query_vector()), store);
        let result = engine.query(&scenario_query()).await.unwrap();
        assert_scenario(&result);
    }
}
