//! Paper GraphRAG - graph-augmented retrieval over a research-paper graph.
//!
//! Papers are linked by typed edges to named entities (theories, methods and
//! phenomena). A question is answered by three retrieval channels whose
//! results are fused into one deduplicated ranking, each paper carrying the
//! evidence of every channel that found it.
//!
//! # Architecture
//!
//! - **models**: Papers, entities, relationships, channel hits and results
//! - **embedding**: Query embedding providers and text normalization
//! - **storage**: The read-only graph store seam (in-memory and SQLite)
//! - **retrieval**: Vector, graph and entity channels, fusion, orchestration
//! - **config**: Retrieval defaults, limits and channel time budgets
//!
//! # Query flow
//!
//! 1. Embed the question and rank papers by cosine similarity (vector)
//! 2. Expand the vector hits through shared entities (graph)
//! 3. Meanwhile, match question keywords against entity names (entity)
//! 4. Fuse: papers found by more channels first, then by best score
//!
//! # Example
//!
//! ```ignore
//! use paper_graphrag::{
//!     embedding::openai::OpenAIEmbedding,
//!     storage::sqlite::SqliteGraphStore,
//!     GraphRagEngine,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let embedder = OpenAIEmbedding::from_env(None)?;
//!     let store = SqliteGraphStore::open("graph.db")?;
//!     let engine = GraphRagEngine::new(embedder, store);
//!
//!     let result = engine.ask("Which theories explain organizational ambidexterity?").await?;
//!     for fused in &result.papers {
//!         println!("{} {:?}", fused.paper.title, fused.channels());
//!     }
//!
//!     Ok(())
//! }
//! ```

// Public modules
pub mod config;
pub mod embedding;
pub mod models;
pub mod retrieval;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types at the crate root
pub use config::RetrievalConfig;
pub use embedding::EmbeddingProvider;
pub use models::{Channel, EmbeddingConfig, EntityKind, EntityRef, Paper, Relationship, RetrievalResult};
pub use retrieval::{GraphRagEngine, RetrievalError, RetrievalQuery, Retriever};
pub use storage::GraphStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
