//! SQLite graph store.
//!
//! Papers and edges live in two tables; entities exist implicitly as edge
//! targets. Embeddings are stored as little-endian f32 BLOBs.
//!
//! # Schema
//! - `config`: (key TEXT PRIMARY KEY, value TEXT)
//! - `papers`: (id TEXT PRIMARY KEY, title, abstract, year, embedding BLOB)
//! - `edges`:  (source_id, target_kind, target_name, relationship, role, context)
//!
//! `target_kind` is `paper` for paper-to-paper edges, otherwise the entity
//! kind (`theory`, `method`, `phenomenon`).

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{CoLinkRow, EntityMatchRow, GraphStore, StorageError, StorageResult};
use crate::models::{EdgeTarget, EmbeddingConfig, EntityKind, EntityRef, Paper, Relationship};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS config (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS papers (
    id        TEXT PRIMARY KEY,
    title     TEXT NOT NULL,
    abstract  TEXT NOT NULL DEFAULT '',
    year      INTEGER,
    embedding BLOB
);
CREATE TABLE IF NOT EXISTS edges (
    source_id    TEXT NOT NULL REFERENCES papers(id),
    target_kind  TEXT NOT NULL,
    target_name  TEXT NOT NULL,
    relationship TEXT NOT NULL,
    role         TEXT,
    context      TEXT,
    PRIMARY KEY (source_id, target_kind, target_name, relationship)
);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges (target_kind, target_name);
";

const EMBEDDING_CONFIG_KEY: &str = "embedding_config";
const PAPER_TARGET: &str = "paper";

/// SQLite-backed graph store.
///
/// A single connection is shared behind a mutex; every query runs on a
/// blocking worker thread.
#[derive(Clone)]
pub struct SqliteGraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteGraphStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| StorageError::ConnectionError(format!("{}: {e}", path.display())))?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on a blocking thread.
    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StorageError::ConnectionError("connection mutex poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Other(format!("storage task failed: {e}")))?
    }

    /// Create the schema. Safe to call repeatedly.
    pub async fn initialize(&self) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)
                .map_err(|e| StorageError::SchemaError(e.to_string()))
        })
        .await
    }

    pub async fn store_config(&self, config: &EmbeddingConfig) -> StorageResult<()> {
        let value = serde_json::to_string(config).map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![EMBEDDING_CONFIG_KEY, value],
            )
            .map_err(query_error)?;
            Ok(())
        })
        .await
    }

    /// Insert or replace a paper.
    pub async fn insert_paper(&self, paper: &Paper) -> StorageResult<()> {
        let paper = paper.clone();
        self.with_conn(move |conn| {
            let blob = paper.embedding.as_deref().map(serialize_embedding);
            conn.execute(
                "INSERT OR REPLACE INTO papers (id, title, abstract, year, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![paper.id, paper.title, paper.abstract_text, paper.year, blob],
            )
            .map_err(query_error)?;
            Ok(())
        })
        .await
    }

    /// Insert an edge. Re-inserting the same edge is a no-op.
    pub async fn insert_edge(&self, edge: &Relationship) -> StorageResult<()> {
        let edge = edge.clone();
        self.with_conn(move |conn| {
            let (kind, name) = match &edge.target {
                EdgeTarget::Entity(entity) => (entity.kind.as_str(), entity.name.as_str()),
                EdgeTarget::Paper { id } => (PAPER_TARGET, id.as_str()),
            };
            conn.execute(
                "INSERT OR IGNORE INTO edges (source_id, target_kind, target_name, relationship, role, context)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![edge.source, kind, name, edge.relationship_type, edge.role, edge.context],
            )
            .map_err(query_error)?;
            Ok(())
        })
        .await
    }

    pub async fn count_papers(&self) -> StorageResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))
                .map_err(query_error)?;
            Ok(count as usize)
        })
        .await
    }
}

fn query_error(e: rusqlite::Error) -> StorageError {
    StorageError::QueryError(e.to_string())
}

/// Encode an embedding as little-endian f32 bytes.
pub fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`serialize_embedding`].
pub fn deserialize_embedding(bytes: &[u8]) -> StorageResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(StorageError::SerializationError(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Read `id, title, abstract, year` from the first four columns.
fn paper_summary(row: &Row<'_>) -> rusqlite::Result<Paper> {
    Ok(Paper {
        id: row.get(0)?,
        title: row.get(1)?,
        abstract_text: row.get(2)?,
        year: row.get(3)?,
        embedding: None,
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn embedding_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        self.with_conn(|conn| {
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM config WHERE key = ?1",
                    params![EMBEDDING_CONFIG_KEY],
                    |row| row.get(0),
                )
                .optional()
                .map_err(query_error)?;
            value
                .map(|raw| serde_json::from_str(&raw).map_err(|e| StorageError::SerializationError(e.to_string())))
                .transpose()
        })
        .await
    }

    async fn papers_with_embeddings(&self) -> StorageResult<Vec<Paper>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, abstract, year, embedding FROM papers
                     WHERE embedding IS NOT NULL ORDER BY id",
                )
                .map_err(query_error)?;
            let rows = stmt
                .query_map([], |row| {
                    let paper = paper_summary(row)?;
                    let blob: Vec<u8> = row.get(4)?;
                    Ok((paper, blob))
                })
                .map_err(query_error)?;

            let mut papers = Vec::new();
            for row in rows {
                let (mut paper, blob) = row.map_err(query_error)?;
                paper.embedding = Some(deserialize_embedding(&blob)?);
                papers.push(paper);
            }
            debug!(count = papers.len(), "loaded papers with embeddings");
            Ok(papers)
        })
        .await
    }

    async fn co_linked_papers(&self, seed_ids: &[String]) -> StorageResult<Vec<CoLinkRow>> {
        if seed_ids.is_empty() {
            return Ok(Vec::new());
        }
        let seeds = seed_ids.to_vec();
        self.with_conn(move |conn| {
            let marks = placeholders(seeds.len());
            let sql = format!(
                "SELECT p.id, p.title, p.abstract, p.year,
                        s.target_kind, s.target_name, s.relationship, c.relationship
                 FROM edges s
                 JOIN edges c ON c.target_kind = s.target_kind AND c.target_name = s.target_name
                 JOIN papers p ON p.id = c.source_id
                 WHERE s.source_id IN ({marks})
                   AND s.target_kind != '{PAPER_TARGET}'
                   AND c.source_id NOT IN ({marks})
                 ORDER BY p.id, s.target_kind, s.target_name, s.relationship, c.relationship"
            );
            let mut stmt = conn.prepare(&sql).map_err(query_error)?;
            let bound = seeds.iter().chain(seeds.iter());
            let rows = stmt
                .query_map(params_from_iter(bound), |row| {
                    let paper = paper_summary(row)?;
                    let kind: String = row.get(4)?;
                    let name: String = row.get(5)?;
                    Ok((paper, kind, name, row.get::<_, String>(6)?, row.get::<_, String>(7)?))
                })
                .map_err(query_error)?;

            let mut out = Vec::new();
            for row in rows {
                let (paper, kind, name, seed_relationship, candidate_relationship) = row.map_err(query_error)?;
                let kind: EntityKind = kind.parse().map_err(StorageError::SerializationError)?;
                out.push(CoLinkRow {
                    paper,
                    entity: EntityRef::new(kind, name),
                    seed_relationship,
                    candidate_relationship,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn papers_by_entity_keyword(
        &self,
        kind: EntityKind,
        keyword: &str,
    ) -> StorageResult<Vec<EntityMatchRow>> {
        let needle = keyword.to_lowercase();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT p.id, p.title, p.abstract, p.year, e.target_name
                     FROM edges e JOIN papers p ON p.id = e.source_id
                     WHERE e.target_kind = ?1
                     ORDER BY e.target_name, p.id",
                )
                .map_err(query_error)?;
            let rows = stmt
                .query_map(params![kind.as_str()], |row| {
                    Ok(EntityMatchRow {
                        paper: paper_summary(row)?,
                        entity_name: row.get(4)?,
                    })
                })
                .map_err(query_error)?;

            // SQLite's lower() folds ASCII only; match in Rust so non-ASCII
            // names fold the same way as the keyword.
            let mut matches = Vec::new();
            for row in rows {
                let row = row.map_err(query_error)?;
                if row.entity_name.to_lowercase().contains(&needle) {
                    matches.push(row);
                }
            }
            Ok(matches)
        })
        .await
    }
}
