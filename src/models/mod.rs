//! Core data models for the paper knowledge graph and retrieval results.
//!
//! The graph side (papers, entities, relationship edges) is owned by the
//! [`GraphStore`](crate::storage::GraphStore); the retrieval side
//! ([`RetrievalResult`] and its parts) is created fresh for every query and
//! dropped once the caller has consumed it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A single ingested research paper, the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Paper {
    /// Unique identifier
    pub id: String,

    /// Paper title
    pub title: String,

    /// Abstract text
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,

    /// Year of publication, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    /// Vector embedding of the paper text.
    ///
    /// Papers without one are invisible to vector search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Paper {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            abstract_text: String::new(),
            year: None,
            embedding: None,
        }
    }

    pub fn with_abstract(mut self, abstract_text: impl Into<String>) -> Self {
        self.abstract_text = abstract_text.into();
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Copy of this paper without its embedding, as carried in results.
    pub fn without_embedding(&self) -> Self {
        Self {
            embedding: None,
            ..self.clone()
        }
    }
}

/// The kinds of named concept a paper can be linked to.
///
/// The declaration order is the priority order used whenever kinds are
/// iterated (entity matching interleaves them in this order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Theory,
    Method,
    Phenomenon,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Theory, EntityKind::Method, EntityKind::Phenomenon];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Theory => "theory",
            EntityKind::Method => "method",
            EntityKind::Phenomenon => "phenomenon",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "theory" => Ok(EntityKind::Theory),
            "method" => Ok(EntityKind::Method),
            "phenomenon" => Ok(EntityKind::Phenomenon),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// Reference to a named concept: its kind plus canonical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn theory(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Theory, name)
    }

    pub fn method(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Method, name)
    }

    pub fn phenomenon(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Phenomenon, name)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// What a relationship edge points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeTarget {
    Entity(EntityRef),
    Paper { id: String },
}

/// A typed, directed edge leaving a paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Source paper identifier
    pub source: String,

    pub target: EdgeTarget,

    /// Type tag, e.g. `uses_theory` or `studies_phenomenon`
    pub relationship_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Relationship {
    /// Edge from a paper to a named concept.
    pub fn to_entity(
        source: impl Into<String>,
        entity: EntityRef,
        relationship_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: EdgeTarget::Entity(entity),
            relationship_type: relationship_type.into(),
            role: None,
            context: None,
        }
    }

    /// Edge between two papers.
    pub fn to_paper(
        source: impl Into<String>,
        target: impl Into<String>,
        relationship_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: EdgeTarget::Paper { id: target.into() },
            relationship_type: relationship_type.into(),
            role: None,
            context: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn entity(&self) -> Option<&EntityRef> {
        match &self.target {
            EdgeTarget::Entity(entity) => Some(entity),
            EdgeTarget::Paper { .. } => None,
        }
    }
}

/// Configuration for the embedding model.
///
/// Stored alongside the graph so query-time embeddings come from the same
/// model that embedded the papers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingConfig {
    /// Name/identifier of the embedding model (e.g., "text-embedding-3-small")
    pub model_name: String,

    /// Dimension of the embedding vectors
    pub dimension: usize,
}

/// One of the three retrieval strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Vector,
    Graph,
    Entity,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Vector => "vector",
            Channel::Graph => "graph",
            Channel::Entity => "entity",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A paper found by embedding similarity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorHit {
    pub paper: Paper,

    /// Cosine similarity to the query, in [-1, 1]
    pub similarity: f32,
}

/// A paper found by sharing entities with the vector seeds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphHit {
    pub paper: Paper,

    /// Number of distinct entities shared with the seed set
    pub connection_strength: usize,

    /// Distinct relationship type tags traversed, sorted
    pub relationship_types: Vec<String>,

    /// The shared entities themselves, sorted
    pub shared_entities: Vec<EntityRef>,
}

/// A paper linked to an entity whose name matched the query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityHit {
    pub paper: Paper,
    pub entity_name: String,
    pub entity_kind: EntityKind,

    /// Query keywords found in the entity name
    pub matched_keywords: Vec<String>,

    /// Fraction of query keywords found in the entity name, in (0, 1]
    pub coverage: f32,
}

/// Channel-specific evidence for why a paper was retrieved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum Evidence {
    Vector {
        similarity: f32,
    },
    Graph {
        connection_strength: usize,
        relationship_types: Vec<String>,
    },
    Entity {
        entity_name: String,
        entity_kind: EntityKind,
        matched_keywords: Vec<String>,
    },
}

/// One channel's contribution to a fused paper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelScore {
    pub channel: Channel,

    /// Raw channel score (similarity, connection strength, or coverage)
    pub score: f32,

    /// Score rescaled to [0, 1] so channels can be compared
    pub normalized: f32,

    pub evidence: Evidence,
}

/// A deduplicated paper in the fused ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusedPaper {
    pub paper: Paper,

    /// Contributions ordered vector, graph, entity
    pub provenance: Vec<ChannelScore>,

    /// Maximum normalized score across contributing channels
    pub best_score: f32,
}

impl FusedPaper {
    pub fn channels(&self) -> Vec<Channel> {
        self.provenance.iter().map(|score| score.channel).collect()
    }

    pub fn channel_count(&self) -> usize {
        self.provenance.len()
    }
}

/// The outcome of one retrieval query.
///
/// An empty `papers` list is a normal outcome ("nothing found"); failures to
/// search at all are reported as [`RetrievalError`](crate::retrieval::RetrievalError)
/// instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub question: String,

    /// Fused, deduplicated ranking
    pub papers: Vec<FusedPaper>,

    /// Number of distinct papers across all channels
    pub total_papers: usize,

    pub vector: Vec<VectorHit>,
    pub graph: Vec<GraphHit>,
    pub entity: Vec<EntityHit>,

    /// Paper id to the channels that produced it, with their scores
    pub provenance: BTreeMap<String, Vec<ChannelScore>>,

    /// Channels that exceeded their time budget and contributed nothing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timed_out: Vec<Channel>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
    }

    pub fn paper_ids(&self) -> Vec<&str> {
        self.papers.iter().map(|fused| fused.paper.id.as_str()).collect()
    }

    pub fn get(&self, paper_id: &str) -> Option<&FusedPaper> {
        self.papers.iter().find(|fused| fused.paper.id == paper_id)
    }

    /// Channels that contributed the given paper.
    pub fn channels_for(&self, paper_id: &str) -> Vec<Channel> {
        self.provenance
            .get(paper_id)
            .map(|scores| scores.iter().map(|score| score.channel).collect())
            .unwrap_or_default()
    }
}
