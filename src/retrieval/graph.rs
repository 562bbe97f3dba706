//! Graph channel: expand the vector seeds through shared entities.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use super::RetrievalOutcome;
use crate::models::{EntityRef, GraphHit, Paper};
use crate::storage::GraphStore;

pub struct GraphExpander<'a, S: ?Sized> {
    store: &'a S,
}

struct Candidate {
    paper: Paper,
    entities: BTreeSet<EntityRef>,
    relationship_types: BTreeSet<String>,
}

impl<'a, S> GraphExpander<'a, S>
where
    S: GraphStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Papers sharing entities with `seed_ids`, strongest connection first.
    ///
    /// Connection strength counts distinct shared entities, so an entity
    /// reached through several edge types still counts once. Seeds never
    /// appear in the output. An empty seed set returns an empty list
    /// without querying the store.
    pub async fn expand(&self, seed_ids: &[String], top_k: usize) -> RetrievalOutcome<Vec<GraphHit>> {
        if seed_ids.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let rows = self.store.co_linked_papers(seed_ids).await?;
        let seeds: HashSet<&str> = seed_ids.iter().map(String::as_str).collect();

        let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();
        for row in rows {
            if seeds.contains(row.paper.id.as_str()) {
                continue;
            }
            let candidate = candidates.entry(row.paper.id.clone()).or_insert_with(|| Candidate {
                paper: row.paper.without_embedding(),
                entities: BTreeSet::new(),
                relationship_types: BTreeSet::new(),
            });
            candidate.entities.insert(row.entity);
            candidate.relationship_types.insert(row.seed_relationship);
            candidate.relationship_types.insert(row.candidate_relationship);
        }

        let mut hits: Vec<GraphHit> = candidates
            .into_values()
            .map(|candidate| GraphHit {
                connection_strength: candidate.entities.len(),
                relationship_types: candidate.relationship_types.into_iter().collect(),
                shared_entities: candidate.entities.into_iter().collect(),
                paper: candidate.paper,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.connection_strength
                .cmp(&a.connection_strength)
                .then_with(|| a.paper.id.cmp(&b.paper.id))
        });
        let found = hits.len();
        hits.truncate(top_k);

        debug!(seeds = seed_ids.len(), found, kept = hits.len(), "graph channel expanded");
        Ok(hits)
    }
}
