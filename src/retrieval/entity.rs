//! Entity channel: match question keywords against entity names.
//!
//! The question is reduced to content keywords, every (kind, keyword) pair
//! is looked up in the store, and the matches are scored by how many of the
//! question's keywords each entity name covers.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tracing::debug;

use super::{RetrievalError, RetrievalOutcome};
use crate::models::{EntityHit, EntityKind, Paper};
use crate::storage::GraphStore;

/// Tokens that never become entity keywords.
pub const STOPWORDS: &[&str] = &[
    // function words
    "a", "about", "above", "after", "again", "against", "all", "also", "among", "an", "and", "any",
    "are", "around", "as", "at", "be", "been", "being", "between", "both", "but", "by", "can",
    "could", "did", "do", "does", "doing", "during", "each", "either", "for", "from", "further",
    "had", "has", "have", "having", "her", "his", "how", "however", "in", "into", "is", "it", "its",
    "itself", "just", "may", "might", "more", "most", "must", "neither", "nor", "not", "of",
    "off", "on", "once", "only", "or", "other", "our", "out", "over", "own", "same", "shall",
    "should", "some", "such", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "those", "through", "to", "too", "under", "until", "upon", "very", "was",
    "we", "were", "will", "with", "within", "without", "would", "you", "your",
    // question words and request verbs
    "what", "which", "who", "whom", "whose", "why", "when", "where", "explain", "explains",
    "describe", "describes", "find", "show", "tell", "give", "list", "know", "known",
    // generic type words
    "theory", "theories", "theoretical", "method", "methods", "methodology", "methodologies",
    "phenomenon", "phenomena", "paper", "papers", "study", "studies", "research", "article",
    "articles", "literature", "use", "uses", "used", "using", "related", "relate", "relates",
];

/// Reduce a question to its content keywords.
///
/// Tokens are lowercased and split on anything other than alphanumerics,
/// hyphens and apostrophes. Edge punctuation and a possessive `'s` are
/// removed, short tokens and stopwords dropped, duplicates collapsed in
/// order of first appearance, and at most `max_keywords` kept.
pub fn extract_keywords(text: &str, min_len: usize, max_keywords: usize) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for raw in lowered.split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '\'')) {
        let token = raw.trim_matches(|c| c == '-' || c == '\'');
        let token = token.strip_suffix("'s").unwrap_or(token);
        let token = token.trim_matches(|c| c == '-' || c == '\'');

        if token.is_empty() || token.chars().count() < min_len || STOPWORDS.contains(&token) {
            continue;
        }
        if seen.insert(token.to_string()) {
            keywords.push(token.to_string());
            if keywords.len() == max_keywords {
                break;
            }
        }
    }
    keywords
}

#[derive(Default)]
struct EntityMatches {
    /// Indices into the keyword list, so matched keywords keep query order
    keyword_indices: BTreeSet<usize>,
    papers: BTreeMap<String, Paper>,
}

pub struct EntityMatcher<'a, S: ?Sized> {
    store: &'a S,
    min_keyword_len: usize,
    max_keywords: usize,
    max_concurrency: usize,
}

impl<'a, S> EntityMatcher<'a, S>
where
    S: GraphStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            min_keyword_len: 3,
            max_keywords: 8,
            max_concurrency: 4,
        }
    }

    pub fn with_min_keyword_len(mut self, min_keyword_len: usize) -> Self {
        self.min_keyword_len = min_keyword_len;
        self
    }

    pub fn with_max_keywords(mut self, max_keywords: usize) -> Self {
        self.max_keywords = max_keywords;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Papers linked to entities whose names contain the question's
    /// keywords, at most `top_k`, one hit per paper.
    ///
    /// Kinds share the quota round-robin (theory, method, phenomenon); within
    /// a kind the best-covering entity comes first.
    pub async fn find_matches(&self, query_text: &str, top_k: usize) -> RetrievalOutcome<Vec<EntityHit>> {
        let keywords = extract_keywords(query_text, self.min_keyword_len, self.max_keywords);
        if keywords.is_empty() || top_k == 0 {
            debug!("no entity keywords in question");
            return Ok(Vec::new());
        }

        let matches = self.lookup(&keywords).await?;
        let total_keywords = keywords.len() as f32;

        let mut per_kind: BTreeMap<EntityKind, Vec<EntityHit>> = BTreeMap::new();
        for ((kind, entity_name), found) in matches {
            let matched_keywords: Vec<String> = found
                .keyword_indices
                .iter()
                .map(|&index| keywords[index].clone())
                .collect();
            let coverage = matched_keywords.len() as f32 / total_keywords;
            let hits = per_kind.entry(kind).or_default();
            for paper in found.papers.into_values() {
                hits.push(EntityHit {
                    paper,
                    entity_name: entity_name.clone(),
                    entity_kind: kind,
                    matched_keywords: matched_keywords.clone(),
                    coverage,
                });
            }
        }

        let mut queues: Vec<VecDeque<EntityHit>> = EntityKind::ALL
            .iter()
            .map(|kind| {
                let mut hits = per_kind.remove(kind).unwrap_or_default();
                hits.sort_by(|a, b| {
                    b.coverage
                        .total_cmp(&a.coverage)
                        .then_with(|| a.entity_name.cmp(&b.entity_name))
                        .then_with(|| a.paper.id.cmp(&b.paper.id))
                });
                VecDeque::from(hits)
            })
            .collect();

        let hits = interleave(&mut queues, top_k);
        debug!(keywords = ?keywords, kept = hits.len(), "entity channel matched");
        Ok(hits)
    }

    /// Run every (kind, keyword) lookup, at most `max_concurrency` at once,
    /// and group the rows by entity.
    async fn lookup(&self, keywords: &[String]) -> RetrievalOutcome<BTreeMap<(EntityKind, String), EntityMatches>> {
        let semaphore = Semaphore::new(self.max_concurrency);
        let semaphore = &semaphore;

        let lookups = EntityKind::ALL.iter().flat_map(move |&kind| {
            keywords.iter().enumerate().map(move |(index, keyword)| async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| RetrievalError::Internal(format!("lookup limiter closed: {e}")))?;
                let rows = self.store.papers_by_entity_keyword(kind, keyword).await?;
                Ok::<_, RetrievalError>((kind, index, rows))
            })
        });

        let mut matches: BTreeMap<(EntityKind, String), EntityMatches> = BTreeMap::new();
        for (kind, index, rows) in try_join_all(lookups).await? {
            for row in rows {
                let entry = matches.entry((kind, row.entity_name)).or_default();
                entry.keyword_indices.insert(index);
                entry
                    .papers
                    .entry(row.paper.id.clone())
                    .or_insert_with(|| row.paper.without_embedding());
            }
        }
        Ok(matches)
    }
}

/// Take one hit per queue in turn, skipping papers already taken, until
/// `limit` hits are collected or every queue is drained.
fn interleave(queues: &mut [VecDeque<EntityHit>], limit: usize) -> Vec<EntityHit> {
    let mut taken = HashSet::new();
    let mut hits = Vec::new();

    while hits.len() < limit && queues.iter().any(|queue| !queue.is_empty()) {
        for queue in queues.iter_mut() {
            if hits.len() == limit {
                break;
            }
            while let Some(hit) = queue.pop_front() {
                if taken.insert(hit.paper.id.clone()) {
                    hits.push(hit);
                    break;
                }
            }
        }
    }
    hits
}
