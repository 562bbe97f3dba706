//! Merge the three channel lists into one deduplicated, explained ranking.

use std::collections::BTreeMap;

use crate::models::{
    Channel, ChannelScore, EntityHit, Evidence, FusedPaper, GraphHit, Paper, RetrievalResult, VectorHit,
};

/// Union the channel results by paper id.
///
/// Each paper carries one [`ChannelScore`] per contributing channel, ordered
/// vector, graph, entity. Normalized scores put the channels on a common
/// [0, 1] scale: similarity is clamped, connection strength is divided by
/// the strongest connection in the graph list, and keyword coverage is
/// used as is. Papers found by more channels rank first, then by their best
/// normalized score, then by id.
///
/// The channel lists are kept on the result as given. `question` and
/// `timed_out` are left for the caller to fill in.
pub fn fuse(vector: Vec<VectorHit>, graph: Vec<GraphHit>, entity: Vec<EntityHit>) -> RetrievalResult {
    let mut fused: BTreeMap<String, FusedPaper> = BTreeMap::new();

    for hit in &vector {
        let score = ChannelScore {
            channel: Channel::Vector,
            score: hit.similarity,
            normalized: hit.similarity.clamp(0.0, 1.0),
            evidence: Evidence::Vector {
                similarity: hit.similarity,
            },
        };
        contribute(&mut fused, &hit.paper, score);
    }

    let max_strength = graph.iter().map(|hit| hit.connection_strength).max().unwrap_or(0);
    for hit in &graph {
        let normalized = if max_strength == 0 {
            0.0
        } else {
            hit.connection_strength as f32 / max_strength as f32
        };
        let score = ChannelScore {
            channel: Channel::Graph,
            score: hit.connection_strength as f32,
            normalized,
            evidence: Evidence::Graph {
                connection_strength: hit.connection_strength,
                relationship_types: hit.relationship_types.clone(),
            },
        };
        contribute(&mut fused, &hit.paper, score);
    }

    for hit in &entity {
        let score = ChannelScore {
            channel: Channel::Entity,
            score: hit.coverage,
            normalized: hit.coverage.clamp(0.0, 1.0),
            evidence: Evidence::Entity {
                entity_name: hit.entity_name.clone(),
                entity_kind: hit.entity_kind,
                matched_keywords: hit.matched_keywords.clone(),
            },
        };
        contribute(&mut fused, &hit.paper, score);
    }

    let mut papers: Vec<FusedPaper> = fused.into_values().collect();
    papers.sort_by(|a, b| {
        b.channel_count()
            .cmp(&a.channel_count())
            .then_with(|| b.best_score.total_cmp(&a.best_score))
            .then_with(|| a.paper.id.cmp(&b.paper.id))
    });

    let provenance = papers
        .iter()
        .map(|fused| (fused.paper.id.clone(), fused.provenance.clone()))
        .collect();

    RetrievalResult {
        total_papers: papers.len(),
        papers,
        vector,
        graph,
        entity,
        provenance,
        ..RetrievalResult::default()
    }
}

fn contribute(fused: &mut BTreeMap<String, FusedPaper>, paper: &Paper, score: ChannelScore) {
    let entry = fused.entry(paper.id.clone()).or_insert_with(|| FusedPaper {
        paper: paper.without_embedding(),
        provenance: Vec::new(),
        best_score: 0.0,
    });
    // A channel counts once per paper; its first (best) hit stands.
    if entry.provenance.iter().any(|existing| existing.channel == score.channel) {
        return;
    }
    entry.best_score = entry.best_score.max(score.normalized);
    entry.provenance.push(score);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, EntityRef};
    use proptest::prelude::*;
    use std::collections::{BTreeSet, HashSet};

    fn vector_hit(id: &str, similarity: f32) -> VectorHit {
        VectorHit {
            paper: Paper::new(id, format!("Paper {id}")),
            similarity,
        }
    }

    fn graph_hit(id: &str, connection_strength: usize) -> GraphHit {
        GraphHit {
            paper: Paper::new(id, format!("Paper {id}")),
            connection_strength,
            relationship_types: vec!["uses_theory".to_string()],
            shared_entities: vec![EntityRef::theory("Agency Theory")],
        }
    }

    fn entity_hit(id: &str, coverage: f32) -> EntityHit {
        EntityHit {
            paper: Paper::new(id, format!("Paper {id}")),
            entity_name: "Agency Theory".to_string(),
            entity_kind: EntityKind::Theory,
            matched_keywords: vec!["agency".to_string()],
            coverage,
        }
    }

    #[test]
    fn test_multi_channel_papers_rank_first() {
        let result = fuse(
            vec![vector_hit("v", 0.95), vector_hit("both", 0.5)],
            vec![graph_hit("g", 3)],
            vec![entity_hit("both", 0.5)],
        );

        assert_eq!(result.paper_ids(), vec!["both", "g", "v"]);
        assert_eq!(result.total_papers, 3);
        assert_eq!(result.channels_for("both"), vec![Channel::Vector, Channel::Entity]);
        assert_eq!(result.get("both").unwrap().best_score, 0.5);
        assert!(result.question.is_empty());
        assert!(result.timed_out.is_empty());
    }

    #[test]
    fn test_normalization() {
        let result = fuse(
            vec![vector_hit("neg", -0.2)],
            vec![graph_hit("strong", 4), graph_hit("weak", 2)],
            vec![entity_hit("half", 0.5)],
        );

        let normalized = |id: &str| result.provenance[id][0].normalized;
        assert_eq!(normalized("neg"), 0.0);
        assert_eq!(result.provenance["neg"][0].score, -0.2);
        assert_eq!(normalized("strong"), 1.0);
        assert_eq!(normalized("weak"), 0.5);
        assert_eq!(normalized("half"), 0.5);
        assert_eq!(result.paper_ids(), vec!["strong", "half", "weak", "neg"]);
    }

    #[test]
    fn test_ties_break_by_id_and_evidence_kept() {
        let result = fuse(vec![], vec![graph_hit("b", 1), graph_hit("a", 1)], vec![]);
        assert_eq!(result.paper_ids(), vec!["a", "b"]);
        match &result.papers[0].provenance[0].evidence {
            Evidence::Graph {
                connection_strength,
                relationship_types,
            } => {
                assert_eq!(*connection_strength, 1);
                assert_eq!(relationship_types, &vec!["uses_theory".to_string()]);
            }
            other => panic!("unexpected evidence: {other:?}"),
        }
        assert_eq!(result.graph.len(), 2);
    }

    #[test]
    fn test_empty_inputs() {
        let result = fuse(vec![], vec![], vec![]);
        assert!(result.is_empty());
        assert_eq!(result.total_papers, 0);
        assert!(result.provenance.is_empty());
    }

    fn ids() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(0u8..12, 0..10)
            .prop_map(|raw| raw.into_iter().map(|n| format!("p{n}")).collect())
    }

    proptest! {
        #[test]
        fn prop_fused_papers_are_unique_and_fully_attributed(
            vector_ids in ids(),
            graph_ids in ids(),
            entity_ids in ids(),
            score in 0.0_f32..1.0,
        ) {
            let result = fuse(
                vector_ids.iter().map(|id| vector_hit(id, score)).collect(),
                graph_ids.iter().map(|id| graph_hit(id, 1)).collect(),
                entity_ids.iter().map(|id| entity_hit(id, score)).collect(),
            );

            let unique: HashSet<&str> = result.paper_ids().into_iter().collect();
            prop_assert_eq!(unique.len(), result.papers.len());

            let union: BTreeSet<&String> = vector_ids.iter().chain(&graph_ids).chain(&entity_ids).collect();
            prop_assert_eq!(result.total_papers, union.len());

            for id in union {
                let mut expected = Vec::new();
                if vector_ids.contains(id) { expected.push(Channel::Vector); }
                if graph_ids.contains(id) { expected.push(Channel::Graph); }
                if entity_ids.contains(id) { expected.push(Channel::Entity); }
                prop_assert_eq!(result.channels_for(id), expected);
            }

            for pair in result.papers.windows(2) {
                prop_assert!(pair[0].channel_count() >= pair[1].channel_count());
            }
        }
    }
}
