// feedforward-pipeline/src/cluster.rs
// ============================================================================
// Module: Hybrid Clusterer
// Description: Run-scoped agglomerative clustering plus facet sub-clustering.
// Purpose: Turn embeddings and facets into deterministic ClusterCandidates.
// Dependencies: feedforward-core
// ============================================================================

//! ## Overview
//! Conversations with both an embedding and facets go through agglomerative,
//! average-linkage clustering on cosine distance, then sub-cluster by the
//! exact `(action_type, direction, product_area_canonical)` key. The
//! canonicalized product area is included alongside `(action_type,
//! direction)` because near-identical customer text can describe distinct
//! product areas (e.g. a legacy surface versus its replacement); text-only
//! similarity must never merge those into one candidate. Conversations
//! missing either input fall back to grouping by facets alone (or a
//! singleton, if facets are also missing) rather than being silently
//! dropped. `cluster_id`s are assigned after sorting candidates by size
//! (descending) then by the smallest member `conversation_id`, so identical
//! inputs always produce identical cluster ids and membership.

use std::collections::BTreeMap;

use feedforward_core::ClusterCandidate;
use feedforward_core::ClusterId;
use feedforward_core::ConversationId;
use feedforward_core::Embedding;
use feedforward_core::Facets;
use feedforward_core::RunId;
use feedforward_core::canonicalize::SignatureRegistry;

/// One conversation's embedding/facet pair as loaded for clustering,
/// mirroring [`feedforward_core::RunStore::load_embeddings_and_facets`].
pub type ClusterInput = (ConversationId, Option<Embedding>, Option<Facets>);

/// Clusters every conversation loaded for `run_id` into deterministic
/// [`ClusterCandidate`]s.
#[must_use]
pub fn cluster_for_run(
    run_id: RunId,
    inputs: Vec<ClusterInput>,
    registry: &SignatureRegistry,
    distance_threshold: f32,
) -> Vec<ClusterCandidate> {
    let mut hybrid = Vec::new();
    let mut fallback = Vec::new();
    for (conversation_id, embedding, facets) in inputs {
        match (embedding, facets) {
            (Some(embedding), Some(facets)) => hybrid.push((conversation_id, embedding, facets)),
            (_, facets) => fallback.push((conversation_id, facets)),
        }
    }

    let mut groups: Vec<Vec<(ConversationId, Facets)>> = Vec::new();
    for vector_cluster in agglomerate(&hybrid, distance_threshold) {
        groups.extend(sub_cluster_by_facet_key(vector_cluster, registry));
    }
    groups.extend(fallback_groups(fallback, registry));

    let mut candidates: Vec<ClusterCandidate> = groups
        .into_iter()
        .filter(|group| !group.is_empty())
        .map(|group| build_candidate(run_id, group, registry))
        .collect();

    candidates.sort_by(|a, b| {
        b.conversation_ids
            .len()
            .cmp(&a.conversation_ids.len())
            .then_with(|| a.conversation_ids.first().cmp(&b.conversation_ids.first()))
    });
    for (index, candidate) in candidates.iter_mut().enumerate() {
        candidate.cluster_id = ClusterId::new(format!("c{index:04}"));
    }
    candidates
}

/// Average-linkage agglomerative clustering on cosine distance, merging
/// while the closest pair of clusters stays within `threshold`.
fn agglomerate(hybrid: &[(ConversationId, Embedding, Facets)], threshold: f32) -> Vec<Vec<(ConversationId, Facets)>> {
    let mut clusters: Vec<Vec<usize>> = (0..hybrid.len()).map(|index| vec![index]).collect();

    loop {
        let mut best: Option<(usize, usize, f32)> = None;
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                let distance = average_linkage_distance(hybrid, &clusters[i], &clusters[j]);
                let is_better = match best {
                    Some((_, _, best_distance)) => distance < best_distance,
                    None => true,
                };
                if is_better {
                    best = Some((i, j, distance));
                }
            }
        }
        match best {
            Some((i, j, distance)) if distance <= threshold => {
                let merged = clusters[j].clone();
                clusters[i].extend(merged);
                clusters.remove(j);
            }
            _ => break,
        }
    }

    clusters
        .into_iter()
        .map(|indices| indices.into_iter().map(|index| (hybrid[index].0.clone(), hybrid[index].2.clone())).collect())
        .collect()
}

#[allow(clippy::cast_precision_loss, reason = "pair counts within one run never approach f32's integer precision limit")]
fn average_linkage_distance(hybrid: &[(ConversationId, Embedding, Facets)], left: &[usize], right: &[usize]) -> f32 {
    let mut total = 0.0_f32;
    let mut count = 0_u32;
    for &i in left {
        for &j in right {
            total += cosine_distance(&hybrid[i].1.vector, &hybrid[j].1.vector);
            count += 1;
        }
    }
    if count == 0 { f32::MAX } else { total / count as f32 }
}

/// Returns `1 - cosine_similarity`, clamped to `[0.0, 2.0]`.
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    (1.0 - dot / (norm_a * norm_b)).clamp(0.0, 2.0)
}

/// Splits one vector cluster into exact `(action_type, direction,
/// product_area_canonical)` groups.
fn sub_cluster_by_facet_key(members: Vec<(ConversationId, Facets)>, registry: &SignatureRegistry) -> Vec<Vec<(ConversationId, Facets)>> {
    let mut by_key: BTreeMap<(String, String, String), Vec<(ConversationId, Facets)>> = BTreeMap::new();
    for member in members {
        let key = facet_key(&member.1, registry);
        by_key.entry(key).or_default().push(member);
    }
    by_key.into_values().collect()
}

fn fallback_groups(fallback: Vec<(ConversationId, Option<Facets>)>, registry: &SignatureRegistry) -> Vec<Vec<(ConversationId, Facets)>> {
    let mut by_key: BTreeMap<(String, String, String), Vec<(ConversationId, Facets)>> = BTreeMap::new();
    let mut singletons = Vec::new();
    for (conversation_id, facets) in fallback {
        match facets {
            Some(facets) => {
                let key = facet_key(&facets, registry);
                by_key.entry(key).or_default().push((conversation_id, facets));
            }
            None => singletons.push(vec![(conversation_id, placeholder_facets())]),
        }
    }
    let mut groups: Vec<_> = by_key.into_values().collect();
    groups.extend(singletons);
    groups
}

/// The sub-clustering key for one conversation's facets: its action type,
/// direction, and canonicalized product area.
fn facet_key(facets: &Facets, registry: &SignatureRegistry) -> (String, String, String) {
    (facets.action_type.clone(), facets.direction.clone(), registry.canonicalize("product_area", &facets.product_area_raw))
}

/// A minimal facet record for conversations with neither embedding nor
/// facets, so they still form a (singleton) candidate rather than vanish.
fn placeholder_facets() -> Facets {
    Facets {
        conversation_id: ConversationId::new(""),
        run_id: RunId::new(),
        action_type: "other".to_string(),
        direction: "neutral".to_string(),
        product_area_raw: String::new(),
        component_raw: String::new(),
        symptom: String::new(),
        resolution_action: None,
        root_cause: None,
        solution_provided: false,
        resolution_category: None,
    }
}

fn build_candidate(run_id: RunId, mut members: Vec<(ConversationId, Facets)>, registry: &SignatureRegistry) -> ClusterCandidate {
    members.sort_by(|a, b| a.0.cmp(&b.0));
    let action_type = members[0].1.action_type.clone();
    let direction = members[0].1.direction.clone();
    let product_area_canonical = majority_vote(members.iter().map(|(_, facets)| registry.canonicalize("product_area", &facets.product_area_raw)));
    let component_canonical = majority_vote(members.iter().map(|(_, facets)| registry.canonicalize("component", &facets.component_raw)));
    ClusterCandidate {
        cluster_id: ClusterId::new("pending"),
        run_id,
        conversation_ids: members.into_iter().map(|(id, _)| id).collect(),
        action_type,
        direction,
        product_area_canonical,
        component_canonical,
    }
}

fn majority_vote(values: impl Iterator<Item = String>) -> String {
    let mut counts: BTreeMap<String, u32> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map_or_else(String::new, |(value, _)| value)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test fixtures only")]

    use feedforward_core::canonicalize::AliasTable;
    use feedforward_core::canonicalize::SignatureRegistry;

    use super::cluster_for_run;
    use super::cosine_distance;

    fn embedding(run_id: feedforward_core::RunId, id: &str, vector: Vec<f32>) -> feedforward_core::Embedding {
        feedforward_core::Embedding {
            conversation_id: feedforward_core::ConversationId::new(id),
            run_id,
            vector,
            model_version: "test-model".to_string(),
        }
    }

    fn facets(run_id: feedforward_core::RunId, id: &str, action_type: &str, direction: &str, product_area: &str) -> feedforward_core::Facets {
        feedforward_core::Facets {
            conversation_id: feedforward_core::ConversationId::new(id),
            run_id,
            action_type: action_type.to_string(),
            direction: direction.to_string(),
            product_area_raw: product_area.to_string(),
            component_raw: "scheduler".to_string(),
            symptom: "pins".to_string(),
            resolution_action: None,
            root_cause: None,
            solution_provided: false,
            resolution_category: None,
        }
    }

    #[test]
    fn cosine_distance_of_identical_vectors_is_zero() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]) < 1e-6);
    }

    #[test]
    fn direction_splits_an_otherwise_similar_embedding_cluster() {
        let run_id = feedforward_core::RunId::new();
        let registry = SignatureRegistry::load(run_id, AliasTable::new());
        let inputs = vec![
            ("missing1".to_string(), embedding(run_id, "missing1", vec![1.0, 0.0]), facets(run_id, "missing1", "bug_report", "deficit", "scheduling")),
            ("missing2".to_string(), embedding(run_id, "missing2", vec![0.99, 0.01]), facets(run_id, "missing2", "bug_report", "deficit", "scheduling")),
            ("dup1".to_string(), embedding(run_id, "dup1", vec![0.98, 0.02]), facets(run_id, "dup1", "bug_report", "excess", "scheduling")),
            ("dup2".to_string(), embedding(run_id, "dup2", vec![0.97, 0.03]), facets(run_id, "dup2", "bug_report", "excess", "scheduling")),
        ];
        let prepared = inputs.into_iter().map(|(_, embedding, facets)| (embedding.conversation_id.clone(), Some(embedding), Some(facets))).collect();
        let candidates = cluster_for_run(run_id, prepared, &registry, 0.5);
        assert_eq!(candidates.len(), 2);
        let directions: std::collections::BTreeSet<_> = candidates.iter().map(|c| c.direction.clone()).collect();
        assert!(directions.contains("deficit"));
        assert!(directions.contains("excess"));
    }

    #[test]
    fn distinct_product_areas_split_an_otherwise_similar_embedding_cluster() {
        let run_id = feedforward_core::RunId::new();
        let registry = SignatureRegistry::load(run_id, AliasTable::new());
        let inputs = vec![
            ("legacy1".to_string(), embedding(run_id, "legacy1", vec![1.0, 0.0]), facets(run_id, "legacy1", "bug_report", "deficit", "legacy_publisher")),
            ("legacy2".to_string(), embedding(run_id, "legacy2", vec![1.0, 0.0]), facets(run_id, "legacy2", "bug_report", "deficit", "legacy_publisher")),
            ("multi1".to_string(), embedding(run_id, "multi1", vec![1.0, 0.0]), facets(run_id, "multi1", "bug_report", "deficit", "multi_network_scheduler")),
            ("multi2".to_string(), embedding(run_id, "multi2", vec![1.0, 0.0]), facets(run_id, "multi2", "bug_report", "deficit", "multi_network_scheduler")),
        ];
        let prepared = inputs.into_iter().map(|(_, embedding, facets)| (embedding.conversation_id.clone(), Some(embedding), Some(facets))).collect();
        let candidates = cluster_for_run(run_id, prepared, &registry, 0.5);
        assert_eq!(candidates.len(), 2, "identical text but distinct product areas must not merge into one cluster");
        let areas: std::collections::BTreeSet<_> = candidates.iter().map(|c| c.product_area_canonical.clone()).collect();
        assert_eq!(areas.len(), 2);
    }

    #[test]
    fn missing_embedding_routes_to_fallback_grouping() {
        let run_id = feedforward_core::RunId::new();
        let registry = SignatureRegistry::load(run_id, AliasTable::new());
        let inputs = vec![(feedforward_core::ConversationId::new("orphaned"), None, Some(facets(run_id, "orphaned", "bug_report", "deficit", "scheduling")))];
        let candidates = cluster_for_run(run_id, inputs, &registry, 0.5);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].conversation_ids.len(), 1);
    }

    #[test]
    fn clustering_is_deterministic_across_identical_runs() {
        let run_id = feedforward_core::RunId::new();
        let registry = SignatureRegistry::load(run_id, AliasTable::new());
        let build_inputs = || {
            vec![
                (feedforward_core::ConversationId::new("a"), Some(embedding(run_id, "a", vec![1.0, 0.0])), Some(facets(run_id, "a", "bug_report", "deficit", "scheduling"))),
                (feedforward_core::ConversationId::new("b"), Some(embedding(run_id, "b", vec![0.99, 0.01])), Some(facets(run_id, "b", "bug_report", "deficit", "scheduling"))),
            ]
        };
        let first = cluster_for_run(run_id, build_inputs(), &registry, 0.5);
        let second = cluster_for_run(run_id, build_inputs(), &registry, 0.5);
        assert_eq!(first, second);
    }
}
