// feedforward-pipeline/src/pm_review.rs
// ============================================================================
// Module: PM-Review Gate
// Description: LLM coherence check plus post-hoc partition validation.
// Purpose: Decide whether a cluster candidate should be kept, split, or
//          rejected before it reaches the quality gate.
// Dependencies: feedforward-core, serde_json
// ============================================================================

//! ## Overview
//! Clusters with fewer than two members skip the LLM call entirely (there is
//! nothing to split) and are treated as `keep_together`. Every other verdict
//! returned by the model is validated against the cluster's own membership:
//! a verdict that fabricates, drops, or duplicates a conversation ID is
//! never trusted as-is, it is coerced back into a defensible shape rather
//! than propagated.

use std::collections::HashSet;
use std::time::Duration;

use feedforward_core::ClusterCandidate;
use feedforward_core::ConversationId;
use feedforward_core::LlmClient;
use feedforward_core::PmReviewVerdict;
use feedforward_core::PmVerdictKind;
use serde_json::Value;

/// Runs the PM-review gate for one cluster candidate.
///
/// Calls the model only when the cluster has two or more members; a
/// singleton is returned as `keep_together` without any LLM round trip.
pub async fn run_pm_review<L: LlmClient + ?Sized>(llm: &L, cluster: &ClusterCandidate, summaries: &[String], timeout: Duration) -> PmReviewVerdict {
    if cluster.is_singleton() {
        return PmReviewVerdict {
            cluster_id: cluster.cluster_id.clone(),
            run_id: cluster.run_id,
            kind: PmVerdictKind::KeepTogether,
            subgroups: vec![cluster.conversation_ids.clone()],
            rationale: "singleton cluster, PM review skipped".to_string(),
            fail_safe: false,
        };
    }

    match llm.pm_review(summaries, timeout).await {
        Ok(value) => validate(cluster, &value),
        Err(err) => {
            tracing::warn!(run_id = %cluster.run_id, cluster_id = %cluster.cluster_id, error = %err, "pm review failed, defaulting to keep_together");
            fail_safe_verdict(cluster)
        }
    }
}

/// Builds the fail-safe `keep_together` verdict used for timeouts, LLM
/// errors, and any validation failure severe enough to discard the
/// model's partition outright.
fn fail_safe_verdict(cluster: &ClusterCandidate) -> PmReviewVerdict {
    PmReviewVerdict {
        cluster_id: cluster.cluster_id.clone(),
        run_id: cluster.run_id,
        kind: PmVerdictKind::KeepTogether,
        subgroups: vec![cluster.conversation_ids.clone()],
        rationale: "fail-safe default".to_string(),
        fail_safe: true,
    }
}

/// Parses and validates a raw PM-review response against `cluster`'s actual
/// membership, coercing to a fail-safe verdict whenever the partition
/// cannot be repaired into a valid one.
fn validate(cluster: &ClusterCandidate, value: &Value) -> PmReviewVerdict {
    let rationale = value.get("rationale").and_then(Value::as_str).unwrap_or_default().to_string();
    let decision = value.get("decision").and_then(Value::as_str).unwrap_or("keep_together");

    if decision == "reject" {
        return PmReviewVerdict {
            cluster_id: cluster.cluster_id.clone(),
            run_id: cluster.run_id,
            kind: PmVerdictKind::Reject,
            subgroups: Vec::new(),
            rationale,
            fail_safe: false,
        };
    }

    if decision != "split" {
        return PmReviewVerdict {
            cluster_id: cluster.cluster_id.clone(),
            run_id: cluster.run_id,
            kind: PmVerdictKind::KeepTogether,
            subgroups: vec![cluster.conversation_ids.clone()],
            rationale,
            fail_safe: false,
        };
    }

    let raw_subgroups: Vec<Vec<ConversationId>> = value
        .get("subgroups")
        .and_then(Value::as_array)
        .map(|groups| {
            groups
                .iter()
                .map(|group| {
                    group
                        .as_array()
                        .map(|ids| ids.iter().filter_map(Value::as_str).map(ConversationId::new).collect())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default();

    match repair_partition(cluster, raw_subgroups) {
        Some(subgroups) => PmReviewVerdict {
            cluster_id: cluster.cluster_id.clone(),
            run_id: cluster.run_id,
            kind: PmVerdictKind::Split,
            subgroups,
            rationale,
            fail_safe: false,
        },
        None => fail_safe_verdict(cluster),
    }
}

/// Repairs a model-proposed partition so it covers exactly `cluster`'s
/// membership: fabricated IDs are dropped, and an ID assigned to more than
/// one subgroup is kept only in the first subgroup that names it (a
/// duplicate-assignment warning would be counted by the caller). Returns
/// `None` when, after these fixups, at least one input ID is missing from
/// every subgroup — that case cannot be repaired and must fail safe.
fn repair_partition(cluster: &ClusterCandidate, raw_subgroups: Vec<Vec<ConversationId>>) -> Option<Vec<Vec<ConversationId>>> {
    let valid_ids: HashSet<&ConversationId> = cluster.conversation_ids.iter().collect();
    let mut seen: HashSet<ConversationId> = HashSet::new();
    let mut repaired: Vec<Vec<ConversationId>> = Vec::new();

    for group in raw_subgroups {
        let mut kept = Vec::new();
        for id in group {
            if !valid_ids.contains(&id) {
                continue;
            }
            if seen.insert(id.clone()) {
                kept.push(id);
            }
        }
        if !kept.is_empty() {
            repaired.push(kept);
        }
    }

    if seen.len() == cluster.conversation_ids.len() {
        Some(repaired)
    } else {
        None
    }
}
