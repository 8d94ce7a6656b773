// feedforward-pipeline/src/quality_gate.rs
// ============================================================================
// Module: Quality Gate & Orphan Router
// Description: Evidence validation, confidence scoring, and size routing.
// Purpose: Decide whether a PM-reviewed group becomes a Story, an Orphan, or
//          a rejection, per the routing table in the story-assembly spec.
// Dependencies: feedforward-core, feedforward-config
// ============================================================================

//! ## Overview
//! Operates on one PM-reviewed subgroup at a time. Evidence validity is
//! checked first since an invalid group is rejected outright regardless of
//! its confidence score; a valid group is then scored and routed by size.
//! Missing signal (no embeddings, no facets) never disqualifies a group —
//! absent components score as fully uniform, since there is no evidence of
//! disagreement, not as zero.

use std::collections::HashMap;

use feedforward_config::QualityGateConfig;

use crate::cluster::cosine_distance;

/// One member's contribution to evidence validation and confidence scoring.
#[derive(Debug, Clone)]
pub struct GroupMember {
    /// A non-empty excerpt substantiating this member's inclusion.
    pub excerpt: String,
    /// The member's embedding vector, when one was produced for it.
    pub embedding: Option<Vec<f32>>,
    /// The member's facet action type, when facets were extracted.
    pub action_type: Option<String>,
    /// The member's facet direction, when facets were extracted.
    pub direction: Option<String>,
    /// The member's raw product area, when facets were extracted.
    pub product_area_raw: Option<String>,
    /// The member's raw component, when facets were extracted.
    pub component_raw: Option<String>,
    /// The member's symptom text, when facets were extracted.
    pub symptom: Option<String>,
    /// A platform key derived from the conversation's source, for
    /// uniformity scoring (e.g. the ticketing subdomain).
    pub platform_key: Option<String>,
}

/// The gate's routing decision for one group.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Evidence valid, score at or above threshold, size at or above the
    /// minimum: the group is promoted to a story.
    Story {
        /// The computed confidence score, in `[0, 100]`.
        confidence_score: u8,
    },
    /// Evidence valid and scored, but the group is too small to stand alone
    /// yet; it accumulates under its signature as an orphan.
    Orphan {
        /// The computed confidence score, in `[0, 100]`.
        confidence_score: u8,
        /// Whether this orphan route was caused by a below-threshold score
        /// rather than a below-minimum size, which also increments the
        /// caller's `quality_gate_rejections` counter.
        below_score_threshold: bool,
    },
    /// Evidence invalid: at least one sample lacked a non-placeholder ID or
    /// non-empty excerpt beyond the configured coverage tolerance.
    Reject,
}

/// Checks evidence validity, scores confidence, and routes by size.
#[must_use]
pub fn evaluate_group(members: &[GroupMember], config: &QualityGateConfig, min_group_size: usize) -> GateDecision {
    if !evidence_valid(members, config.evidence_coverage_threshold) {
        return GateDecision::Reject;
    }

    let score = confidence_score(members, config);
    if score < config.confidence_score_threshold {
        return GateDecision::Orphan { confidence_score: score, below_score_threshold: true };
    }

    if members.len() >= min_group_size {
        GateDecision::Story { confidence_score: score }
    } else {
        GateDecision::Orphan { confidence_score: score, below_score_threshold: false }
    }
}

/// A sample is valid when its excerpt is non-empty and not a recognized
/// placeholder string.
fn is_placeholder_excerpt(excerpt: &str) -> bool {
    let trimmed = excerpt.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") || trimmed.eq_ignore_ascii_case("n/a") || trimmed.eq_ignore_ascii_case("placeholder")
}

/// Whether the fraction of members with valid evidence meets `threshold`.
fn evidence_valid(members: &[GroupMember], threshold: f32) -> bool {
    if members.is_empty() {
        return false;
    }
    #[allow(clippy::cast_precision_loss, reason = "group sizes within one run never approach f32's integer precision limit")]
    let valid_fraction = members.iter().filter(|member| !is_placeholder_excerpt(&member.excerpt)).count() as f32 / members.len() as f32;
    valid_fraction >= threshold
}

/// Computes the weighted confidence score, in `[0, 100]`.
fn confidence_score(members: &[GroupMember], config: &QualityGateConfig) -> u8 {
    let weights = &config.confidence_weights;
    let unit_score = weights.embedding_similarity * embedding_similarity(members)
        + weights.intent_similarity * majority_fraction(members, |member| member.action_type.as_deref())
        + weights.intent_homogeneity * majority_fraction(members, |member| member.direction.as_deref())
        + weights.symptom_overlap * symptom_overlap(members)
        + weights.product_match * majority_fraction(members, |member| member.product_area_raw.as_deref())
        + weights.component_match * majority_fraction(members, |member| member.component_raw.as_deref())
        + weights.platform_uniformity * majority_fraction(members, |member| member.platform_key.as_deref());

    #[allow(clippy::cast_possible_truncation, reason = "unit_score is clamped to [0, 1] before scaling to [0, 100]")]
    let scaled = (unit_score.clamp(0.0, 1.0) * 100.0).round() as u8;
    scaled
}

/// Average pairwise cosine similarity among members with an embedding.
/// Neutral (1.0) when fewer than two embeddings are available to compare.
fn embedding_similarity(members: &[GroupMember]) -> f32 {
    let vectors: Vec<&Vec<f32>> = members.iter().filter_map(|member| member.embedding.as_ref()).collect();
    if vectors.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0_f32;
    let mut count = 0_u32;
    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            total += 1.0 - cosine_distance(vectors[i], vectors[j]);
            count += 1;
        }
    }
    #[allow(clippy::cast_precision_loss, reason = "pair counts within one run never approach f32's integer precision limit")]
    let average = total / count as f32;
    average
}

/// Fraction of members whose extracted field value (via `accessor`) matches
/// the field's most common value. Neutral (1.0) when no member carries the
/// field, since there is no disagreement to penalize.
fn majority_fraction<'a>(members: &'a [GroupMember], accessor: impl Fn(&'a GroupMember) -> Option<&'a str>) -> f32 {
    let values: Vec<&str> = members.iter().filter_map(|member| accessor(member)).collect();
    if values.is_empty() {
        return 1.0;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in &values {
        *counts.entry(value).or_insert(0) += 1;
    }
    let mode = counts.values().copied().max().unwrap_or(0);
    #[allow(clippy::cast_precision_loss, reason = "group sizes within one run never approach f32's integer precision limit")]
    let fraction = mode as f32 / values.len() as f32;
    fraction
}

/// Average pairwise Jaccard token overlap on `symptom` text. Neutral (1.0)
/// when fewer than two symptoms are available to compare.
fn symptom_overlap(members: &[GroupMember]) -> f32 {
    let token_sets: Vec<std::collections::HashSet<&str>> = members
        .iter()
        .filter_map(|member| member.symptom.as_deref())
        .map(|symptom| symptom.split_whitespace().collect())
        .collect();
    if token_sets.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0_f32;
    let mut count = 0_u32;
    for i in 0..token_sets.len() {
        for j in (i + 1)..token_sets.len() {
            let intersection = token_sets[i].intersection(&token_sets[j]).count();
            let union = token_sets[i].union(&token_sets[j]).count();
            total += if union == 0 { 0.0 } else { intersection as f32 / union as f32 };
            count += 1;
        }
    }
    #[allow(clippy::cast_precision_loss, reason = "pair counts within one run never approach f32's integer precision limit")]
    let average = total / count as f32;
    average
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test fixtures only")]

    use feedforward_config::QualityGateConfig;

    use super::GateDecision;
    use super::GroupMember;
    use super::evaluate_group;

    fn member(excerpt: &str) -> GroupMember {
        GroupMember {
            excerpt: excerpt.to_string(),
            embedding: None,
            action_type: Some("bug_report".to_string()),
            direction: Some("deficit".to_string()),
            product_area_raw: Some("pins".to_string()),
            component_raw: Some("board".to_string()),
            symptom: Some("pins missing".to_string()),
            platform_key: Some("web".to_string()),
        }
    }

    #[test]
    fn invalid_evidence_rejects_regardless_of_size() {
        let members = vec![member(""), member(""), member("real excerpt")];
        let config = QualityGateConfig::default();
        assert_eq!(evaluate_group(&members, &config, 3), GateDecision::Reject);
    }

    #[test]
    fn valid_uniform_group_above_min_size_becomes_a_story() {
        let members: Vec<GroupMember> = (0..3).map(|_| member("pins are missing from my board")).collect();
        let config = QualityGateConfig::default();
        match evaluate_group(&members, &config, 3) {
            GateDecision::Story { confidence_score } => assert!(confidence_score >= config.confidence_score_threshold),
            other => panic!("expected Story, got {other:?}"),
        }
    }

    #[test]
    fn valid_uniform_group_below_min_size_becomes_an_orphan() {
        let members: Vec<GroupMember> = (0..2).map(|_| member("pins are missing from my board")).collect();
        let config = QualityGateConfig::default();
        match evaluate_group(&members, &config, 3) {
            GateDecision::Orphan { below_score_threshold, .. } => assert!(!below_score_threshold),
            other => panic!("expected Orphan, got {other:?}"),
        }
    }

    #[test]
    fn low_confidence_group_is_orphaned_with_the_score_flag_set() {
        let mut members = vec![member("excerpt a"), member("excerpt b"), member("excerpt c")];
        for (index, member) in members.iter_mut().enumerate() {
            member.action_type = Some(format!("type-{index}"));
            member.direction = Some(format!("dir-{index}"));
            member.product_area_raw = Some(format!("area-{index}"));
            member.component_raw = Some(format!("component-{index}"));
            member.symptom = Some(format!("symptom-{index} unique-{index}"));
            member.platform_key = Some(format!("platform-{index}"));
        }
        let config = QualityGateConfig::default();
        match evaluate_group(&members, &config, 3) {
            GateDecision::Orphan { below_score_threshold, .. } => assert!(below_score_threshold),
            other => panic!("expected Orphan, got {other:?}"),
        }
    }
}
