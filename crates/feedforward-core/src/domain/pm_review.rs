// feedforward-core/src/domain/pm_review.rs
// ============================================================================
// Module: PM-Review Verdict
// Description: The LLM coherence judgment for one cluster candidate.
// Purpose: Carry split/keep/reject decisions and validated subgroups.
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ClusterId;
use crate::core::identifiers::ConversationId;
use crate::core::identifiers::RunId;

/// The PM-review gate's coherence judgment for a cluster candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PmVerdictKind {
    /// A single implementation would fix every conversation in the cluster.
    KeepTogether,
    /// The cluster bundles distinct issues; `subgroups` partitions it.
    Split,
    /// The cluster does not represent an actionable, coherent issue.
    Reject,
}

/// A validated PM-review verdict for one cluster candidate.
///
/// # Invariants
/// - When `kind` is [`PmVerdictKind::Split`], `subgroups` is a partition of
///   the input cluster's conversation IDs: every input ID appears in exactly
///   one subgroup, and no subgroup contains an ID absent from the input.
/// - When `kind` is [`PmVerdictKind::KeepTogether`] or
///   [`PmVerdictKind::Reject`], `subgroups` holds the full membership (for
///   `KeepTogether`) or is empty (for `Reject`).
/// - A 30-second LLM timeout is treated as [`PmVerdictKind::KeepTogether`]
///   with `fail_safe` set to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PmReviewVerdict {
    /// The cluster candidate this verdict was produced for.
    pub cluster_id: ClusterId,
    /// The run this verdict belongs to.
    pub run_id: RunId,
    /// The coherence judgment.
    pub kind: PmVerdictKind,
    /// Validated partition of conversation IDs (see invariants).
    pub subgroups: Vec<Vec<ConversationId>>,
    /// Free-text rationale from the reviewing model.
    pub rationale: String,
    /// True when this verdict is the 30-second-timeout fail-safe default
    /// rather than an actual model judgment.
    pub fail_safe: bool,
}
