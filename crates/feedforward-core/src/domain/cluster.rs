// feedforward-core/src/domain/cluster.rs
// ============================================================================
// Module: Cluster Candidate
// Description: A group of conversations proposed by hybrid clustering.
// Purpose: Carry cluster membership and enrichment into the PM-review gate.
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ClusterId;
use crate::core::identifiers::ConversationId;
use crate::core::identifiers::RunId;

/// A candidate grouping of conversations proposed by hybrid clustering,
/// awaiting PM-review coherence checking.
///
/// # Invariants
/// - `cluster_id` is unique and deterministic only within `run_id`; it must
///   never be compared or persisted across runs.
/// - `conversation_ids` is non-empty; singleton clusters are permitted into
///   PM review but cannot alone produce a [`crate::domain::story::Story`].
/// - `product_area_canonical`/`component_canonical` are the majority vote
///   across member conversations' facets, after canonicalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterCandidate {
    /// Run-scoped cluster identifier, deterministic given the same inputs.
    pub cluster_id: ClusterId,
    /// The run this candidate was produced for.
    pub run_id: RunId,
    /// Member conversations, sorted by `conversation_id` for determinism.
    pub conversation_ids: Vec<ConversationId>,
    /// The shared facet action type for this sub-cluster.
    pub action_type: String,
    /// The shared facet direction for this sub-cluster.
    pub direction: String,
    /// Majority-vote canonicalized product area across members.
    pub product_area_canonical: String,
    /// Majority-vote canonicalized component across members.
    pub component_canonical: String,
}

impl ClusterCandidate {
    /// Returns whether this candidate has only one member conversation.
    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.conversation_ids.len() == 1
    }
}
