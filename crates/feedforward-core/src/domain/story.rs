// feedforward-core/src/domain/story.rs
// ============================================================================
// Module: Story
// Description: A persisted, cross-run-stable unit of actionable product work.
// Purpose: Hold the assembled signature, description, and evidence trail.
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ConversationId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SignatureId;
use crate::core::identifiers::StoryId;
use crate::core::time::Timestamp;

/// One conversation's contribution to a story's evidence trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryEvidence {
    /// The contributing conversation.
    pub conversation_id: ConversationId,
    /// A non-empty excerpt substantiating the story's description.
    pub excerpt: String,
    /// The run in which this evidence was attached.
    pub added_in_run: RunId,
}

/// An actionable unit of product work assembled from one or more coherent
/// clusters of conversations.
///
/// # Invariants
/// - `signature` is stable across runs for the same canonicalized facets,
///   product area, component, and issue slug, given unchanged model
///   versions; it is the key used to dedup against existing stories before
///   creating a new one.
/// - `evidence` is never empty; a story with no evidence could not have
///   passed the quality gate.
/// - `created_in_run` never changes after creation; `updated_at` and
///   `evidence` may grow on later runs that append matching conversations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    /// Persistent story identifier.
    pub id: StoryId,
    /// Stable cross-run signature, see [`crate::canonicalize::build_signature`].
    pub signature: SignatureId,
    /// The run that first created this story.
    pub created_in_run: RunId,
    /// Short human-readable label, derived from the majority-vote facets.
    pub title: String,
    /// Majority-vote raw product area, prior to canonicalization.
    pub product_area_raw: String,
    /// Set when `product_area_raw` was inferred by majority vote because the
    /// group's members disagreed on the raw product area, rather than all
    /// reporting the same raw value.
    pub product_area_raw_inferred: bool,
    /// Canonicalized product area.
    pub product_area_canonical: String,
    /// Majority-vote raw component, prior to canonicalization.
    pub component_raw: String,
    /// Set when `component_raw` was inferred by majority vote because the
    /// group's members disagreed on the raw component, rather than all
    /// reporting the same raw value.
    pub component_raw_inferred: bool,
    /// Canonicalized component.
    pub component_canonical: String,
    /// LLM-generated, INVEST-style description of the work.
    pub description: String,
    /// Confidence score in `[0, 100]` from the quality gate that admitted it.
    pub confidence_score: u8,
    /// Accumulated supporting evidence, one entry per contributing conversation.
    pub evidence: Vec<StoryEvidence>,
    /// When the story was first created.
    pub created_at: Timestamp,
    /// When the story was last modified (new evidence appended).
    pub updated_at: Timestamp,
}

impl Story {
    /// Appends evidence for a newly matched conversation rather than
    /// creating a duplicate story with the same signature.
    pub fn append_evidence(&mut self, evidence: StoryEvidence, now: Timestamp) {
        self.evidence.push(evidence);
        self.updated_at = now;
    }
}
