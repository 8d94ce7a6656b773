// feedforward-core/src/domain/classification.rs
// ============================================================================
// Module: Classification
// Description: Two-stage LLM classification result for one conversation.
// Purpose: Record routing type, actionability, and stage provenance.
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ConversationId;
use crate::core::identifiers::RunId;

/// The routing type assigned by classification.
///
/// `HowToQuestion` only ever appears as a stage-2 output: stage 1 sees only
/// the customer-facing message and cannot distinguish a how-to question from
/// a product issue until the support reply is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    /// A defect in the product.
    ProductIssue,
    /// A request for new or changed functionality.
    FeatureRequest,
    /// A question answerable without a product change.
    HowToQuestion,
    /// Not actionable support content (spam, off-topic, etc).
    Other,
}

impl ConversationType {
    /// Returns whether this type is eligible for clustering into a story
    /// without further stage confirmation.
    #[must_use]
    pub const fn is_story_eligible(self) -> bool {
        matches!(self, Self::ProductIssue | Self::FeatureRequest)
    }
}

/// Which classification pass produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStage {
    /// Fast routing pass over customer-facing content only.
    Stage1,
    /// Refined pass over the full transcript, once a support reply exists.
    Stage2,
}

/// The outcome of classifying one conversation at one stage.
///
/// # Invariants
/// - `classification_changed` is only meaningful on a `Stage2` result; it is
///   `false` by construction on `Stage1` results.
/// - A `Stage1` result is produced even when the corresponding LLM call
///   fails; in that case `conversation_type` defaults to [`ConversationType::Other`]
///   and `actionable` is `false` — classification failure never aborts the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// The conversation this result was produced for.
    pub conversation_id: ConversationId,
    /// The run this result belongs to.
    pub run_id: RunId,
    /// Which stage produced this result.
    pub stage: ClassificationStage,
    /// The assigned routing type.
    pub conversation_type: ConversationType,
    /// Whether this conversation warrants downstream embedding/clustering.
    pub actionable: bool,
    /// Model confidence in `[0.0, 1.0]`, if the model reported one.
    pub confidence: Option<f32>,
    /// True when stage 2 revised the stage-1 assignment.
    pub classification_changed: bool,
}

impl ClassificationResult {
    /// Returns whether this conversation should proceed to embedding and
    /// facet extraction, per the decision in `SPEC_FULL.md` §9.1: a
    /// stage-1-only conversation is eligible when its type is inherently
    /// confirmable without a support reply.
    #[must_use]
    pub fn is_pipeline_eligible(&self) -> bool {
        self.actionable
            && match self.stage {
                ClassificationStage::Stage1 => self.conversation_type.is_story_eligible(),
                ClassificationStage::Stage2 => true,
            }
    }
}
