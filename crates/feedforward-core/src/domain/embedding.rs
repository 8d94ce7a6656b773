// feedforward-core/src/domain/embedding.rs
// ============================================================================
// Module: Embedding & Facets
// Description: Vector embedding and LLM-extracted facets for one conversation.
// Purpose: Hold the two per-conversation inputs to hybrid clustering.
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ConversationId;
use crate::core::identifiers::RunId;

/// A dense embedding vector for one conversation, scoped to one run.
///
/// # Invariants
/// - `(conversation_id, run_id, model_version)` is an idempotency key: a
///   repeat extraction for the same key must yield a bit-identical vector
///   given a deterministic embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// The conversation this embedding represents.
    pub conversation_id: ConversationId,
    /// The run this embedding was produced for.
    pub run_id: RunId,
    /// The embedding vector.
    pub vector: Vec<f32>,
    /// Identifies the embedding model/version that produced `vector`.
    pub model_version: String,
}

/// LLM-extracted structured facets for one conversation.
///
/// Facets drive both sub-clustering (`action_type`, `direction`, and the
/// canonicalized `product_area_raw`) and signature construction (all fields).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facets {
    /// The conversation these facets describe.
    pub conversation_id: ConversationId,
    /// The run these facets were extracted for.
    pub run_id: RunId,
    /// What kind of action the customer is asking for (e.g. `"bug_report"`).
    pub action_type: String,
    /// The direction of the action (e.g. `"inbound"`, `"outbound"`).
    pub direction: String,
    /// Raw, model-reported product area, prior to canonicalization.
    pub product_area_raw: String,
    /// Raw, model-reported component, prior to canonicalization.
    pub component_raw: String,
    /// Short symptom description used for signature slug derivation.
    pub symptom: String,
    /// What action support took to resolve the conversation, if any.
    pub resolution_action: Option<String>,
    /// The underlying root cause, if the model could identify one.
    pub root_cause: Option<String>,
    /// Whether a concrete solution was provided to the customer.
    pub solution_provided: bool,
    /// Coarse resolution category (e.g. `"workaround"`, `"fixed"`, `"wontfix"`).
    pub resolution_category: Option<String>,
}
