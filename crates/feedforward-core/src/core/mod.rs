// feedforward-core/src/core/mod.rs
// ============================================================================
// Module: Core
// Description: Foundational types shared by every pipeline component.
// Purpose: Re-export identifiers, time, and the error taxonomy flatly.
// Dependencies: serde, thiserror, uuid
// ============================================================================

pub mod error;
pub mod identifiers;
/// Timestamp type used throughout the domain model.
pub mod time;

pub use error::ErrorCategory;
pub use error::PipelineError;
pub use identifiers::ClusterId;
pub use identifiers::ConversationId;
pub use identifiers::CorrelationId;
pub use identifiers::OrphanId;
pub use identifiers::RunId;
pub use identifiers::SignatureId;
pub use identifiers::StoryId;
pub use time::Timestamp;
