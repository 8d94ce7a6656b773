// feedforward-pipeline/src/lib.rs
// ============================================================================
// Module: FeedForward Pipeline Library
// Description: Classification, clustering, PM review, quality gate, story
//              assembly, and run orchestration.
// Purpose: The components with no direct donor-crate counterpart; the
//          engine that turns `feedforward-core`'s domain model into runs.
// Dependencies: feedforward-core, feedforward-config, tokio
// ============================================================================

//! ## Overview
//! Each pipeline stage is a free function or small set of functions taking
//! borrowed collaborators and plain data, so every stage can be unit tested
//! in isolation with a scripted fake. [`orchestrator::PipelineOrchestrator`]
//! is the only piece that wires them together into a run.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod classify;
pub mod cluster;
pub mod extract;
pub mod orchestrator;
pub mod pm_review;
pub mod quality_gate;
pub mod story_assembler;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use classify::ClassifyOutcome;
pub use classify::classify_conversation;
pub use cluster::ClusterInput;
pub use cluster::cluster_for_run;
pub use extract::embed_conversations;
pub use extract::extract_facets;
pub use orchestrator::DryRunPreview;
pub use orchestrator::OrchestratorError;
pub use orchestrator::PipelineOrchestrator;
pub use pm_review::run_pm_review;
pub use quality_gate::GateDecision;
pub use quality_gate::GroupMember;
pub use quality_gate::evaluate_group;
pub use story_assembler::AssembledStory;
pub use story_assembler::GroupSignature;
pub use story_assembler::StoryMember;
pub use story_assembler::assemble_story;
pub use story_assembler::build_group_signature;

#[cfg(test)]
mod tests {
    //! Test-only lint relaxations for panic-based assertions and debug output.
    #![allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )]
}
