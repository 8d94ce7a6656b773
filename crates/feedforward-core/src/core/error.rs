// feedforward-core/src/core/error.rs
// ============================================================================
// Module: FeedForward Error Taxonomy
// Description: Shared error category and top-level pipeline error type.
// Purpose: Give every component a common vocabulary for `error_summary`.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every failure that can be attributed to a run is tagged with an
//! [`ErrorCategory`] so `error_summary` can report counts per category
//! instead of free-text logs. Component crates define their own error enums
//! and convert into [`PipelineError`] at the orchestrator boundary.

use thiserror::Error;

/// Stable category key attached to `error_summary` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCategory {
    /// A story or orphan candidate failed evidence validation.
    EvidenceInvalid,
    /// The PM-review gate timed out and fell back to `keep_together`.
    PmTimeout,
    /// An LLM call returned malformed output after the structured retry.
    LlmError,
    /// An external call was rate-limited past the retry budget.
    RateLimited,
    /// The run was cancelled before completing all phases.
    Cancelled,
}

impl ErrorCategory {
    /// Returns the stable snake_case key used in `error_summary`.
    #[must_use]
    pub const fn as_key(self) -> &'static str {
        match self {
            Self::EvidenceInvalid => "evidence_invalid",
            Self::PmTimeout => "pm_timeout",
            Self::LlmError => "llm_error",
            Self::RateLimited => "rate_limited",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Top-level error returned by orchestrator-facing operations.
///
/// # Invariants
/// - Every variant carries enough context to attribute the failure to a
///   category via [`PipelineError::category`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The requested run does not exist.
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// A collaborator call (ticketing, LLM, embeddings, store) failed.
    #[error("{category} during {operation}: {message}")]
    Collaborator {
        /// Error category attached to `error_summary`.
        category: &'static str,
        /// Human-readable operation name (e.g. `"classify_stage1"`).
        operation: &'static str,
        /// Underlying failure description.
        message: String,
    },

    /// The run's persistent store is unreachable or corrupt; fatal.
    #[error("store failure: {0}")]
    Store(String),

    /// The run was cancelled mid-phase.
    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Builds a collaborator-attributed error from a known category.
    #[must_use]
    pub fn collaborator(
        category: ErrorCategory,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Collaborator {
            category: category.as_key(),
            operation,
            message: message.into(),
        }
    }

    /// Returns the error category for `error_summary` attribution, if any.
    #[must_use]
    pub const fn category(&self) -> Option<&'static str> {
        match self {
            Self::Collaborator {
                category,
                ..
            } => Some(category),
            Self::Cancelled => Some(ErrorCategory::Cancelled.as_key()),
            Self::RunNotFound(_) | Self::Store(_) => None,
        }
    }
}
