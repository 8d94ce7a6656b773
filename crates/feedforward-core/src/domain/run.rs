// feedforward-core/src/domain/run.rs
// ============================================================================
// Module: Pipeline Run
// Description: Run-scoped state machine, phase bookkeeping, and status view.
// Purpose: Give the orchestrator one authoritative record per run.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`PipelineRun`] is the root of run scoping: every other persisted
//! record is selected by `run_id`, never by timestamp. The state machine is
//! `Pending -> Running -> {Completed | Failed | Stopped}`, with
//! `Running -> Stopping -> {Stopped | Failed}` for cooperative cancellation.
//! Restart recovery transitions any run found in `Running` or `Stopping` at
//! process start to `Failed` with reason `"abandoned"`.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::RunId;
use crate::core::time::Timestamp;

/// The lifecycle state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created but not yet started.
    Pending,
    /// Actively executing phases.
    Running,
    /// Cancellation requested; draining in-flight calls up to their timeouts.
    Stopping,
    /// All phases completed normally.
    Completed,
    /// Cancellation completed; partial artifacts remain queryable.
    Stopped,
    /// The run aborted due to a fatal error or abandonment on restart.
    Failed,
}

impl RunState {
    /// Returns whether this state is a terminal state (no further
    /// transitions are possible).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    /// Returns whether `next` is a legal transition from `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Stopping)
                | (Self::Stopping, Self::Stopped)
                | (Self::Stopping, Self::Failed)
        )
    }
}

/// One ordered phase of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// C1: paging the ticketing source for conversations in the date range.
    Fetching,
    /// C2: two-stage classification.
    Classifying,
    /// C3: embedding extraction.
    Embedding,
    /// C3: facet extraction.
    Faceting,
    /// C4: hybrid clustering.
    Clustering,
    /// C5: PM-review coherence gate.
    PmReview,
    /// C6: quality gate and orphan routing.
    QualityGate,
    /// C7: story assembly.
    StoryCreation,
}

impl RunPhase {
    /// Returns all phases in execution order.
    #[must_use]
    pub const fn all() -> [Self; 8] {
        [
            Self::Fetching,
            Self::Classifying,
            Self::Embedding,
            Self::Faceting,
            Self::Clustering,
            Self::PmReview,
            Self::QualityGate,
            Self::StoryCreation,
        ]
    }
}

/// Timestamped record of one phase's execution for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseEvent {
    /// The phase this event describes.
    pub phase: RunPhase,
    /// When the phase began.
    pub started_at: Timestamp,
    /// When the phase ended, if it has.
    pub ended_at: Option<Timestamp>,
    /// Items successfully processed in this phase.
    pub processed_count: u32,
    /// Items that failed in this phase (never aborts the run by itself).
    pub failed_count: u32,
}

/// Counters for why a run produced fewer stories than a reader might expect.
///
/// Every key present has a value `> 0`; absent keys mean zero occurrences.
/// `SPEC_FULL.md` §9.1 requires that a run never report zero stories without
/// at least one populated category here.
pub type ErrorSummary = BTreeMap<&'static str, u32>;

/// The authoritative, persisted record for one pipeline run.
///
/// # Invariants
/// - `stories_ready` is `true` only once at least one story has actually
///   been created in *this* run; a run that only appended evidence to
///   existing stories via orphan promotion also counts, since a promotion
///   creates a new [`crate::domain::story::Story`] record.
/// - `phase_events` is append-only; phases are never replayed destructively.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineRun {
    /// The run identifier, the root of all run scoping.
    pub id: RunId,
    /// Current lifecycle state.
    pub state: RunState,
    /// The phase currently executing, if `state` is `Running` or `Stopping`.
    pub current_phase: Option<RunPhase>,
    /// History of phase starts/ends and per-phase counters.
    pub phase_events: Vec<PhaseEvent>,
    /// Whether this run only previews results without persisting stories.
    pub dry_run: bool,
    /// Whether quality-gate-passing candidates are auto-promoted to stories.
    pub auto_create_stories: bool,
    /// True once at least one story was created during this run.
    pub stories_ready: bool,
    /// Count of clusters that never grew past a single member.
    pub singleton_clusters: u32,
    /// Count of clusters routed to orphan accumulation this run.
    pub orphans_created: u32,
    /// Aggregated failure/rejection counts, keyed by stable category.
    pub error_summary: ErrorSummary,
    /// When the run was created.
    pub started_at: Timestamp,
    /// When the run reached a terminal state, if it has.
    pub ended_at: Option<Timestamp>,
}

impl PipelineRun {
    /// Creates a new, not-yet-started run record.
    #[must_use]
    pub fn new(dry_run: bool, auto_create_stories: bool) -> Self {
        Self {
            id: RunId::new(),
            state: RunState::Pending,
            current_phase: None,
            phase_events: Vec::new(),
            dry_run,
            auto_create_stories,
            stories_ready: false,
            singleton_clusters: 0,
            orphans_created: 0,
            error_summary: ErrorSummary::new(),
            started_at: Timestamp::now(),
            ended_at: None,
        }
    }

    /// Records one occurrence of `category` in the error summary.
    pub fn record_error(&mut self, category: &'static str) {
        *self.error_summary.entry(category).or_insert(0) += 1;
    }

    /// Transitions to `next`, rejecting illegal transitions.
    ///
    /// # Errors
    ///
    /// Returns an error message when `next` is not reachable from the
    /// current state.
    pub fn transition(&mut self, next: RunState) -> Result<(), String> {
        if !self.state.can_transition_to(next) {
            return Err(format!("illegal transition {:?} -> {next:?}", self.state));
        }
        self.state = next;
        if next.is_terminal() {
            self.ended_at = Some(Timestamp::now());
            self.current_phase = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineRun;
    use super::RunState;

    #[test]
    fn pending_cannot_jump_to_stopping() {
        let mut run = PipelineRun::new(false, true);
        assert!(run.transition(RunState::Stopping).is_err());
    }

    #[test]
    fn running_to_stopping_to_stopped_is_legal() {
        let mut run = PipelineRun::new(false, true);
        run.transition(RunState::Running).expect("start");
        run.transition(RunState::Stopping).expect("cancel");
        run.transition(RunState::Stopped).expect("drain");
        assert!(run.state.is_terminal());
        assert!(run.ended_at.is_some());
    }

    #[test]
    fn zero_stories_always_has_an_error_summary_entry_when_rejections_occurred() {
        let mut run = PipelineRun::new(false, true);
        run.record_error("evidence_invalid");
        assert!(!run.stories_ready);
        assert!(!run.error_summary.is_empty());
    }
}
