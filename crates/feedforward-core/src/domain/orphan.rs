// feedforward-core/src/domain/orphan.rs
// ============================================================================
// Module: Orphan
// Description: A signature-matched group too small to become a story yet.
// Purpose: Accumulate evidence across runs until `MIN_GROUP_SIZE` is reached.
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::OrphanId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SignatureId;
use crate::core::time::Timestamp;
use crate::domain::story::StoryEvidence;

/// A cluster that passed evidence validation and the confidence threshold
/// but had fewer than `MIN_GROUP_SIZE` members, kept alive across runs under
/// its signature until it either crosses the threshold (and is promoted to
/// a [`crate::domain::story::Story`]) or never does.
///
/// # Invariants
/// - `evidence` accumulates across runs; it is never truncated.
/// - Promotion to a story happens the moment `evidence.len() >=
///   MIN_GROUP_SIZE`, using every accumulated evidence entry, not just the
///   entries from the promoting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orphan {
    /// Persistent orphan identifier.
    pub id: OrphanId,
    /// The signature this orphan accumulates evidence under.
    pub signature: SignatureId,
    /// The run that first created this orphan record.
    pub created_in_run: RunId,
    /// The most recent run that appended evidence to this orphan.
    pub last_updated_run: RunId,
    /// Accumulated evidence across all contributing runs.
    pub evidence: Vec<StoryEvidence>,
    /// When this orphan record was first created.
    pub created_at: Timestamp,
}

impl Orphan {
    /// Returns whether this orphan has accumulated enough evidence to be
    /// promoted to a story, given the configured minimum group size.
    #[must_use]
    pub fn crosses_threshold(&self, min_group_size: usize) -> bool {
        self.evidence.len() >= min_group_size
    }
}
