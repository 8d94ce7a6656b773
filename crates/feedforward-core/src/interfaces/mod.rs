// feedforward-core/src/interfaces/mod.rs
// ============================================================================
// Module: FeedForward Interfaces
// Description: Backend-agnostic async interfaces for external collaborators.
// Purpose: Define the contract surfaces the orchestrator drives uniformly.
// Dependencies: async-trait, crate::core, crate::domain
// ============================================================================

//! ## Overview
//! Every external collaborator (ticketing source, LLM, embedding model,
//! persistent store) is modeled as one suspension point returning
//! structured data or a categorized error, never a bare exception. Traits
//! are `async` so the orchestrator can bound concurrency with a semaphore
//! and race every call against a caller-supplied timeout.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::ConversationId;
use crate::core::identifiers::OrphanId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::SignatureId;
use crate::core::time::Timestamp;
use crate::domain::ClassificationResult;
use crate::domain::ClusterCandidate;
use crate::domain::Conversation;
use crate::domain::Embedding;
use crate::domain::Facets;
use crate::domain::Orphan;
use crate::domain::PipelineRun;
use crate::domain::PmReviewVerdict;
use crate::domain::Story;

// ============================================================================
// SECTION: Ticketing Source
// ============================================================================

/// One page of conversation identifiers returned by a date-range search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationPage {
    /// Conversation IDs in this page.
    pub conversation_ids: Vec<ConversationId>,
    /// Opaque cursor for the next page, `None` once exhausted.
    pub next_cursor: Option<String>,
}

/// Errors surfaced by a [`TicketingSource`].
#[derive(Debug, Error)]
pub enum TicketingError {
    /// The source is rate-limiting requests; retry after the given duration.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Duration to wait before retrying, if the source provided one.
        retry_after: Option<Duration>,
    },
    /// A transient failure (5xx, timeout, connection reset); safe to retry.
    #[error("transient ticketing failure: {0}")]
    Transient(String),
    /// A permanent failure (4xx other than 429); aborts the run.
    #[error("permanent ticketing failure: {0}")]
    Permanent(String),
}

/// Paged date-range search plus per-conversation detail fetch.
#[async_trait]
pub trait TicketingSource: Send + Sync {
    /// Searches for conversations opened within `[since, until)`, returning
    /// one page starting at `cursor` (`None` for the first page).
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError`] on rate limiting or failure.
    async fn search(
        &self,
        since: Timestamp,
        until: Timestamp,
        cursor: Option<String>,
    ) -> Result<ConversationPage, TicketingError>;

    /// Fetches the full detail (messages) for one conversation.
    ///
    /// # Errors
    ///
    /// Returns [`TicketingError`] on rate limiting or failure.
    async fn fetch_detail(&self, id: &ConversationId) -> Result<Conversation, TicketingError>;
}

// ============================================================================
// SECTION: LLM Client
// ============================================================================

/// Errors surfaced by an [`LlmClient`] call.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// The call did not complete within its timeout.
    #[error("llm call timed out")]
    Timeout,
    /// The provider returned malformed output after one structured retry.
    #[error("malformed llm output: {0}")]
    Malformed(String),
    /// A transient provider failure; safe to retry.
    #[error("transient llm failure: {0}")]
    Transient(String),
}

/// Structured JSON chat-completion calls used throughout the pipeline.
///
/// Every method takes an explicit `timeout`; the orchestrator supplies the
/// configured default (30s for most calls) rather than the client baking in
/// its own.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Stage-1 fast routing classification over customer-facing content.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on timeout or malformed/transient failure.
    async fn classify_stage1(&self, customer_text: &str, timeout: Duration) -> Result<Value, LlmError>;

    /// Stage-2 refined classification over the full transcript.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on timeout or malformed/transient failure.
    async fn classify_stage2(&self, transcript: &str, timeout: Duration) -> Result<Value, LlmError>;

    /// Extracts facets (action type, direction, product area, component,
    /// symptom, and resolution/knowledge fields) in a single call.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on timeout or malformed/transient failure.
    async fn extract_facets(&self, transcript: &str, timeout: Duration) -> Result<Value, LlmError>;

    /// Judges whether one implementation would resolve every conversation
    /// in a proposed cluster, returning a verdict payload.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on timeout or malformed/transient failure.
    async fn pm_review(&self, cluster_summaries: &[String], timeout: Duration) -> Result<Value, LlmError>;

    /// Generates an INVEST-style story description from accumulated evidence.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] on timeout or malformed/transient failure.
    async fn generate_description(&self, evidence_excerpts: &[String], timeout: Duration) -> Result<String, LlmError>;
}

// ============================================================================
// SECTION: Embedding Client
// ============================================================================

/// Errors surfaced by an [`EmbeddingClient`] call.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The call did not complete within its timeout.
    #[error("embedding call timed out")]
    Timeout,
    /// A transient provider failure; safe to retry.
    #[error("transient embedding failure: {0}")]
    Transient(String),
}

/// Batch text-to-vector embedding.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embeds a batch of texts, returning one vector per input in order.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError`] on timeout or transient failure.
    async fn embed_batch(&self, texts: &[String], timeout: Duration) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Identifies the model/version these embeddings come from.
    fn model_version(&self) -> &str;
}

// ============================================================================
// SECTION: Run Store
// ============================================================================

/// Errors surfaced by a [`RunStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is unreachable (connection refused, I/O error); fatal.
    #[error("store unreachable: {0}")]
    Unreachable(String),
    /// The store's schema is missing, stale, or corrupt; fatal.
    #[error("store schema error: {0}")]
    Schema(String),
    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Persistence contract for every run-scoped and cross-run table.
///
/// # Invariants
/// - Every read method that accepts a `run_id` selects strictly by that
///   foreign key; no method may select by timestamp.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persists a run record (insert or update by `id`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn save_run(&self, run: &PipelineRun) -> Result<(), StoreError>;

    /// Loads a run record by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the run does not exist or persistence fails.
    async fn load_run(&self, id: RunId) -> Result<PipelineRun, StoreError>;

    /// Lists every run found in `Running` or `Stopping` state, used for
    /// restart recovery.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn list_active_runs(&self) -> Result<Vec<PipelineRun>, StoreError>;

    /// Persists a batch of conversations fetched for `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn save_conversations(&self, run_id: RunId, conversations: &[Conversation]) -> Result<(), StoreError>;

    /// Persists a batch of classification results for `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn save_classifications(&self, run_id: RunId, results: &[ClassificationResult]) -> Result<(), StoreError>;

    /// Persists a batch of embeddings for `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn save_embeddings(&self, run_id: RunId, embeddings: &[Embedding]) -> Result<(), StoreError>;

    /// Persists a batch of facets for `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn save_facets(&self, run_id: RunId, facets: &[Facets]) -> Result<(), StoreError>;

    /// Loads every embedding and facet pair recorded for `run_id`, keyed by
    /// conversation ID, for the clustering phase.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn load_embeddings_and_facets(
        &self,
        run_id: RunId,
    ) -> Result<Vec<(ConversationId, Option<Embedding>, Option<Facets>)>, StoreError>;

    /// Persists cluster candidates produced for `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn save_clusters(&self, run_id: RunId, clusters: &[ClusterCandidate]) -> Result<(), StoreError>;

    /// Persists a PM-review verdict for one cluster.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn save_pm_verdict(&self, verdict: &PmReviewVerdict) -> Result<(), StoreError>;

    /// Looks up an existing story by signature, for dedup-before-create.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn find_story_by_signature(&self, signature: &SignatureId) -> Result<Option<Story>, StoreError>;

    /// Persists a new or updated story.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn save_story(&self, story: &Story) -> Result<(), StoreError>;

    /// Lists every story created or updated in `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn list_run_stories(&self, run_id: RunId) -> Result<Vec<Story>, StoreError>;

    /// Looks up an existing orphan by signature, for cross-run accumulation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn find_orphan_by_signature(&self, signature: &SignatureId) -> Result<Option<Orphan>, StoreError>;

    /// Persists a new or updated orphan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn save_orphan(&self, orphan: &Orphan) -> Result<(), StoreError>;

    /// Deletes an orphan once it has been promoted to a story.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn delete_orphan(&self, id: OrphanId) -> Result<(), StoreError>;

    /// Loads the persistent alias table used for facet canonicalization.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn load_alias_table(&self) -> Result<Vec<(String, String, String)>, StoreError>;

    /// Commits new `(kind, raw, canonical)` aliases discovered this run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    async fn commit_aliases(&self, aliases: &[(String, String, String)]) -> Result<(), StoreError>;
}
