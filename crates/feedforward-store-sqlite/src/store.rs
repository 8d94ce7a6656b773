// feedforward-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Run Store
// Description: Durable `RunStore` backed by SQLite WAL.
// Purpose: Persist every run-scoped and cross-run table behind one
//          mutex-guarded connection, selecting strictly by `run_id`.
// Dependencies: feedforward-core, rusqlite, serde, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! Every write goes through one `SQLite` connection in WAL mode, guarded by
//! a [`Mutex`] and driven off the blocking thread pool via
//! `tokio::task::spawn_blocking`, since `rusqlite` has no async API of its
//! own. Composite fields (message lists, vectors, evidence trails,
//! subgroup partitions) are stored as JSON blobs; every column a query
//! filters or joins on is a plain typed column.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use feedforward_core::ClassificationResult;
use feedforward_core::ClusterCandidate;
use feedforward_core::Conversation;
use feedforward_core::ConversationId;
use feedforward_core::Embedding;
use feedforward_core::ErrorSummary;
use feedforward_core::Facets;
use feedforward_core::Orphan;
use feedforward_core::OrphanId;
use feedforward_core::PhaseEvent;
use feedforward_core::PipelineRun;
use feedforward_core::PmReviewVerdict;
use feedforward_core::RunId;
use feedforward_core::RunPhase;
use feedforward_core::RunState;
use feedforward_core::RunStore;
use feedforward_core::SignatureId;
use feedforward_core::Story;
use feedforward_core::StoreError;
use feedforward_core::Timestamp;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for this store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// Configuration for the `SQLite`-backed run store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors, convertible into [`StoreError`].
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error (file system, connection setup).
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Stored JSON failed to parse back into a domain type.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// The requested record does not exist.
    #[error("sqlite store not found: {0}")]
    NotFound(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Unreachable(message),
            SqliteStoreError::Db(message) => Self::Schema(message),
            SqliteStoreError::Invalid(message) => Self::Schema(message),
            SqliteStoreError::NotFound(message) => Self::NotFound(message),
        }
    }
}

fn join_error(_: tokio::task::JoinError) -> StoreError {
    StoreError::Unreachable("sqlite worker task panicked".to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed [`RunStore`] with WAL support.
#[derive(Clone)]
pub struct SqliteRunStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteRunStore {
    /// Opens a `SQLite`-backed run store, creating and migrating the
    /// schema if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, SqliteStoreError> + Send,
    {
        let guard =
            self.connection.lock().map_err(|_| StoreError::Unreachable("mutex poisoned".to_string()))?;
        f(&guard).map_err(StoreError::from)
    }
}

fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(connection)
}

fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(SCHEMA_DDL).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::Db(format!("unsupported schema version: {value}")));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))
}

const SCHEMA_DDL: &str = "
CREATE TABLE pipeline_runs (
    id TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    current_phase TEXT,
    phase_events_json TEXT NOT NULL,
    dry_run INTEGER NOT NULL,
    auto_create_stories INTEGER NOT NULL,
    stories_ready INTEGER NOT NULL,
    singleton_clusters INTEGER NOT NULL,
    orphans_created INTEGER NOT NULL,
    error_summary_json TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    ended_at INTEGER
);
CREATE TABLE conversations (
    run_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    source_url TEXT NOT NULL,
    opened_at INTEGER NOT NULL,
    customer_messages_json TEXT NOT NULL,
    support_messages_json TEXT NOT NULL,
    PRIMARY KEY (run_id, conversation_id)
);
CREATE TABLE classifications (
    run_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    stage TEXT NOT NULL,
    conversation_type TEXT NOT NULL,
    actionable INTEGER NOT NULL,
    confidence REAL,
    classification_changed INTEGER NOT NULL,
    PRIMARY KEY (run_id, conversation_id, stage)
);
CREATE TABLE embeddings (
    run_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    vector_json TEXT NOT NULL,
    model_version TEXT NOT NULL,
    PRIMARY KEY (run_id, conversation_id)
);
CREATE TABLE facets (
    run_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    action_type TEXT NOT NULL,
    direction TEXT NOT NULL,
    product_area_raw TEXT NOT NULL,
    component_raw TEXT NOT NULL,
    symptom TEXT NOT NULL,
    resolution_action TEXT,
    root_cause TEXT,
    solution_provided INTEGER NOT NULL,
    resolution_category TEXT,
    PRIMARY KEY (run_id, conversation_id)
);
CREATE TABLE clusters (
    run_id TEXT NOT NULL,
    cluster_id TEXT NOT NULL,
    conversation_ids_json TEXT NOT NULL,
    action_type TEXT NOT NULL,
    direction TEXT NOT NULL,
    product_area_canonical TEXT NOT NULL,
    component_canonical TEXT NOT NULL,
    PRIMARY KEY (run_id, cluster_id)
);
CREATE TABLE pm_verdicts (
    run_id TEXT NOT NULL,
    cluster_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    subgroups_json TEXT NOT NULL,
    rationale TEXT NOT NULL,
    fail_safe INTEGER NOT NULL,
    PRIMARY KEY (run_id, cluster_id)
);
CREATE TABLE stories (
    id TEXT PRIMARY KEY,
    signature TEXT NOT NULL UNIQUE,
    created_in_run TEXT NOT NULL,
    title TEXT NOT NULL,
    product_area_raw TEXT NOT NULL,
    product_area_raw_inferred INTEGER NOT NULL,
    product_area_canonical TEXT NOT NULL,
    component_raw TEXT NOT NULL,
    component_raw_inferred INTEGER NOT NULL,
    component_canonical TEXT NOT NULL,
    description TEXT NOT NULL,
    confidence_score INTEGER NOT NULL,
    evidence_json TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE story_touches (
    story_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    PRIMARY KEY (story_id, run_id)
);
CREATE TABLE orphans (
    id TEXT PRIMARY KEY,
    signature TEXT NOT NULL UNIQUE,
    created_in_run TEXT NOT NULL,
    last_updated_run TEXT NOT NULL,
    evidence_json TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE signature_aliases (
    kind TEXT NOT NULL,
    raw_key TEXT NOT NULL,
    canonical TEXT NOT NULL,
    PRIMARY KEY (kind, raw_key)
);
";

// ============================================================================
// SECTION: Row <-> Domain Mapping
// ============================================================================

fn phase_to_str(phase: RunPhase) -> &'static str {
    match phase {
        RunPhase::Fetching => "fetching",
        RunPhase::Classifying => "classifying",
        RunPhase::Embedding => "embedding",
        RunPhase::Faceting => "faceting",
        RunPhase::Clustering => "clustering",
        RunPhase::PmReview => "pm_review",
        RunPhase::QualityGate => "quality_gate",
        RunPhase::StoryCreation => "story_creation",
    }
}

fn phase_from_str(value: &str) -> Result<RunPhase, SqliteStoreError> {
    match value {
        "fetching" => Ok(RunPhase::Fetching),
        "classifying" => Ok(RunPhase::Classifying),
        "embedding" => Ok(RunPhase::Embedding),
        "faceting" => Ok(RunPhase::Faceting),
        "clustering" => Ok(RunPhase::Clustering),
        "pm_review" => Ok(RunPhase::PmReview),
        "quality_gate" => Ok(RunPhase::QualityGate),
        "story_creation" => Ok(RunPhase::StoryCreation),
        other => Err(SqliteStoreError::Invalid(format!("unknown run phase: {other}"))),
    }
}

fn state_to_str(state: RunState) -> &'static str {
    match state {
        RunState::Pending => "pending",
        RunState::Running => "running",
        RunState::Stopping => "stopping",
        RunState::Completed => "completed",
        RunState::Stopped => "stopped",
        RunState::Failed => "failed",
    }
}

fn state_from_str(value: &str) -> Result<RunState, SqliteStoreError> {
    match value {
        "pending" => Ok(RunState::Pending),
        "running" => Ok(RunState::Running),
        "stopping" => Ok(RunState::Stopping),
        "completed" => Ok(RunState::Completed),
        "stopped" => Ok(RunState::Stopped),
        "failed" => Ok(RunState::Failed),
        other => Err(SqliteStoreError::Invalid(format!("unknown run state: {other}"))),
    }
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, Option<String>, String, i64, i64, i64, i64, i64, String, i64, Option<i64>)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
    ))
}

fn build_run(
    row: (String, String, Option<String>, String, i64, i64, i64, i64, i64, String, i64, Option<i64>),
) -> Result<PipelineRun, SqliteStoreError> {
    let (id, state, current_phase, phase_events_json, dry_run, auto_create_stories, stories_ready, singleton_clusters, orphans_created, error_summary_json, started_at, ended_at) = row;
    let parsed_id =
        uuid::Uuid::parse_str(&id).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    let phase_events: Vec<PhaseEvent> = serde_json::from_str(&phase_events_json)
        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    let error_summary: ErrorSummary = parse_error_summary(&error_summary_json)?;
    Ok(PipelineRun {
        id: RunId::from_uuid(parsed_id),
        state: state_from_str(&state)?,
        current_phase: current_phase.map(|value| phase_from_str(&value)).transpose()?,
        phase_events,
        dry_run: dry_run != 0,
        auto_create_stories: auto_create_stories != 0,
        stories_ready: stories_ready != 0,
        singleton_clusters: u32::try_from(singleton_clusters).unwrap_or(0),
        orphans_created: u32::try_from(orphans_created).unwrap_or(0),
        error_summary,
        started_at: Timestamp::from_millis(started_at),
        ended_at: ended_at.map(Timestamp::from_millis),
    })
}

/// `error_summary`'s keys are `&'static str`; stored as a plain string-keyed
/// map and re-interned against the known category set on load.
fn parse_error_summary(raw: &str) -> Result<ErrorSummary, SqliteStoreError> {
    let parsed: std::collections::BTreeMap<String, u32> =
        serde_json::from_str(raw).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    let mut summary = ErrorSummary::new();
    for (key, count) in parsed {
        let interned = intern_category_key(&key)
            .ok_or_else(|| SqliteStoreError::Invalid(format!("unknown error category: {key}")))?;
        summary.insert(interned, count);
    }
    Ok(summary)
}

fn intern_category_key(key: &str) -> Option<&'static str> {
    match key {
        "evidence_invalid" => Some("evidence_invalid"),
        "pm_timeout" => Some("pm_timeout"),
        "llm_error" => Some("llm_error"),
        "rate_limited" => Some("rate_limited"),
        "cancelled" => Some("cancelled"),
        _ => None,
    }
}

// ============================================================================
// SECTION: RunStore Implementation
// ============================================================================

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn save_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let store = self.clone();
        let run = run.clone();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| {
                let phase_events_json = serde_json::to_string(&run.phase_events)
                    .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
                let error_summary_json = serde_json::to_string(&run.error_summary)
                    .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
                conn.execute(
                    "INSERT INTO pipeline_runs (
                        id, state, current_phase, phase_events_json, dry_run,
                        auto_create_stories, stories_ready, singleton_clusters,
                        orphans_created, error_summary_json, started_at, ended_at
                    ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
                    ON CONFLICT(id) DO UPDATE SET
                        state = excluded.state,
                        current_phase = excluded.current_phase,
                        phase_events_json = excluded.phase_events_json,
                        stories_ready = excluded.stories_ready,
                        singleton_clusters = excluded.singleton_clusters,
                        orphans_created = excluded.orphans_created,
                        error_summary_json = excluded.error_summary_json,
                        ended_at = excluded.ended_at",
                    params![
                        run.id.as_uuid().to_string(),
                        state_to_str(run.state),
                        run.current_phase.map(phase_to_str),
                        phase_events_json,
                        i64::from(run.dry_run),
                        i64::from(run.auto_create_stories),
                        i64::from(run.stories_ready),
                        i64::from(run.singleton_clusters),
                        i64::from(run.orphans_created),
                        error_summary_json,
                        run.started_at.as_millis(),
                        run.ended_at.map(|t| t.as_millis()),
                    ],
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                Ok(())
            })
        })
        .await
        .map_err(join_error)?
    }

    async fn load_run(&self, id: RunId) -> Result<PipelineRun, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| {
                let row = conn
                    .query_row(
                        "SELECT id, state, current_phase, phase_events_json, dry_run,
                                auto_create_stories, stories_ready, singleton_clusters,
                                orphans_created, error_summary_json, started_at, ended_at
                         FROM pipeline_runs WHERE id = ?1",
                        params![id.as_uuid().to_string()],
                        run_from_row,
                    )
                    .optional()
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                let row = row.ok_or_else(|| SqliteStoreError::NotFound(id.to_string()))?;
                build_run(row)
            })
        })
        .await
        .map_err(join_error)?
    }

    async fn list_active_runs(&self) -> Result<Vec<PipelineRun>, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, state, current_phase, phase_events_json, dry_run,
                                auto_create_stories, stories_ready, singleton_clusters,
                                orphans_created, error_summary_json, started_at, ended_at
                         FROM pipeline_runs WHERE state IN ('running', 'stopping')",
                    )
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                let rows = stmt
                    .query_map(params![], run_from_row)
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                rows.map(|row| row.map_err(|err| SqliteStoreError::Db(err.to_string())).and_then(build_run))
                    .collect()
            })
        })
        .await
        .map_err(join_error)?
    }

    async fn save_conversations(&self, run_id: RunId, conversations: &[Conversation]) -> Result<(), StoreError> {
        let store = self.clone();
        let conversations = conversations.to_vec();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| {
                for conversation in &conversations {
                    let customer_json = serde_json::to_string(&conversation.customer_messages)
                        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
                    let support_json = serde_json::to_string(&conversation.support_messages)
                        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
                    conn.execute(
                        "INSERT INTO conversations (
                            run_id, conversation_id, source_url, opened_at,
                            customer_messages_json, support_messages_json
                        ) VALUES (?1,?2,?3,?4,?5,?6)
                        ON CONFLICT(run_id, conversation_id) DO UPDATE SET
                            source_url = excluded.source_url,
                            opened_at = excluded.opened_at,
                            customer_messages_json = excluded.customer_messages_json,
                            support_messages_json = excluded.support_messages_json",
                        params![
                            run_id.as_uuid().to_string(),
                            conversation.id.as_str(),
                            conversation.source_url,
                            conversation.opened_at.as_millis(),
                            customer_json,
                            support_json,
                        ],
                    )
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                }
                Ok(())
            })
        })
        .await
        .map_err(join_error)?
    }

    async fn save_classifications(&self, run_id: RunId, results: &[ClassificationResult]) -> Result<(), StoreError> {
        let store = self.clone();
        let results = results.to_vec();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| {
                for result in &results {
                    let stage = match result.stage {
                        feedforward_core::ClassificationStage::Stage1 => "stage1",
                        feedforward_core::ClassificationStage::Stage2 => "stage2",
                    };
                    let conversation_type = match result.conversation_type {
                        feedforward_core::ConversationType::ProductIssue => "product_issue",
                        feedforward_core::ConversationType::FeatureRequest => "feature_request",
                        feedforward_core::ConversationType::HowToQuestion => "how_to_question",
                        feedforward_core::ConversationType::Other => "other",
                    };
                    conn.execute(
                        "INSERT INTO classifications (
                            run_id, conversation_id, stage, conversation_type,
                            actionable, confidence, classification_changed
                        ) VALUES (?1,?2,?3,?4,?5,?6,?7)
                        ON CONFLICT(run_id, conversation_id, stage) DO UPDATE SET
                            conversation_type = excluded.conversation_type,
                            actionable = excluded.actionable,
                            confidence = excluded.confidence,
                            classification_changed = excluded.classification_changed",
                        params![
                            run_id.as_uuid().to_string(),
                            result.conversation_id.as_str(),
                            stage,
                            conversation_type,
                            i64::from(result.actionable),
                            result.confidence,
                            i64::from(result.classification_changed),
                        ],
                    )
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                }
                Ok(())
            })
        })
        .await
        .map_err(join_error)?
    }

    async fn save_embeddings(&self, run_id: RunId, embeddings: &[Embedding]) -> Result<(), StoreError> {
        let store = self.clone();
        let embeddings = embeddings.to_vec();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| {
                for embedding in &embeddings {
                    let vector_json = serde_json::to_string(&embedding.vector)
                        .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
                    conn.execute(
                        "INSERT INTO embeddings (run_id, conversation_id, vector_json, model_version)
                         VALUES (?1,?2,?3,?4)
                         ON CONFLICT(run_id, conversation_id) DO UPDATE SET
                            vector_json = excluded.vector_json,
                            model_version = excluded.model_version",
                        params![
                            run_id.as_uuid().to_string(),
                            embedding.conversation_id.as_str(),
                            vector_json,
                            embedding.model_version,
                        ],
                    )
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                }
                Ok(())
            })
        })
        .await
        .map_err(join_error)?
    }

    async fn save_facets(&self, run_id: RunId, facets: &[Facets]) -> Result<(), StoreError> {
        let store = self.clone();
        let facets = facets.to_vec();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| {
                for facet in &facets {
                    conn.execute(
                        "INSERT INTO facets (
                            run_id, conversation_id, action_type, direction,
                            product_area_raw, component_raw, symptom,
                            resolution_action, root_cause, solution_provided, resolution_category
                        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
                        ON CONFLICT(run_id, conversation_id) DO UPDATE SET
                            action_type = excluded.action_type,
                            direction = excluded.direction,
                            product_area_raw = excluded.product_area_raw,
                            component_raw = excluded.component_raw,
                            symptom = excluded.symptom,
                            resolution_action = excluded.resolution_action,
                            root_cause = excluded.root_cause,
                            solution_provided = excluded.solution_provided,
                            resolution_category = excluded.resolution_category",
                        params![
                            run_id.as_uuid().to_string(),
                            facet.conversation_id.as_str(),
                            facet.action_type,
                            facet.direction,
                            facet.product_area_raw,
                            facet.component_raw,
                            facet.symptom,
                            facet.resolution_action,
                            facet.root_cause,
                            i64::from(facet.solution_provided),
                            facet.resolution_category,
                        ],
                    )
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                }
                Ok(())
            })
        })
        .await
        .map_err(join_error)?
    }

    async fn load_embeddings_and_facets(
        &self,
        run_id: RunId,
    ) -> Result<Vec<(ConversationId, Option<Embedding>, Option<Facets>)>, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| load_embeddings_and_facets_sync(conn, run_id))
        })
        .await
        .map_err(join_error)?
    }

    async fn save_clusters(&self, run_id: RunId, clusters: &[ClusterCandidate]) -> Result<(), StoreError> {
        let store = self.clone();
        let clusters = clusters.to_vec();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| {
                for cluster in &clusters {
                    let ids_json = serde_json::to_string(
                        &cluster.conversation_ids.iter().map(ConversationId::as_str).collect::<Vec<_>>(),
                    )
                    .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
                    conn.execute(
                        "INSERT INTO clusters (
                            run_id, cluster_id, conversation_ids_json, action_type,
                            direction, product_area_canonical, component_canonical
                        ) VALUES (?1,?2,?3,?4,?5,?6,?7)
                        ON CONFLICT(run_id, cluster_id) DO UPDATE SET
                            conversation_ids_json = excluded.conversation_ids_json,
                            action_type = excluded.action_type,
                            direction = excluded.direction,
                            product_area_canonical = excluded.product_area_canonical,
                            component_canonical = excluded.component_canonical",
                        params![
                            run_id.as_uuid().to_string(),
                            cluster.cluster_id.as_str(),
                            ids_json,
                            cluster.action_type,
                            cluster.direction,
                            cluster.product_area_canonical,
                            cluster.component_canonical,
                        ],
                    )
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                }
                Ok(())
            })
        })
        .await
        .map_err(join_error)?
    }

    async fn save_pm_verdict(&self, verdict: &PmReviewVerdict) -> Result<(), StoreError> {
        let store = self.clone();
        let verdict = verdict.clone();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| {
                let kind = match verdict.kind {
                    feedforward_core::PmVerdictKind::KeepTogether => "keep_together",
                    feedforward_core::PmVerdictKind::Split => "split",
                    feedforward_core::PmVerdictKind::Reject => "reject",
                };
                let subgroups: Vec<Vec<&str>> = verdict
                    .subgroups
                    .iter()
                    .map(|group| group.iter().map(ConversationId::as_str).collect())
                    .collect();
                let subgroups_json = serde_json::to_string(&subgroups)
                    .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
                conn.execute(
                    "INSERT INTO pm_verdicts (run_id, cluster_id, kind, subgroups_json, rationale, fail_safe)
                     VALUES (?1,?2,?3,?4,?5,?6)
                     ON CONFLICT(run_id, cluster_id) DO UPDATE SET
                        kind = excluded.kind,
                        subgroups_json = excluded.subgroups_json,
                        rationale = excluded.rationale,
                        fail_safe = excluded.fail_safe",
                    params![
                        verdict.run_id.as_uuid().to_string(),
                        verdict.cluster_id.as_str(),
                        kind,
                        subgroups_json,
                        verdict.rationale,
                        i64::from(verdict.fail_safe),
                    ],
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                Ok(())
            })
        })
        .await
        .map_err(join_error)?
    }

    async fn find_story_by_signature(&self, signature: &SignatureId) -> Result<Option<Story>, StoreError> {
        let store = self.clone();
        let signature = signature.clone();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| find_story_by_signature_sync(conn, &signature))
        })
        .await
        .map_err(join_error)?
    }

    async fn save_story(&self, story: &Story) -> Result<(), StoreError> {
        let store = self.clone();
        let story = story.clone();
        tokio::task::spawn_blocking(move || store.with_connection(|conn| save_story_sync(conn, &story)))
            .await
            .map_err(join_error)?
    }

    async fn list_run_stories(&self, run_id: RunId) -> Result<Vec<Story>, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| list_run_stories_sync(conn, run_id))
        })
        .await
        .map_err(join_error)?
    }

    async fn find_orphan_by_signature(&self, signature: &SignatureId) -> Result<Option<Orphan>, StoreError> {
        let store = self.clone();
        let signature = signature.clone();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| find_orphan_by_signature_sync(conn, &signature))
        })
        .await
        .map_err(join_error)?
    }

    async fn save_orphan(&self, orphan: &Orphan) -> Result<(), StoreError> {
        let store = self.clone();
        let orphan = orphan.clone();
        tokio::task::spawn_blocking(move || store.with_connection(|conn| save_orphan_sync(conn, &orphan)))
            .await
            .map_err(join_error)?
    }

    async fn delete_orphan(&self, id: OrphanId) -> Result<(), StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| {
                conn.execute("DELETE FROM orphans WHERE id = ?1", params![id.as_uuid().to_string()])
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                Ok(())
            })
        })
        .await
        .map_err(join_error)?
    }

    async fn load_alias_table(&self) -> Result<Vec<(String, String, String)>, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| {
                let mut stmt = conn
                    .prepare("SELECT kind, raw_key, canonical FROM signature_aliases")
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                let rows = stmt
                    .query_map(params![], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                    })
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                rows.map(|row| row.map_err(|err| SqliteStoreError::Db(err.to_string()))).collect()
            })
        })
        .await
        .map_err(join_error)?
    }

    async fn commit_aliases(&self, aliases: &[(String, String, String)]) -> Result<(), StoreError> {
        let store = self.clone();
        let aliases = aliases.to_vec();
        tokio::task::spawn_blocking(move || {
            store.with_connection(|conn| {
                for (kind, raw_key, canonical) in &aliases {
                    conn.execute(
                        "INSERT INTO signature_aliases (kind, raw_key, canonical) VALUES (?1,?2,?3)
                         ON CONFLICT(kind, raw_key) DO UPDATE SET canonical = excluded.canonical",
                        params![kind, raw_key, canonical],
                    )
                    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
                }
                Ok(())
            })
        })
        .await
        .map_err(join_error)?
    }
}

// ============================================================================
// SECTION: Synchronous Helpers (run on the blocking pool)
// ============================================================================

fn load_embeddings_and_facets_sync(
    conn: &Connection,
    run_id: RunId,
) -> Result<Vec<(ConversationId, Option<Embedding>, Option<Facets>)>, SqliteStoreError> {
    let run_str = run_id.as_uuid().to_string();
    let mut conversation_ids = std::collections::BTreeSet::new();

    let mut embed_stmt = conn
        .prepare("SELECT conversation_id, vector_json, model_version FROM embeddings WHERE run_id = ?1")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let embeddings: Vec<(String, Embedding)> = embed_stmt
        .query_map(params![run_str], |row| {
            let conversation_id: String = row.get(0)?;
            let vector_json: String = row.get(1)?;
            let model_version: String = row.get(2)?;
            Ok((conversation_id, vector_json, model_version))
        })
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        .map(|row| {
            let (conversation_id, vector_json, model_version) =
                row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let vector: Vec<f32> = serde_json::from_str(&vector_json)
                .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
            conversation_ids.insert(conversation_id.clone());
            Ok((
                conversation_id.clone(),
                Embedding {
                    conversation_id: ConversationId::new(conversation_id),
                    run_id,
                    vector,
                    model_version,
                },
            ))
        })
        .collect::<Result<Vec<_>, SqliteStoreError>>()?;

    let mut facet_stmt = conn
        .prepare(
            "SELECT conversation_id, action_type, direction, product_area_raw, component_raw,
                    symptom, resolution_action, root_cause, solution_provided, resolution_category
             FROM facets WHERE run_id = ?1",
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let facets: Vec<(String, Facets)> = facet_stmt
        .query_map(params![run_str], |row| {
            let conversation_id: String = row.get(0)?;
            let action_type: String = row.get(1)?;
            let direction: String = row.get(2)?;
            let product_area_raw: String = row.get(3)?;
            let component_raw: String = row.get(4)?;
            let symptom: String = row.get(5)?;
            let resolution_action: Option<String> = row.get(6)?;
            let root_cause: Option<String> = row.get(7)?;
            let solution_provided: i64 = row.get(8)?;
            let resolution_category: Option<String> = row.get(9)?;
            Ok((
                conversation_id,
                action_type,
                direction,
                product_area_raw,
                component_raw,
                symptom,
                resolution_action,
                root_cause,
                solution_provided,
                resolution_category,
            ))
        })
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        .map(|row| {
            let (
                conversation_id,
                action_type,
                direction,
                product_area_raw,
                component_raw,
                symptom,
                resolution_action,
                root_cause,
                solution_provided,
                resolution_category,
            ) = row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            conversation_ids.insert(conversation_id.clone());
            Ok((
                conversation_id.clone(),
                Facets {
                    conversation_id: ConversationId::new(conversation_id),
                    run_id,
                    action_type,
                    direction,
                    product_area_raw,
                    component_raw,
                    symptom,
                    resolution_action,
                    root_cause,
                    solution_provided: solution_provided != 0,
                    resolution_category,
                },
            ))
        })
        .collect::<Result<Vec<_>, SqliteStoreError>>()?;

    let embeddings_by_id: std::collections::BTreeMap<String, Embedding> = embeddings.into_iter().collect();
    let facets_by_id: std::collections::BTreeMap<String, Facets> = facets.into_iter().collect();

    Ok(conversation_ids
        .into_iter()
        .map(|id| {
            let embedding = embeddings_by_id.get(&id).cloned();
            let facet = facets_by_id.get(&id).cloned();
            (ConversationId::new(id), embedding, facet)
        })
        .collect())
}

fn story_evidence_from_json(raw: &str) -> Result<Vec<feedforward_core::StoryEvidence>, SqliteStoreError> {
    serde_json::from_str(raw).map_err(|err| SqliteStoreError::Invalid(err.to_string()))
}

#[allow(clippy::too_many_arguments, reason = "mirrors the stories table's column order")]
fn build_story(
    id: String,
    signature: String,
    created_in_run: String,
    title: String,
    product_area_raw: String,
    product_area_raw_inferred: i64,
    product_area_canonical: String,
    component_raw: String,
    component_raw_inferred: i64,
    component_canonical: String,
    description: String,
    confidence_score: i64,
    evidence_json: String,
    created_at: i64,
    updated_at: i64,
) -> Result<Story, SqliteStoreError> {
    let parsed_id = uuid::Uuid::parse_str(&id).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    let created_in_run_uuid =
        uuid::Uuid::parse_str(&created_in_run).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    Ok(Story {
        id: feedforward_core::StoryId::from_uuid(parsed_id),
        signature: SignatureId::new(signature),
        created_in_run: RunId::from_uuid(created_in_run_uuid),
        title,
        product_area_raw,
        product_area_raw_inferred: product_area_raw_inferred != 0,
        product_area_canonical,
        component_raw,
        component_raw_inferred: component_raw_inferred != 0,
        component_canonical,
        description,
        confidence_score: u8::try_from(confidence_score).unwrap_or(0),
        evidence: story_evidence_from_json(&evidence_json)?,
        created_at: Timestamp::from_millis(created_at),
        updated_at: Timestamp::from_millis(updated_at),
    })
}

fn find_story_by_signature_sync(
    conn: &Connection,
    signature: &SignatureId,
) -> Result<Option<Story>, SqliteStoreError> {
    let row = conn
        .query_row(
            "SELECT id, signature, created_in_run, title, product_area_raw, product_area_raw_inferred,
                    product_area_canonical, component_raw, component_raw_inferred, component_canonical,
                    description, confidence_score, evidence_json, created_at, updated_at
             FROM stories WHERE signature = ?1",
            params![signature.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, i64>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, i64>(11)?,
                    row.get::<_, String>(12)?,
                    row.get::<_, i64>(13)?,
                    row.get::<_, i64>(14)?,
                ))
            },
        )
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    row.map(
        |(
            id,
            signature,
            created_in_run,
            title,
            area_raw,
            area_raw_inferred,
            area,
            component_raw,
            component_raw_inferred,
            component,
            description,
            score,
            evidence_json,
            created_at,
            updated_at,
        )| {
            build_story(
                id,
                signature,
                created_in_run,
                title,
                area_raw,
                area_raw_inferred,
                area,
                component_raw,
                component_raw_inferred,
                component,
                description,
                score,
                evidence_json,
                created_at,
                updated_at,
            )
        },
    )
    .transpose()
}

fn save_story_sync(conn: &Connection, story: &Story) -> Result<(), SqliteStoreError> {
    let evidence_json =
        serde_json::to_string(&story.evidence).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    conn.execute(
        "INSERT INTO stories (
            id, signature, created_in_run, title, product_area_raw, product_area_raw_inferred,
            product_area_canonical, component_raw, component_raw_inferred, component_canonical,
            description, confidence_score, evidence_json, created_at, updated_at
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            product_area_raw = excluded.product_area_raw,
            product_area_raw_inferred = excluded.product_area_raw_inferred,
            component_raw = excluded.component_raw,
            component_raw_inferred = excluded.component_raw_inferred,
            description = excluded.description,
            confidence_score = excluded.confidence_score,
            evidence_json = excluded.evidence_json,
            updated_at = excluded.updated_at",
        params![
            story.id.as_uuid().to_string(),
            story.signature.as_str(),
            story.created_in_run.as_uuid().to_string(),
            story.title,
            story.product_area_raw,
            i64::from(story.product_area_raw_inferred),
            story.product_area_canonical,
            story.component_raw,
            i64::from(story.component_raw_inferred),
            story.component_canonical,
            story.description,
            i64::from(story.confidence_score),
            evidence_json,
            story.created_at.as_millis(),
            story.updated_at.as_millis(),
        ],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

    let mut touched_runs: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    touched_runs.insert(story.created_in_run.as_uuid().to_string());
    for evidence in &story.evidence {
        touched_runs.insert(evidence.added_in_run.as_uuid().to_string());
    }
    for run_id in touched_runs {
        conn.execute(
            "INSERT OR IGNORE INTO story_touches (story_id, run_id) VALUES (?1, ?2)",
            params![story.id.as_uuid().to_string(), run_id],
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    }
    Ok(())
}

fn list_run_stories_sync(conn: &Connection, run_id: RunId) -> Result<Vec<Story>, SqliteStoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.signature, s.created_in_run, s.title, s.product_area_raw,
                    s.product_area_raw_inferred, s.product_area_canonical, s.component_raw,
                    s.component_raw_inferred, s.component_canonical, s.description,
                    s.confidence_score, s.evidence_json, s.created_at, s.updated_at
             FROM stories s
             JOIN story_touches t ON t.story_id = s.id
             WHERE t.run_id = ?1
             ORDER BY s.created_at",
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let rows = stmt
        .query_map(params![run_id.as_uuid().to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, i64>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, i64>(11)?,
                row.get::<_, String>(12)?,
                row.get::<_, i64>(13)?,
                row.get::<_, i64>(14)?,
            ))
        })
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    rows.map(|row| {
        let (
            id,
            signature,
            created_in_run,
            title,
            area_raw,
            area_raw_inferred,
            area,
            component_raw,
            component_raw_inferred,
            component,
            description,
            score,
            evidence_json,
            created_at,
            updated_at,
        ) = row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        build_story(
            id,
            signature,
            created_in_run,
            title,
            area_raw,
            area_raw_inferred,
            area,
            component_raw,
            component_raw_inferred,
            component,
            description,
            score,
            evidence_json,
            created_at,
            updated_at,
        )
    })
    .collect()
}

fn build_orphan(
    id: String,
    signature: String,
    created_in_run: String,
    last_updated_run: String,
    evidence_json: String,
    created_at: i64,
) -> Result<Orphan, SqliteStoreError> {
    let parsed_id = uuid::Uuid::parse_str(&id).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    let created_uuid =
        uuid::Uuid::parse_str(&created_in_run).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    let updated_uuid =
        uuid::Uuid::parse_str(&last_updated_run).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    Ok(Orphan {
        id: OrphanId::from_uuid(parsed_id),
        signature: SignatureId::new(signature),
        created_in_run: RunId::from_uuid(created_uuid),
        last_updated_run: RunId::from_uuid(updated_uuid),
        evidence: story_evidence_from_json(&evidence_json)?,
        created_at: Timestamp::from_millis(created_at),
    })
}

fn find_orphan_by_signature_sync(
    conn: &Connection,
    signature: &SignatureId,
) -> Result<Option<Orphan>, SqliteStoreError> {
    let row = conn
        .query_row(
            "SELECT id, signature, created_in_run, last_updated_run, evidence_json, created_at
             FROM orphans WHERE signature = ?1",
            params![signature.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    row.map(|(id, signature, created_in_run, last_updated_run, evidence_json, created_at)| {
        build_orphan(id, signature, created_in_run, last_updated_run, evidence_json, created_at)
    })
    .transpose()
}

fn save_orphan_sync(conn: &Connection, orphan: &Orphan) -> Result<(), SqliteStoreError> {
    let evidence_json =
        serde_json::to_string(&orphan.evidence).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    conn.execute(
        "INSERT INTO orphans (id, signature, created_in_run, last_updated_run, evidence_json, created_at)
         VALUES (?1,?2,?3,?4,?5,?6)
         ON CONFLICT(id) DO UPDATE SET
            last_updated_run = excluded.last_updated_run,
            evidence_json = excluded.evidence_json",
        params![
            orphan.id.as_uuid().to_string(),
            orphan.signature.as_str(),
            orphan.created_in_run.as_uuid().to_string(),
            orphan.last_updated_run.as_uuid().to_string(),
            evidence_json,
            orphan.created_at.as_millis(),
        ],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test fixtures only")]

    use feedforward_core::ClassificationStage;
    use feedforward_core::ConversationType;
    use feedforward_core::StoryEvidence;

    use super::*;

    fn open_store() -> (tempfile::TempDir, SqliteRunStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SqliteStoreConfig {
            path: dir.path().join("store.db"),
            busy_timeout_ms: 1_000,
            journal_mode: SqliteStoreMode::Wal,
        };
        let store = SqliteRunStore::open(&config).expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn save_and_load_run_round_trips() {
        let (_dir, store) = open_store();
        let run = PipelineRun::new(false, true);
        store.save_run(&run).await.expect("save run");
        let loaded = store.load_run(run.id).await.expect("load run");
        assert_eq!(loaded.id, run.id);
        assert_eq!(loaded.state, RunState::Pending);
        assert!(loaded.auto_create_stories);
    }

    #[tokio::test]
    async fn list_active_runs_excludes_pending_and_terminal() {
        let (_dir, store) = open_store();
        let mut running = PipelineRun::new(false, true);
        running.transition(RunState::Running).expect("start");
        let pending = PipelineRun::new(false, true);
        store.save_run(&running).await.expect("save running");
        store.save_run(&pending).await.expect("save pending");

        let active = store.list_active_runs().await.expect("list active");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, running.id);
    }

    #[tokio::test]
    async fn conversations_and_classifications_are_scoped_by_run_id() {
        let (_dir, store) = open_store();
        let run_a = RunId::new();
        let run_b = RunId::new();
        let conversation = Conversation {
            id: ConversationId::new("conv-1"),
            source_url: "https://support.example.com/conv-1".to_string(),
            opened_at: Timestamp::from_millis(1_000),
            customer_messages: vec!["pins are missing".to_string()],
            support_messages: vec![],
        };
        store.save_conversations(run_a, std::slice::from_ref(&conversation)).await.expect("save a");
        store.save_conversations(run_b, std::slice::from_ref(&conversation)).await.expect("save b");

        let result_a = ClassificationResult {
            conversation_id: conversation.id.clone(),
            run_id: run_a,
            stage: ClassificationStage::Stage1,
            conversation_type: ConversationType::ProductIssue,
            actionable: true,
            confidence: Some(0.9),
            classification_changed: false,
        };
        store.save_classifications(run_a, &[result_a]).await.expect("save classification");

        let embedding = Embedding {
            conversation_id: conversation.id.clone(),
            run_id: run_a,
            vector: vec![0.1, 0.2, 0.3],
            model_version: "test-model-v1".to_string(),
        };
        store.save_embeddings(run_a, &[embedding.clone()]).await.expect("save embedding");

        let loaded = store.load_embeddings_and_facets(run_a).await.expect("load a");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, conversation.id);
        assert_eq!(loaded[0].1.as_ref().expect("embedding present").vector, embedding.vector);
        assert!(loaded[0].2.is_none());

        let loaded_b = store.load_embeddings_and_facets(run_b).await.expect("load b");
        assert!(loaded_b.is_empty());
    }

    #[tokio::test]
    async fn story_lookup_by_signature_and_run_scoped_listing() {
        let (_dir, store) = open_store();
        let run_id = RunId::new();
        let signature = SignatureId::new("hybrid_bug_report_inbound_scheduling_pins_missing");
        let story = Story {
            id: feedforward_core::StoryId::new(),
            signature: signature.clone(),
            created_in_run: run_id,
            title: "pins scheduling: bug report (inbound)".to_string(),
            product_area_raw: "scheduling".to_string(),
            product_area_raw_inferred: false,
            product_area_canonical: "scheduling".to_string(),
            component_raw: "pins".to_string(),
            component_raw_inferred: false,
            component_canonical: "pins".to_string(),
            description: "Pins go missing on export.".to_string(),
            confidence_score: 80,
            evidence: vec![StoryEvidence {
                conversation_id: ConversationId::new("conv-1"),
                excerpt: "my pins disappeared".to_string(),
                added_in_run: run_id,
            }],
            created_at: Timestamp::from_millis(1_000),
            updated_at: Timestamp::from_millis(1_000),
        };
        store.save_story(&story).await.expect("save story");

        let found = store.find_story_by_signature(&signature).await.expect("find story");
        assert_eq!(found.expect("story exists").id, story.id);

        let other_run = RunId::new();
        let run_stories = store.list_run_stories(run_id).await.expect("list run stories");
        assert_eq!(run_stories.len(), 1);
        let other_stories = store.list_run_stories(other_run).await.expect("list other run stories");
        assert!(other_stories.is_empty());

        let missing = store
            .find_story_by_signature(&SignatureId::new("no_such_signature"))
            .await
            .expect("lookup missing");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn orphan_round_trips_and_deletes() {
        let (_dir, store) = open_store();
        let run_id = RunId::new();
        let signature = SignatureId::new("hybrid_bug_report_inbound_billing_invoice_mismatch");
        let orphan = Orphan {
            id: OrphanId::new(),
            signature: signature.clone(),
            created_in_run: run_id,
            last_updated_run: run_id,
            evidence: vec![StoryEvidence {
                conversation_id: ConversationId::new("conv-2"),
                excerpt: "invoice total is wrong".to_string(),
                added_in_run: run_id,
            }],
            created_at: Timestamp::from_millis(2_000),
        };
        store.save_orphan(&orphan).await.expect("save orphan");

        let found = store.find_orphan_by_signature(&signature).await.expect("find orphan");
        assert_eq!(found.expect("orphan exists").id, orphan.id);

        store.delete_orphan(orphan.id).await.expect("delete orphan");
        let gone = store.find_orphan_by_signature(&signature).await.expect("lookup after delete");
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn alias_table_commits_and_loads_with_last_writer_wins() {
        let (_dir, store) = open_store();
        store
            .commit_aliases(&[("product_area".to_string(), "sched.".to_string(), "scheduling".to_string())])
            .await
            .expect("commit initial");
        store
            .commit_aliases(&[("product_area".to_string(), "sched.".to_string(), "scheduling_v2".to_string())])
            .await
            .expect("commit update");

        let aliases = store.load_alias_table().await.expect("load aliases");
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].2, "scheduling_v2");
    }
}
