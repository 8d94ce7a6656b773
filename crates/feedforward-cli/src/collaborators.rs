// feedforward-cli/src/collaborators.rs
// ============================================================================
// Module: Collaborator Wiring
// Description: Builds the four external collaborators and the orchestrator
//              that drives them, from one loaded `PipelineConfig`.
// Purpose: Keep construction of the live HTTP/SQLite stack in one place so
//          the CLI binary and its tests assemble it identically.
// Dependencies: feedforward-broker, feedforward-config, feedforward-pipeline,
//               feedforward-providers, feedforward-store-sqlite
// ============================================================================

use std::time::Duration;

use feedforward_broker::HttpTicketingConfig;
use feedforward_broker::HttpTicketingSource;
use feedforward_config::PipelineConfig;
use feedforward_pipeline::PipelineOrchestrator;
use feedforward_providers::BackoffPolicy;
use feedforward_providers::HttpClientConfig;
use feedforward_providers::HttpEmbeddingClient;
use feedforward_providers::HttpEmbeddingConfig;
use feedforward_providers::HttpLlmClient;
use feedforward_providers::HttpLlmConfig;
use feedforward_store_sqlite::SqliteRunStore;
use feedforward_store_sqlite::SqliteStoreConfig;
use thiserror::Error;

/// The concrete orchestrator type the CLI drives.
pub type CliOrchestrator = PipelineOrchestrator<HttpTicketingSource, HttpLlmClient, HttpEmbeddingClient, SqliteRunStore>;

/// Errors raised while wiring collaborators from configuration.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// An HTTP-backed collaborator's client failed to initialize.
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
    /// The `SQLite` run store failed to open or migrate.
    #[error("failed to open run store: {0}")]
    Store(#[from] feedforward_store_sqlite::SqliteStoreError),
}

/// Builds every collaborator from `config` and returns a ready-to-use
/// orchestrator.
///
/// # Errors
///
/// Returns [`CollaboratorError`] when any collaborator fails to initialize.
pub fn build_orchestrator(config: &PipelineConfig) -> Result<CliOrchestrator, CollaboratorError> {
    let backoff = BackoffPolicy {
        max_attempts: config.retry.max_attempts,
        base: Duration::from_millis(config.retry.base_ms),
        cap: Duration::from_millis(config.retry.cap_ms),
    };
    let http = HttpClientConfig::default();

    let ticketing = HttpTicketingSource::new(HttpTicketingConfig {
        base_url: config.ticketing.base_url.clone(),
        api_key: config.ticketing.api_key.clone(),
        page_size: config.ticketing.page_size,
        backoff,
        http: http.clone(),
    })?;

    let llm = HttpLlmClient::new(HttpLlmConfig {
        endpoint: config.llm.endpoint.clone(),
        api_key: config.llm.api_key.clone(),
        model: config.llm.model.clone(),
        temperature: config.llm.temperature,
        http: http.clone(),
    })?;

    let embedding = HttpEmbeddingClient::new(HttpEmbeddingConfig {
        endpoint: config.embedding.endpoint.clone(),
        api_key: config.embedding.api_key.clone(),
        model: config.embedding.model.clone(),
        http,
    })?;

    let store = SqliteRunStore::open(&SqliteStoreConfig {
        path: config.store.path.clone(),
        busy_timeout_ms: config.store.busy_timeout_ms,
        journal_mode: config.store.journal_mode,
    })?;

    Ok(PipelineOrchestrator::new(ticketing, llm, embedding, store, config.clone()))
}
