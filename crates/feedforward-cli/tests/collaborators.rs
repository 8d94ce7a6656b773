// feedforward-cli/tests/collaborators.rs
// ============================================================================
// Module: Collaborator Wiring Integration Test
// Description: Builds a real orchestrator over a temporary SQLite store and
//              drives a dry-run start/status/stop round trip.
// Purpose: Exercise `build_orchestrator` and the control-plane methods the
//          CLI binary calls, without any network-reachable LLM/embedding/
//          ticketing endpoint (the run fails fast in the fetching phase,
//          which is enough to prove the wiring itself is correct).
// Dependencies: feedforward-cli, feedforward-config, tempfile, tokio
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "test fixtures only"
)]

use feedforward_cli::collaborators::build_orchestrator;
use feedforward_config::ConcurrencyConfig;
use feedforward_config::ClusteringConfig;
use feedforward_config::EmbeddingEndpointConfig;
use feedforward_config::LlmEndpointConfig;
use feedforward_config::PipelineConfig;
use feedforward_config::QualityGateConfig;
use feedforward_config::RetryConfig;
use feedforward_config::StoreConfig;
use feedforward_config::TicketingEndpointConfig;
use feedforward_core::Timestamp;
use feedforward_store_sqlite::SqliteStoreMode;

fn test_config(db_path: std::path::PathBuf) -> PipelineConfig {
    PipelineConfig {
        concurrency: ConcurrencyConfig::default(),
        clustering: ClusteringConfig::default(),
        quality_gate: QualityGateConfig::default(),
        retry: RetryConfig { max_attempts: 1, base_ms: 10, cap_ms: 10 },
        ticketing: TicketingEndpointConfig { base_url: "https://127.0.0.1:9".to_string(), api_key: "test-key".to_string(), page_size: 10 },
        llm: LlmEndpointConfig { endpoint: "https://127.0.0.1:9/llm".to_string(), api_key: "test-key".to_string(), model: "test-model".to_string(), temperature: 0.0 },
        embedding: EmbeddingEndpointConfig { endpoint: "https://127.0.0.1:9/embed".to_string(), api_key: "test-key".to_string(), model: "test-model".to_string() },
        store: StoreConfig { path: db_path, busy_timeout_ms: 1_000, journal_mode: SqliteStoreMode::Wal },
    }
}

#[tokio::test]
async fn start_status_stop_round_trip_against_a_real_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path().join("feedforward.db"));
    let orchestrator = build_orchestrator(&config).expect("build orchestrator");

    let since = Timestamp::from_millis(0);
    let until = Timestamp::from_millis(1);
    let run_id = orchestrator.start_run(since, until, true, false).await.expect("start run");

    let status = orchestrator.get_run_status(run_id).await.expect("get status");
    assert_eq!(status.id, run_id);

    orchestrator.stop_run(run_id).await.expect("stop run");
    let stories = orchestrator.list_run_stories(run_id).await.expect("list stories");
    assert!(stories.is_empty());
    assert!(orchestrator.get_dry_run_preview(run_id).is_empty());
}

#[tokio::test]
async fn recover_abandoned_runs_is_a_no_op_on_a_fresh_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path().join("feedforward.db"));
    let orchestrator = build_orchestrator(&config).expect("build orchestrator");
    let recovered = orchestrator.recover_abandoned_runs().await.expect("recover");
    assert_eq!(recovered, 0);
}
