// feedforward-pipeline/tests/end_to_end.rs
// ============================================================================
// Module: Orchestrator End-to-End Tests
// Description: Drives `PipelineOrchestrator` through full runs over fake
//              collaborators, exercising cross-run orphan promotion and
//              mid-run cooperative cancellation.
// Purpose: Cover the orchestrator-level behaviors that unit tests on
//          individual phase functions cannot reach, since every phase
//          function is private to `orchestrator.rs`.
// Dependencies: feedforward-core, feedforward-config, feedforward-pipeline, tokio
// ============================================================================

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "test fixtures only")]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use feedforward_config::ClusteringConfig;
use feedforward_config::ConcurrencyConfig;
use feedforward_config::EmbeddingEndpointConfig;
use feedforward_config::LlmEndpointConfig;
use feedforward_config::PipelineConfig;
use feedforward_config::QualityGateConfig;
use feedforward_config::RetryConfig;
use feedforward_config::StoreConfig;
use feedforward_config::TicketingEndpointConfig;
use feedforward_core::ClassificationResult;
use feedforward_core::ClusterCandidate;
use feedforward_core::Conversation;
use feedforward_core::ConversationId;
use feedforward_core::ConversationPage;
use feedforward_core::Embedding;
use feedforward_core::EmbeddingError;
use feedforward_core::Facets;
use feedforward_core::LlmError;
use feedforward_core::Orphan;
use feedforward_core::OrphanId;
use feedforward_core::PipelineRun;
use feedforward_core::PmReviewVerdict;
use feedforward_core::RunId;
use feedforward_core::RunState;
use feedforward_core::SignatureId;
use feedforward_core::Story;
use feedforward_core::StoreError;
use feedforward_core::TicketingError;
use feedforward_core::Timestamp;
use feedforward_pipeline::PipelineOrchestrator;
use serde_json::Value;
use serde_json::json;
use tokio::sync::Notify;

fn test_config() -> PipelineConfig {
    PipelineConfig {
        concurrency: ConcurrencyConfig::default(),
        clustering: ClusteringConfig::default(),
        quality_gate: QualityGateConfig::default(),
        retry: RetryConfig { max_attempts: 1, base_ms: 10, cap_ms: 10 },
        ticketing: TicketingEndpointConfig { base_url: "https://fake.example.com".to_string(), api_key: "key".to_string(), page_size: 50 },
        llm: LlmEndpointConfig { endpoint: "https://fake.example.com/llm".to_string(), api_key: "key".to_string(), model: "test".to_string(), temperature: 0.0 },
        embedding: EmbeddingEndpointConfig { endpoint: "https://fake.example.com/embed".to_string(), api_key: "key".to_string(), model: "test".to_string() },
        store: StoreConfig::default(),
    }
}

fn conversation(id: &str, text: &str) -> Conversation {
    Conversation {
        id: ConversationId::new(id),
        source_url: format!("https://support.example.com/{id}"),
        opened_at: Timestamp::from_millis(0),
        customer_messages: vec![text.to_string()],
        support_messages: vec![],
    }
}

/// Serves a fixed catalog of conversations by ID, with an optional
/// notify-gated delay on `fetch_detail` used to pin a run mid-fetch.
struct FakeTicketing {
    catalog: HashMap<ConversationId, Conversation>,
    ids_to_return: Vec<ConversationId>,
    block_until: Option<Arc<Notify>>,
}

#[async_trait]
impl feedforward_core::TicketingSource for FakeTicketing {
    async fn search(&self, _since: Timestamp, _until: Timestamp, _cursor: Option<String>) -> Result<ConversationPage, TicketingError> {
        Ok(ConversationPage { conversation_ids: self.ids_to_return.clone(), next_cursor: None })
    }

    async fn fetch_detail(&self, id: &ConversationId) -> Result<Conversation, TicketingError> {
        if let Some(notify) = &self.block_until {
            notify.notified().await;
        }
        self.catalog.get(id).cloned().ok_or_else(|| TicketingError::Permanent(format!("no such conversation: {id}")))
    }
}

/// Classifies everything as an actionable product issue, embeds identically,
/// and extracts a constant facet set so same-run conversations cluster
/// together and cross-run groups share one signature.
struct FakeLlm {
    product_area: String,
    component: String,
    symptom: String,
}

#[async_trait]
impl feedforward_core::LlmClient for FakeLlm {
    async fn classify_stage1(&self, _customer_text: &str, _timeout: Duration) -> Result<Value, LlmError> {
        Ok(json!({"type": "product_issue"}))
    }

    async fn classify_stage2(&self, _transcript: &str, _timeout: Duration) -> Result<Value, LlmError> {
        Ok(json!({"type": "product_issue"}))
    }

    async fn extract_facets(&self, _transcript: &str, _timeout: Duration) -> Result<Value, LlmError> {
        Ok(json!({
            "action_type": "bug_report",
            "direction": "deficit",
            "product_area": self.product_area,
            "component": self.component,
            "symptom": self.symptom,
        }))
    }

    async fn pm_review(&self, _summaries: &[String], _timeout: Duration) -> Result<Value, LlmError> {
        Ok(json!({"decision": "keep_together"}))
    }

    async fn generate_description(&self, _excerpts: &[String], _timeout: Duration) -> Result<String, LlmError> {
        Ok("## Summary\npromoted story".to_string())
    }
}

/// Embeds every text to the same vector, so same-run candidates with
/// matching facets always fall within the clustering distance threshold.
struct FakeEmbedding;

#[async_trait]
impl feedforward_core::EmbeddingClient for FakeEmbedding {
    async fn embed_batch(&self, texts: &[String], _timeout: Duration) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }

    fn model_version(&self) -> &str {
        "fake-embed-v1"
    }
}

/// An in-memory `RunStore` that persists runs, stories, and orphans across
/// the multiple sequential runs one test may drive. Cheaply cloned: clones
/// share the same underlying state, mirroring a persistent store reopened
/// by a second orchestrator instance.
#[derive(Clone, Default)]
struct FakeStore {
    runs: Arc<Mutex<HashMap<RunId, PipelineRun>>>,
    stories: Arc<Mutex<Vec<Story>>>,
    orphans: Arc<Mutex<Vec<Orphan>>>,
}

#[async_trait]
impl feedforward_core::RunStore for FakeStore {
    async fn save_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        self.runs.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(run.id, run.clone());
        Ok(())
    }

    async fn load_run(&self, id: RunId) -> Result<PipelineRun, StoreError> {
        self.runs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_active_runs(&self) -> Result<Vec<PipelineRun>, StoreError> {
        Ok(self
            .runs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|run| matches!(run.state, RunState::Running | RunState::Stopping))
            .cloned()
            .collect())
    }

    async fn save_conversations(&self, _run_id: RunId, _conversations: &[Conversation]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save_classifications(&self, _run_id: RunId, _results: &[ClassificationResult]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save_embeddings(&self, _run_id: RunId, _embeddings: &[Embedding]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save_facets(&self, _run_id: RunId, _facets: &[Facets]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load_embeddings_and_facets(&self, _run_id: RunId) -> Result<Vec<(ConversationId, Option<Embedding>, Option<Facets>)>, StoreError> {
        Ok(Vec::new())
    }

    async fn save_clusters(&self, _run_id: RunId, _clusters: &[ClusterCandidate]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save_pm_verdict(&self, _verdict: &PmReviewVerdict) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_story_by_signature(&self, signature: &SignatureId) -> Result<Option<Story>, StoreError> {
        Ok(self.stories.lock().unwrap_or_else(std::sync::PoisonError::into_inner).iter().find(|story| &story.signature == signature).cloned())
    }

    async fn save_story(&self, story: &Story) -> Result<(), StoreError> {
        let mut stories = self.stories.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        stories.retain(|existing| existing.id != story.id);
        stories.push(story.clone());
        Ok(())
    }

    async fn list_run_stories(&self, run_id: RunId) -> Result<Vec<Story>, StoreError> {
        Ok(self
            .stories
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|story| story.created_in_run == run_id || story.evidence.iter().any(|evidence| evidence.added_in_run == run_id))
            .cloned()
            .collect())
    }

    async fn find_orphan_by_signature(&self, signature: &SignatureId) -> Result<Option<Orphan>, StoreError> {
        Ok(self.orphans.lock().unwrap_or_else(std::sync::PoisonError::into_inner).iter().find(|orphan| &orphan.signature == signature).cloned())
    }

    async fn save_orphan(&self, orphan: &Orphan) -> Result<(), StoreError> {
        let mut orphans = self.orphans.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        orphans.retain(|existing| existing.id != orphan.id);
        orphans.push(orphan.clone());
        Ok(())
    }

    async fn delete_orphan(&self, id: OrphanId) -> Result<(), StoreError> {
        self.orphans.lock().unwrap_or_else(std::sync::PoisonError::into_inner).retain(|orphan| orphan.id != id);
        Ok(())
    }

    async fn load_alias_table(&self) -> Result<Vec<(String, String, String)>, StoreError> {
        Ok(Vec::new())
    }

    async fn commit_aliases(&self, _aliases: &[(String, String, String)]) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Polls `get_run_status` until the run reaches a terminal state, or panics
/// after a generous bound (the fakes never touch the network, so a real
/// run completes in a handful of scheduler turns).
async fn wait_for_terminal<T, L, E, S>(orchestrator: &PipelineOrchestrator<T, L, E, S>, run_id: RunId) -> PipelineRun
where
    T: feedforward_core::TicketingSource + Send + Sync + 'static,
    L: feedforward_core::LlmClient + Send + Sync + 'static,
    E: feedforward_core::EmbeddingClient + Send + Sync + 'static,
    S: feedforward_core::RunStore + Send + Sync + 'static,
{
    for _ in 0..200 {
        let run = orchestrator.get_run_status(run_id).await.expect("get status");
        if run.state.is_terminal() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} never reached a terminal state");
}

#[tokio::test]
async fn orphan_accumulated_across_two_runs_is_promoted_to_a_story() {
    let store = FakeStore::default();

    let run_a_ids = vec![ConversationId::new("a1"), ConversationId::new("a2")];
    let run_a_catalog: HashMap<ConversationId, Conversation> =
        run_a_ids.iter().map(|id| (id.clone(), conversation(id.as_str(), "my export is missing pins"))).collect();
    let ticketing_a = FakeTicketing { catalog: run_a_catalog, ids_to_return: run_a_ids, block_until: None };
    let llm_a = FakeLlm { product_area: "legacy_publisher".to_string(), component: "scheduler".to_string(), symptom: "missing pins".to_string() };
    let orchestrator_a = PipelineOrchestrator::new(ticketing_a, llm_a, FakeEmbedding, store.clone(), test_config());

    let run_a = orchestrator_a.start_run(Timestamp::from_millis(0), Timestamp::from_millis(1), false, true).await.expect("start run a");
    let status_a = wait_for_terminal(&orchestrator_a, run_a).await;
    assert_eq!(status_a.state, RunState::Completed);
    assert_eq!(status_a.orphans_created, 1);
    assert!(!status_a.stories_ready, "two conversations fall below the minimum group size and must not yet form a story");
    assert!(orchestrator_a.list_run_stories(run_a).await.expect("list stories a").is_empty());

    // A second orchestrator, over the same underlying store the first one
    // wrote orphan state into, mirroring a new run started against a
    // persistent store across process invocations.
    let run_b_ids = vec![ConversationId::new("b1"), ConversationId::new("b2")];
    let run_b_catalog: HashMap<ConversationId, Conversation> =
        run_b_ids.iter().map(|id| (id.clone(), conversation(id.as_str(), "my export is missing pins"))).collect();
    let ticketing_b = FakeTicketing { catalog: run_b_catalog, ids_to_return: run_b_ids, block_until: None };
    let llm_b = FakeLlm { product_area: "legacy_publisher".to_string(), component: "scheduler".to_string(), symptom: "missing pins".to_string() };
    let orchestrator_b = PipelineOrchestrator::new(ticketing_b, llm_b, FakeEmbedding, store, test_config());

    let run_b = orchestrator_b.start_run(Timestamp::from_millis(0), Timestamp::from_millis(1), false, true).await.expect("start run b");
    let status_b = wait_for_terminal(&orchestrator_b, run_b).await;
    assert_eq!(status_b.state, RunState::Completed);
    assert!(status_b.stories_ready, "the fourth matching conversation must cross the minimum group size and promote the orphan");

    let stories = orchestrator_b.list_run_stories(run_b).await.expect("list stories b");
    assert_eq!(stories.len(), 1);
    assert_eq!(stories[0].evidence.len(), 4, "the promoted story must carry evidence from both runs");
    assert_eq!(stories[0].product_area_canonical, "legacy_publisher");
}

#[tokio::test]
async fn stop_run_mid_fetch_cancels_cooperatively() {
    let llm = FakeLlm { product_area: "legacy_publisher".to_string(), component: "scheduler".to_string(), symptom: "missing pins".to_string() };
    let store = FakeStore::default();
    let release = Arc::new(Notify::new());

    let ids = vec![ConversationId::new("c1")];
    let catalog: HashMap<ConversationId, Conversation> = ids.iter().map(|id| (id.clone(), conversation(id.as_str(), "my export is missing pins"))).collect();
    let ticketing = FakeTicketing { catalog, ids_to_return: ids, block_until: Some(Arc::clone(&release)) };
    let orchestrator = PipelineOrchestrator::new(ticketing, llm, FakeEmbedding, store, test_config());

    let run_id = orchestrator.start_run(Timestamp::from_millis(0), Timestamp::from_millis(1), false, true).await.expect("start run");

    // Give the background task a scheduler turn to reach the blocked
    // `fetch_detail` call before requesting cancellation.
    tokio::time::sleep(Duration::from_millis(20)).await;
    orchestrator.stop_run(run_id).await.expect("stop run");
    release.notify_one();

    let status = wait_for_terminal(&orchestrator, run_id).await;
    assert_eq!(status.state, RunState::Stopped);
    assert_eq!(status.error_summary.get("cancelled").copied().unwrap_or(0), 1);
    assert!(!status.stories_ready);
    assert!(orchestrator.list_run_stories(run_id).await.expect("list stories").is_empty());
}
