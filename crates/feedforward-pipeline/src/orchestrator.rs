// feedforward-pipeline/src/orchestrator.rs
// ============================================================================
// Module: Run Orchestrator
// Description: Drives one pipeline run through its eight ordered phases.
// Purpose: The single entry point CLIs and services call to start, watch,
//          stop, and read back the results of a run.
// Dependencies: feedforward-core, feedforward-config, tokio
// ============================================================================

//! ## Overview
//! `PipelineOrchestrator` owns the four external collaborators and drives a
//! run in a background task so `start_run` returns immediately with a
//! `RunId`; all other methods read or signal the run's persisted state.
//! Phases execute strictly in order; a per-run cancel flag is polled
//! between phases and between batches within a phase, so cancellation has a
//! deterministic upper bound set by the collaborator timeouts. A dry run
//! never persists stories: its would-be creations are held in a small,
//! bounded in-memory preview cache instead.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use feedforward_config::PipelineConfig;
use feedforward_core::ClassificationResult;
use feedforward_core::ClusterCandidate;
use feedforward_core::Conversation;
use feedforward_core::ConversationId;
use feedforward_core::Embedding;
use feedforward_core::EmbeddingClient;
use feedforward_core::Facets;
use feedforward_core::LlmClient;
use feedforward_core::Orphan;
use feedforward_core::OrphanId;
use feedforward_core::PipelineRun;
use feedforward_core::PmVerdictKind;
use feedforward_core::RunId;
use feedforward_core::RunPhase;
use feedforward_core::RunState;
use feedforward_core::RunStore;
use feedforward_core::StoreError;
use feedforward_core::Story;
use feedforward_core::StoryEvidence;
use feedforward_core::TicketingSource;
use feedforward_core::Timestamp;
use feedforward_core::canonicalize::AliasTable;
use feedforward_core::canonicalize::SignatureRegistry;
use thiserror::Error;

use crate::classify::classify_conversation;
use crate::cluster::cluster_for_run;
use crate::extract::embed_conversations;
use crate::extract::extract_facets;
use crate::pm_review::run_pm_review;
use crate::quality_gate::GateDecision;
use crate::quality_gate::GroupMember;
use crate::quality_gate::evaluate_group;
use crate::story_assembler::StoryMember;
use crate::story_assembler::assemble_story;
use crate::story_assembler::build_group_signature;

/// Errors surfaced by [`PipelineOrchestrator`]'s control-plane methods.
///
/// Errors raised inside a run's background execution are never returned
/// here; they are recorded on the run record's `error_summary` and surfaced
/// through [`PipelineOrchestrator::get_run_status`] instead.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No run exists with the given ID.
    #[error("run {0} not found")]
    RunNotFound(RunId),
    /// The requested state transition is not legal from the run's current state.
    #[error("illegal run transition: {0}")]
    IllegalTransition(String),
    /// The underlying store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A dry run's would-be story creation, held in a bounded cache instead of
/// being persisted.
#[derive(Debug, Clone)]
pub struct DryRunPreview {
    /// The run this preview belongs to.
    pub run_id: RunId,
    /// The signature the group would have been filed under.
    pub signature: feedforward_core::SignatureId,
    /// The confidence score the quality gate computed.
    pub confidence_score: u8,
    /// Conversations that would have contributed evidence.
    pub conversation_ids: Vec<ConversationId>,
}

/// Drives pipeline runs across a ticketing source, an LLM, an embedding
/// model, and a run store.
pub struct PipelineOrchestrator<T, L, E, S> {
    ticketing: Arc<T>,
    llm: Arc<L>,
    embedding: Arc<E>,
    store: Arc<S>,
    config: PipelineConfig,
    cancel_flags: Arc<Mutex<HashMap<RunId, bool>>>,
    dry_run_previews: Arc<Mutex<VecDeque<DryRunPreview>>>,
}

impl<T, L, E, S> PipelineOrchestrator<T, L, E, S>
where
    T: TicketingSource + Send + Sync + 'static,
    L: LlmClient + Send + Sync + 'static,
    E: EmbeddingClient + Send + Sync + 'static,
    S: RunStore + Send + Sync + 'static,
{
    /// Builds a new orchestrator over the given collaborators and config.
    pub fn new(ticketing: T, llm: L, embedding: E, store: S, config: PipelineConfig) -> Self {
        Self {
            ticketing: Arc::new(ticketing),
            llm: Arc::new(llm),
            embedding: Arc::new(embedding),
            store: Arc::new(store),
            config,
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
            dry_run_previews: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Recovers runs abandoned by a prior process: any run still in
    /// `Running` or `Stopping` is transitioned to `Failed` with reason
    /// `"abandoned"`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when the store cannot be read or written.
    pub async fn recover_abandoned_runs(&self) -> Result<u32, OrchestratorError> {
        let mut recovered = 0_u32;
        for mut run in self.store.list_active_runs().await? {
            run.record_error("abandoned");
            run.transition(RunState::Failed).map_err(OrchestratorError::IllegalTransition)?;
            self.store.save_run(&run).await?;
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Starts a new run over conversations opened in `[since, until)` and
    /// returns its ID immediately; the run itself executes in a background
    /// task.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when the initial run record cannot be
    /// persisted.
    pub async fn start_run(&self, since: Timestamp, until: Timestamp, dry_run: bool, auto_create_stories: bool) -> Result<RunId, OrchestratorError> {
        let mut run = PipelineRun::new(dry_run, auto_create_stories);
        let run_id = run.id;
        run.transition(RunState::Running).map_err(OrchestratorError::IllegalTransition)?;
        self.store.save_run(&run).await?;
        self.cancel_flags.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(run_id, false);

        let ticketing = Arc::clone(&self.ticketing);
        let llm = Arc::clone(&self.llm);
        let embedding = Arc::clone(&self.embedding);
        let store = Arc::clone(&self.store);
        let config = self.config.clone();
        let cancel_flags = Arc::clone(&self.cancel_flags);
        let dry_run_previews = Arc::clone(&self.dry_run_previews);

        tokio::spawn(async move {
            let outcome = execute_run(run_id, since, until, &*ticketing, &*llm, &*embedding, &*store, &config, &cancel_flags, &dry_run_previews).await;
            if let Err(error) = outcome {
                tracing::error!(run_id = %run_id, error = %error, "run execution failed");
            }
        });

        Ok(run_id)
    }

    /// Reads back the current status of a run.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::RunNotFound`] when no such run exists.
    pub async fn get_run_status(&self, run_id: RunId) -> Result<PipelineRun, OrchestratorError> {
        self.store.load_run(run_id).await.map_err(|source| match source {
            StoreError::NotFound(_) => OrchestratorError::RunNotFound(run_id),
            other => OrchestratorError::Store(other),
        })
    }

    /// Requests cooperative cancellation of a running run; the orchestrator
    /// observes the flag between phases and between batches within a phase.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when the run cannot be found, or is not
    /// currently running.
    pub async fn stop_run(&self, run_id: RunId) -> Result<(), OrchestratorError> {
        self.cancel_flags.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(run_id, true);
        let mut run = self.store.load_run(run_id).await?;
        if run.state == RunState::Running {
            run.transition(RunState::Stopping).map_err(OrchestratorError::IllegalTransition)?;
            self.store.save_run(&run).await?;
        }
        Ok(())
    }

    /// Lists every story created or appended-to during `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when the store cannot be read.
    pub async fn list_run_stories(&self, run_id: RunId) -> Result<Vec<Story>, OrchestratorError> {
        Ok(self.store.list_run_stories(run_id).await?)
    }

    /// Returns the cached dry-run previews produced for `run_id`, if any.
    #[must_use]
    pub fn get_dry_run_preview(&self, run_id: RunId) -> Vec<DryRunPreview> {
        self.dry_run_previews
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|preview| preview.run_id == run_id)
            .cloned()
            .collect()
    }
}

/// Checks the per-run cancel flag; returns `true` when cancellation has
/// been requested.
fn is_cancelled(cancel_flags: &Mutex<HashMap<RunId, bool>>, run_id: RunId) -> bool {
    cancel_flags.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(&run_id).copied().unwrap_or(false)
}

/// Drives one run end to end through its eight ordered phases, persisting
/// the run record after each phase and honoring cooperative cancellation
/// between them.
#[allow(clippy::too_many_arguments, reason = "the orchestrator's four collaborators, config, and shared run-control state are all independently required at every phase boundary")]
async fn execute_run<T, L, E, S>(
    run_id: RunId,
    since: Timestamp,
    until: Timestamp,
    ticketing: &T,
    llm: &L,
    embedding: &E,
    store: &S,
    config: &PipelineConfig,
    cancel_flags: &Mutex<HashMap<RunId, bool>>,
    dry_run_previews: &Mutex<VecDeque<DryRunPreview>>,
) -> Result<(), StoreError>
where
    T: TicketingSource + ?Sized,
    L: LlmClient + ?Sized,
    E: EmbeddingClient + ?Sized,
    S: RunStore + ?Sized,
{
    let llm_timeout = Duration::from_secs(config.concurrency.llm_timeout_secs);
    let embedding_timeout = Duration::from_secs(config.concurrency.embedding_timeout_secs);

    let mut run = store.load_run(run_id).await?;

    let Some(conversations) = run_fetching_phase(&mut run, ticketing, since, until, config.concurrency.fetch_failure_threshold, store).await? else {
        return Ok(());
    };
    if bail_if_cancelled(&mut run, store, cancel_flags, run_id).await? {
        return Ok(());
    }

    let eligible = run_classifying_phase(&mut run, llm, &conversations, run_id, llm_timeout, store).await?;
    if bail_if_cancelled(&mut run, store, cancel_flags, run_id).await? {
        return Ok(());
    }

    let embeddings = run_embedding_phase(&mut run, embedding, &eligible, run_id, embedding_timeout, store).await?;
    if bail_if_cancelled(&mut run, store, cancel_flags, run_id).await? {
        return Ok(());
    }

    let facets = run_faceting_phase(&mut run, llm, &eligible, run_id, llm_timeout, store).await?;
    if bail_if_cancelled(&mut run, store, cancel_flags, run_id).await? {
        return Ok(());
    }

    let (clusters, mut registry) = run_clustering_phase(&mut run, &eligible, &embeddings, &facets, run_id, config, store).await?;
    if bail_if_cancelled(&mut run, store, cancel_flags, run_id).await? {
        return Ok(());
    }

    let subgroups = run_pm_review_phase(&mut run, llm, &clusters, run_id, llm_timeout, store).await?;
    if bail_if_cancelled(&mut run, store, cancel_flags, run_id).await? {
        return Ok(());
    }

    let conversation_index: HashMap<ConversationId, &Conversation> = conversations.iter().map(|c| (c.id.clone(), c)).collect();
    let embedding_index: HashMap<ConversationId, &Embedding> = embeddings.iter().map(|e| (e.conversation_id.clone(), e)).collect();
    let facets_index: HashMap<ConversationId, &Facets> = facets.iter().map(|f| (f.conversation_id.clone(), f)).collect();

    let decisions = run_quality_gate_phase(&mut run, &subgroups, &facets_index, &embedding_index, &conversation_index, config).await;
    if bail_if_cancelled(&mut run, store, cancel_flags, run_id).await? {
        return Ok(());
    }

    run_story_creation_phase(&mut run, llm, store, &mut registry, decisions, &facets_index, &conversation_index, run_id, llm_timeout, config.clustering.min_group_size, dry_run_previews)
        .await?;

    if !run.dry_run {
        commit_session_aliases(registry, store).await?;
    }

    run.transition(RunState::Completed).map_err(StoreError::Schema)?;
    store.save_run(&run).await?;
    cancel_flags.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&run_id);
    Ok(())
}

/// Transitions `run` to `Stopped` and persists it when cancellation has been
/// requested; returns whether the caller should stop driving further phases.
async fn bail_if_cancelled<S: RunStore + ?Sized>(run: &mut PipelineRun, store: &S, cancel_flags: &Mutex<HashMap<RunId, bool>>, run_id: RunId) -> Result<bool, StoreError> {
    if !is_cancelled(cancel_flags, run_id) {
        return Ok(false);
    }
    run.record_error("cancelled");
    run.transition(RunState::Stopping).ok();
    run.transition(RunState::Stopped).map_err(StoreError::Schema)?;
    store.save_run(run).await?;
    Ok(true)
}

/// Begins a phase: records the start event and persists the run.
async fn begin_phase<S: RunStore + ?Sized>(run: &mut PipelineRun, phase: RunPhase, store: &S) -> Result<(), StoreError> {
    run.current_phase = Some(phase);
    run.phase_events.push(feedforward_core::PhaseEvent { phase, started_at: Timestamp::now(), ended_at: None, processed_count: 0, failed_count: 0 });
    store.save_run(run).await
}

/// Ends the most recently started phase with final counters, and persists
/// the run.
async fn end_phase<S: RunStore + ?Sized>(run: &mut PipelineRun, processed_count: u32, failed_count: u32, store: &S) -> Result<(), StoreError> {
    if let Some(event) = run.phase_events.last_mut() {
        event.ended_at = Some(Timestamp::now());
        event.processed_count = processed_count;
        event.failed_count = failed_count;
    }
    store.save_run(run).await
}

/// C1: pages the ticketing source for every conversation opened in
/// `[since, until)`, fetches detail for each, and persists the batch.
///
/// Returns `Ok(None)` when the fraction of failed detail fetches exceeds
/// `fetch_failure_threshold`: the run has already been transitioned to
/// `Failed` and persisted, and the caller must not proceed to later phases.
async fn run_fetching_phase<T: TicketingSource + ?Sized, S: RunStore + ?Sized>(
    run: &mut PipelineRun,
    ticketing: &T,
    since: Timestamp,
    until: Timestamp,
    fetch_failure_threshold: f32,
    store: &S,
) -> Result<Option<Vec<Conversation>>, StoreError> {
    begin_phase(run, RunPhase::Fetching, store).await?;
    let mut conversation_ids = Vec::new();
    let mut cursor = None;
    loop {
        let page = match ticketing.search(since, until, cursor).await {
            Ok(page) => page,
            Err(error) => {
                tracing::warn!(run_id = %run.id, error = %error, "ticketing search failed");
                run.record_error("ticketing_error");
                break;
            }
        };
        conversation_ids.extend(page.conversation_ids);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    let mut conversations = Vec::new();
    let mut failed = 0_u32;
    for id in &conversation_ids {
        match ticketing.fetch_detail(id).await {
            Ok(conversation) => conversations.push(conversation),
            Err(error) => {
                tracing::warn!(run_id = %run.id, conversation_id = %id, error = %error, "fetch detail failed");
                run.record_error("ticketing_error");
                failed += 1;
            }
        }
    }

    store.save_conversations(run.id, &conversations).await?;
    end_phase(run, u32::try_from(conversations.len()).unwrap_or(u32::MAX), failed, store).await?;

    if !conversation_ids.is_empty() {
        #[allow(clippy::cast_precision_loss, reason = "conversation counts fit comfortably within f32 precision")]
        let failure_fraction = failed as f32 / conversation_ids.len() as f32;
        if failure_fraction > fetch_failure_threshold {
            tracing::error!(run_id = %run.id, failure_fraction, fetch_failure_threshold, "fetch failure threshold exceeded");
            run.record_error("fetch_failure_threshold");
            run.transition(RunState::Failed).map_err(StoreError::Schema)?;
            store.save_run(run).await?;
            return Ok(None);
        }
    }

    Ok(Some(conversations))
}

/// C2: two-stage classification; returns the pipeline-eligible subset.
async fn run_classifying_phase<L: LlmClient + ?Sized, S: RunStore + ?Sized>(
    run: &mut PipelineRun,
    llm: &L,
    conversations: &[Conversation],
    run_id: RunId,
    timeout: Duration,
    store: &S,
) -> Result<Vec<Conversation>, StoreError> {
    begin_phase(run, RunPhase::Classifying, store).await?;
    let mut all_results = Vec::new();
    let mut eligible_ids = std::collections::HashSet::new();
    let mut failed = 0_u32;
    for conversation in conversations {
        let outcome = classify_conversation(llm, conversation, run_id, timeout).await;
        if let Some(category) = outcome.error_category {
            run.record_error(category);
            failed += 1;
        }
        if outcome.results.last().is_some_and(ClassificationResult::is_pipeline_eligible) {
            eligible_ids.insert(conversation.id.clone());
        }
        all_results.extend(outcome.results);
    }
    store.save_classifications(run_id, &all_results).await?;
    end_phase(run, u32::try_from(all_results.len()).unwrap_or(u32::MAX), failed, store).await?;
    Ok(conversations.iter().filter(|c| eligible_ids.contains(&c.id)).cloned().collect())
}

/// C3 (embeddings): one batched embedding call over every eligible conversation.
async fn run_embedding_phase<E: EmbeddingClient + ?Sized, S: RunStore + ?Sized>(
    run: &mut PipelineRun,
    embedding: &E,
    conversations: &[Conversation],
    run_id: RunId,
    timeout: Duration,
    store: &S,
) -> Result<Vec<Embedding>, StoreError> {
    begin_phase(run, RunPhase::Embedding, store).await?;
    let embeddings = match embed_conversations(embedding, conversations, run_id, timeout).await {
        Ok(embeddings) => embeddings,
        Err(error) => {
            tracing::warn!(run_id = %run_id, error = %error, "batch embedding failed");
            run.record_error("embedding_error");
            Vec::new()
        }
    };
    store.save_embeddings(run_id, &embeddings).await?;
    let failed = u32::try_from(conversations.len().saturating_sub(embeddings.len())).unwrap_or(u32::MAX);
    end_phase(run, u32::try_from(embeddings.len()).unwrap_or(u32::MAX), failed, store).await?;
    Ok(embeddings)
}

/// C3 (facets): one facet-extraction call per eligible conversation.
async fn run_faceting_phase<L: LlmClient + ?Sized, S: RunStore + ?Sized>(
    run: &mut PipelineRun,
    llm: &L,
    conversations: &[Conversation],
    run_id: RunId,
    timeout: Duration,
    store: &S,
) -> Result<Vec<Facets>, StoreError> {
    begin_phase(run, RunPhase::Faceting, store).await?;
    let mut facets = Vec::new();
    let mut failed = 0_u32;
    for conversation in conversations {
        let (extracted, error_category) = extract_facets(llm, conversation, run_id, timeout).await;
        if let Some(category) = error_category {
            run.record_error(category);
            failed += 1;
        }
        if let Some(extracted) = extracted {
            facets.push(extracted);
        }
    }
    store.save_facets(run_id, &facets).await?;
    end_phase(run, u32::try_from(facets.len()).unwrap_or(u32::MAX), failed, store).await?;
    Ok(facets)
}

/// C4: hybrid clustering over every eligible conversation's embedding/facet pair.
async fn run_clustering_phase<S: RunStore + ?Sized>(
    run: &mut PipelineRun,
    conversations: &[Conversation],
    embeddings: &[Embedding],
    facets: &[Facets],
    run_id: RunId,
    config: &PipelineConfig,
    store: &S,
) -> Result<(Vec<ClusterCandidate>, SignatureRegistry), StoreError> {
    begin_phase(run, RunPhase::Clustering, store).await?;

    let embedding_by_id: HashMap<ConversationId, Embedding> = embeddings.iter().map(|e| (e.conversation_id.clone(), e.clone())).collect();
    let facets_by_id: HashMap<ConversationId, Facets> = facets.iter().map(|f| (f.conversation_id.clone(), f.clone())).collect();
    let inputs = conversations
        .iter()
        .map(|c| (c.id.clone(), embedding_by_id.get(&c.id).cloned(), facets_by_id.get(&c.id).cloned()))
        .collect();

    let aliases = store.load_alias_table().await?;
    let mut base = AliasTable::new();
    for (kind, raw, canonical) in aliases {
        base.register(kind, raw, canonical);
    }
    let registry = SignatureRegistry::load(run_id, base);

    let candidates = cluster_for_run(run_id, inputs, &registry, config.clustering.distance_threshold);
    run.singleton_clusters += u32::try_from(candidates.iter().filter(|c| c.is_singleton()).count()).unwrap_or(u32::MAX);
    store.save_clusters(run_id, &candidates).await?;
    end_phase(run, u32::try_from(candidates.len()).unwrap_or(u32::MAX), 0, store).await?;
    Ok((candidates, registry))
}

/// C9: commits every alias `registry` registered this session into the
/// persistent alias store, logging (but not discarding) any last-writer-wins
/// conflicts against the currently persisted base table.
async fn commit_session_aliases<S: RunStore + ?Sized>(registry: SignatureRegistry, store: &S) -> Result<(), StoreError> {
    let new_aliases = registry.session_aliases();
    if new_aliases.is_empty() {
        return Ok(());
    }

    let run_id = registry.run_id();
    let mut base = AliasTable::new();
    for (kind, raw, canonical) in store.load_alias_table().await? {
        base.register(kind, raw, canonical);
    }
    let report = registry.commit_into(&mut base);
    for conflict in &report.conflicts {
        tracing::warn!(
            run_id = %run_id,
            kind = %conflict.kind,
            raw = %conflict.raw,
            previous_canonical = %conflict.previous_canonical,
            new_canonical = %conflict.new_canonical,
            "alias conflict, session value wins"
        );
    }
    store.commit_aliases(&new_aliases).await
}

/// C5: PM-review coherence gate; expands each cluster into its validated subgroups.
async fn run_pm_review_phase<L: LlmClient + ?Sized, S: RunStore + ?Sized>(
    run: &mut PipelineRun,
    llm: &L,
    clusters: &[ClusterCandidate],
    run_id: RunId,
    timeout: Duration,
    store: &S,
) -> Result<Vec<Vec<ConversationId>>, StoreError> {
    begin_phase(run, RunPhase::PmReview, store).await?;
    let mut subgroups = Vec::new();
    for cluster in clusters {
        let summaries: Vec<String> = cluster.conversation_ids.iter().map(ToString::to_string).collect();
        let verdict = run_pm_review(llm, cluster, &summaries, timeout).await;
        match verdict.kind {
            PmVerdictKind::KeepTogether => {
                if verdict.fail_safe {
                    run.record_error("pm_review_skipped");
                }
                subgroups.push(cluster.conversation_ids.clone());
            }
            PmVerdictKind::Split => subgroups.extend(verdict.subgroups.clone()),
            PmVerdictKind::Reject => {}
        }
        store.save_pm_verdict(&verdict).await?;
    }
    end_phase(run, u32::try_from(subgroups.len()).unwrap_or(u32::MAX), 0, store).await?;
    Ok(subgroups)
}

/// C6: evidence validation, confidence scoring, and size routing for every subgroup.
async fn run_quality_gate_phase(
    run: &mut PipelineRun,
    subgroups: &[Vec<ConversationId>],
    facets_index: &HashMap<ConversationId, &Facets>,
    embedding_index: &HashMap<ConversationId, &Embedding>,
    conversation_index: &HashMap<ConversationId, &Conversation>,
    config: &PipelineConfig,
) -> Vec<(Vec<ConversationId>, GateDecision)> {
    run.current_phase = Some(RunPhase::QualityGate);
    let mut decisions = Vec::new();
    for subgroup in subgroups {
        let members: Vec<GroupMember> = subgroup
            .iter()
            .map(|id| GroupMember {
                excerpt: conversation_index.get(id).map(|c| c.customer_facing_text()).unwrap_or_default(),
                embedding: embedding_index.get(id).map(|e| e.vector.clone()),
                action_type: facets_index.get(id).map(|f| f.action_type.clone()),
                direction: facets_index.get(id).map(|f| f.direction.clone()),
                product_area_raw: facets_index.get(id).map(|f| f.product_area_raw.clone()),
                component_raw: facets_index.get(id).map(|f| f.component_raw.clone()),
                symptom: facets_index.get(id).map(|f| f.symptom.clone()),
                platform_key: conversation_index.get(id).map(|c| platform_key(&c.source_url)),
            })
            .collect();
        let decision = evaluate_group(&members, &config.quality_gate, config.clustering.min_group_size);
        match &decision {
            GateDecision::Reject => run.record_error("evidence_invalid"),
            GateDecision::Orphan { below_score_threshold: true, .. } => run.record_error("quality_gate_rejections"),
            _ => {}
        }
        decisions.push((subgroup.clone(), decision));
    }
    decisions
}

/// Derives a coarse platform key from a conversation's source URL, used for
/// the quality gate's platform-uniformity signal.
fn platform_key(source_url: &str) -> String {
    source_url.split("//").nth(1).and_then(|rest| rest.split('/').next()).unwrap_or(source_url).to_string()
}

/// C7/C9: assembles stories for every `Story`-routed group, accumulates or
/// promotes orphans, and caches previews instead of persisting when
/// `run.dry_run` is set.
#[allow(clippy::too_many_arguments, reason = "story creation needs every collaborator, the run-scoped registry, the conversation/facet indexes, and the dry-run preview cache together")]
async fn run_story_creation_phase<L: LlmClient + ?Sized, S: RunStore + ?Sized>(
    run: &mut PipelineRun,
    llm: &L,
    store: &S,
    registry: &mut SignatureRegistry,
    decisions: Vec<(Vec<ConversationId>, GateDecision)>,
    facets_index: &HashMap<ConversationId, &Facets>,
    conversation_index: &HashMap<ConversationId, &Conversation>,
    run_id: RunId,
    timeout: Duration,
    min_group_size: usize,
    dry_run_previews: &Mutex<VecDeque<DryRunPreview>>,
) -> Result<(), StoreError> {
    begin_phase(run, RunPhase::StoryCreation, store).await?;
    let mut created = 0_u32;
    let mut orphaned = 0_u32;

    for (conversation_ids, decision) in decisions {
        let (confidence_score, is_story_sized) = match decision {
            GateDecision::Story { confidence_score } => (confidence_score, true),
            GateDecision::Orphan { confidence_score, .. } => (confidence_score, false),
            GateDecision::Reject => continue,
        };
        let members: Vec<StoryMember> = conversation_ids
            .iter()
            .map(|id| StoryMember {
                conversation_id: id.clone(),
                excerpt: conversation_index.get(id).map(|c| c.customer_facing_text()).unwrap_or_else(|| id.to_string()),
                action_type: facets_index.get(id).map(|f| f.action_type.clone()).unwrap_or_default(),
                direction: facets_index.get(id).map(|f| f.direction.clone()).unwrap_or_default(),
                product_area_raw: facets_index.get(id).map(|f| f.product_area_raw.clone()).unwrap_or_default(),
                component_raw: facets_index.get(id).map(|f| f.component_raw.clone()).unwrap_or_default(),
                symptom: facets_index.get(id).map(|f| f.symptom.clone()).unwrap_or_default(),
            })
            .collect();
        let group_signature = build_group_signature(&members, registry);

        if run.dry_run {
            dry_run_previews.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push_back(DryRunPreview {
                run_id,
                signature: group_signature.signature.clone(),
                confidence_score,
                conversation_ids: conversation_ids.clone(),
            });
            while dry_run_previews.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len() > 5 {
                dry_run_previews.lock().unwrap_or_else(std::sync::PoisonError::into_inner).pop_front();
            }
            continue;
        }

        if is_story_sized {
            let assembled = assemble_story(store, llm, &group_signature, confidence_score, &members, run_id, timeout).await?;
            if let Some(category) = assembled.description_error {
                run.record_error(category);
            }
            created += 1;
            run.stories_ready = true;
        } else {
            orphaned += route_to_orphan(store, run_id, &group_signature, confidence_score, &members, min_group_size, &mut run.stories_ready).await?;
        }
    }

    run.orphans_created += orphaned;
    end_phase(run, created, 0, store).await?;
    Ok(())
}

/// Accumulates evidence under an orphan's signature, promoting it to a
/// story the moment accumulated evidence crosses `min_group_size`.
async fn route_to_orphan<S: RunStore + ?Sized>(
    store: &S,
    run_id: RunId,
    group_signature: &crate::story_assembler::GroupSignature,
    confidence_score: u8,
    members: &[StoryMember],
    min_group_size: usize,
    stories_ready: &mut bool,
) -> Result<u32, StoreError> {
    let signature = &group_signature.signature;
    let now = Timestamp::now();
    let new_evidence: Vec<StoryEvidence> =
        members.iter().map(|member| StoryEvidence { conversation_id: member.conversation_id.clone(), excerpt: member.excerpt.clone(), added_in_run: run_id }).collect();

    let mut orphan = match store.find_orphan_by_signature(signature).await? {
        Some(mut existing) => {
            existing.evidence.extend(new_evidence);
            existing.last_updated_run = run_id;
            existing
        }
        None => Orphan { id: OrphanId::new(), signature: signature.clone(), created_in_run: run_id, last_updated_run: run_id, evidence: new_evidence, created_at: now },
    };

    if orphan.crosses_threshold(min_group_size) {
        let story = Story {
            id: feedforward_core::StoryId::new(),
            signature: orphan.signature.clone(),
            created_in_run: orphan.created_in_run,
            title: group_signature.title.clone(),
            product_area_raw: group_signature.product_area_raw.clone(),
            product_area_raw_inferred: group_signature.product_area_raw_inferred,
            product_area_canonical: group_signature.product_area_canonical.clone(),
            component_raw: group_signature.component_raw.clone(),
            component_raw_inferred: group_signature.component_raw_inferred,
            component_canonical: group_signature.component_canonical.clone(),
            description: "## Summary\nPromoted from accumulated orphan evidence across runs.".to_string(),
            confidence_score,
            evidence: orphan.evidence.clone(),
            created_at: orphan.created_at,
            updated_at: now,
        };
        store.save_story(&story).await?;
        store.delete_orphan(orphan.id).await?;
        *stories_ready = true;
        Ok(0)
    } else {
        orphan.last_updated_run = run_id;
        store.save_orphan(&orphan).await?;
        Ok(1)
    }
}
