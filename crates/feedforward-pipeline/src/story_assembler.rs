// feedforward-pipeline/src/story_assembler.rs
// ============================================================================
// Module: Story Assembler & Canonicalization Integration
// Description: Signature construction, dedup-or-create, description generation.
// Purpose: Turn a quality-gate-approved group into a persisted Story, or
//          append its evidence to an existing one sharing the same signature.
// Dependencies: feedforward-core, feedforward-config
// ============================================================================

//! ## Overview
//! Every group reaching this module has already passed the quality gate as
//! a `Story`-bound decision. Signature construction is pure and
//! deterministic; persistence and LLM description generation are the only
//! suspension points. A failed description call never discards the group:
//! it falls back to a minimal description and reports the failure through
//! the caller's error summary rather than the returned `Result`.

use std::time::Duration;

use feedforward_core::ConversationId;
use feedforward_core::LlmClient;
use feedforward_core::RunId;
use feedforward_core::RunStore;
use feedforward_core::Story;
use feedforward_core::StoryEvidence;
use feedforward_core::StoryId;
use feedforward_core::Timestamp;
use feedforward_core::canonicalize::SignatureRegistry;
use feedforward_core::canonicalize::build_signature;

/// One member's contribution to story assembly: the facets needed to build
/// the signature, plus the evidence excerpt to attach.
#[derive(Debug, Clone)]
pub struct StoryMember {
    /// The contributing conversation.
    pub conversation_id: ConversationId,
    /// Evidence excerpt substantiating this member's inclusion.
    pub excerpt: String,
    /// Facet action type, used in signature construction.
    pub action_type: String,
    /// Facet direction, used in signature construction.
    pub direction: String,
    /// Raw product area, canonicalized via `registry` before use.
    pub product_area_raw: String,
    /// Raw component, canonicalized via `registry` before use.
    pub component_raw: String,
    /// Short symptom text, slugified into the signature's issue suffix.
    pub symptom: String,
}

/// The outcome of assembling one group: either a new story, or an append
/// to an existing one found by signature.
#[derive(Debug, Clone)]
pub struct AssembledStory {
    /// The story as it now stands, new or appended-to.
    pub story: Story,
    /// Whether this call created a new story rather than appending to one.
    pub newly_created: bool,
    /// Set when description generation failed and a minimal fallback was
    /// used instead; the caller should add this to the run's error summary.
    pub description_error: Option<&'static str>,
}

/// The stable signature for one group, plus the canonicalized facets it was
/// built from (reused for both story creation and description generation).
#[derive(Debug, Clone)]
pub struct GroupSignature {
    /// The stable, cross-run signature.
    pub signature: feedforward_core::SignatureId,
    /// Short human-readable label, derived from the majority-vote facets.
    pub title: String,
    /// Majority-vote facet action type.
    pub action_type: String,
    /// Majority-vote facet direction.
    pub direction: String,
    /// Majority-vote raw product area, prior to canonicalization.
    pub product_area_raw: String,
    /// Set when the group's members disagreed on the raw product area, so
    /// `product_area_raw` was chosen by majority vote rather than unanimous.
    pub product_area_raw_inferred: bool,
    /// Majority-vote product area, canonicalized.
    pub product_area_canonical: String,
    /// Majority-vote raw component, prior to canonicalization.
    pub component_raw: String,
    /// Set when the group's members disagreed on the raw component, so
    /// `component_raw` was chosen by majority vote rather than unanimous.
    pub component_raw_inferred: bool,
    /// Majority-vote component, canonicalized.
    pub component_canonical: String,
}

/// Builds the stable signature for one group, canonicalizing product area
/// and component through `registry` first.
///
/// Every member's raw product area/component is, by construction, already
/// PM-approved as belonging to this one coherent group: any raw spelling
/// that normalizes to something other than the majority-vote canonical is
/// registered as a new session alias, so later groups in this run (and, once
/// committed, later runs) fold the same synonym onto the same canonical.
#[must_use]
pub fn build_group_signature(members: &[StoryMember], registry: &mut SignatureRegistry) -> GroupSignature {
    let (action_type, direction, product_area_raw, component_raw, issue_slug) = majority_facets(members);
    let product_area_raw_inferred = !members.iter().all(|member| member.product_area_raw == product_area_raw);
    let component_raw_inferred = !members.iter().all(|member| member.component_raw == component_raw);
    let product_area_canonical = registry.canonicalize("product_area", &product_area_raw);
    let component_canonical = registry.canonicalize("component", &component_raw);
    register_group_aliases(registry, "product_area", members.iter().map(|member| member.product_area_raw.as_str()), &product_area_canonical);
    register_group_aliases(registry, "component", members.iter().map(|member| member.component_raw.as_str()), &component_canonical);
    let signature = build_signature(&action_type, &direction, &product_area_canonical, &component_canonical, &issue_slug);
    let title = story_title(&action_type, &direction, &product_area_canonical, &component_canonical);
    GroupSignature {
        signature,
        title,
        action_type,
        direction,
        product_area_raw,
        product_area_raw_inferred,
        product_area_canonical,
        component_raw,
        component_raw_inferred,
        component_canonical,
    }
}

/// A short, deterministic, human-readable label built from canonicalized
/// facets — no LLM call, so it's always available even when description
/// generation fails.
fn story_title(action_type: &str, direction: &str, product_area_canonical: &str, component_canonical: &str) -> String {
    let action = action_type.replace('_', " ");
    let direction = direction.replace('_', " ");
    format!("{component_canonical} {product_area_canonical}: {action} ({direction})")
}

/// Registers every raw value in `raws` that doesn't already normalize to
/// `canonical` as a new session alias under `kind`.
fn register_group_aliases<'a>(registry: &mut SignatureRegistry, kind: &str, raws: impl Iterator<Item = &'a str>, canonical: &str) {
    for raw in raws {
        if feedforward_core::canonicalize::canonicalize_format(raw) != canonical {
            registry.register_session_alias(kind, raw, canonical);
        }
    }
}

/// Assembles a story for `members` under `group_signature`: appends to an
/// existing story with the same signature, or creates a new one after
/// generating its description.
pub async fn assemble_story(
    store: &dyn RunStore,
    llm: &dyn LlmClient,
    group_signature: &GroupSignature,
    confidence_score: u8,
    members: &[StoryMember],
    run_id: RunId,
    timeout: Duration,
) -> Result<AssembledStory, feedforward_core::StoreError> {
    let now = Timestamp::now();
    let new_evidence: Vec<StoryEvidence> = members
        .iter()
        .map(|member| StoryEvidence { conversation_id: member.conversation_id.clone(), excerpt: member.excerpt.clone(), added_in_run: run_id })
        .collect();

    if let Some(mut existing) = store.find_story_by_signature(&group_signature.signature).await? {
        for evidence in new_evidence {
            existing.append_evidence(evidence, now);
        }
        store.save_story(&existing).await?;
        return Ok(AssembledStory { story: existing, newly_created: false, description_error: None });
    }

    let excerpts: Vec<String> = members.iter().map(|member| member.excerpt.clone()).collect();
    let (description, description_error) = match llm.generate_description(&excerpts, timeout).await {
        Ok(description) => (description, None),
        Err(err) => {
            tracing::warn!(run_id = %run_id, signature = group_signature.signature.as_str(), error = %err, "description generation failed, using fallback");
            (
                minimal_description(
                    &group_signature.action_type,
                    &group_signature.direction,
                    &group_signature.product_area_canonical,
                    &group_signature.component_canonical,
                ),
                Some("llm_error"),
            )
        }
    };

    let story = Story {
        id: StoryId::new(),
        signature: group_signature.signature.clone(),
        created_in_run: run_id,
        title: group_signature.title.clone(),
        product_area_raw: group_signature.product_area_raw.clone(),
        product_area_raw_inferred: group_signature.product_area_raw_inferred,
        product_area_canonical: group_signature.product_area_canonical.clone(),
        component_raw: group_signature.component_raw.clone(),
        component_raw_inferred: group_signature.component_raw_inferred,
        component_canonical: group_signature.component_canonical.clone(),
        description,
        confidence_score,
        evidence: new_evidence,
        created_at: now,
        updated_at: now,
    };
    store.save_story(&story).await?;
    Ok(AssembledStory { story, newly_created: true, description_error })
}

/// A minimal, templated description used when the LLM call fails; never
/// blocks story creation.
fn minimal_description(action_type: &str, direction: &str, product_area: &str, component: &str) -> String {
    format!("## Summary\n{action_type} ({direction}) affecting {product_area} / {component}.\n\n_Description generation failed; this is a fallback summary._")
}

/// Majority-vote facet values across `members`, plus an issue slug derived
/// from the most common symptom text.
fn majority_facets(members: &[StoryMember]) -> (String, String, String, String, String) {
    let action_type = mode_of(members.iter().map(|member| member.action_type.as_str()));
    let direction = mode_of(members.iter().map(|member| member.direction.as_str()));
    let product_area_raw = mode_of(members.iter().map(|member| member.product_area_raw.as_str()));
    let component_raw = mode_of(members.iter().map(|member| member.component_raw.as_str()));
    let symptom = mode_of(members.iter().map(|member| member.symptom.as_str()));
    let issue_slug = feedforward_core::canonicalize::slugify(&symptom);
    (action_type, direction, product_area_raw, component_raw, issue_slug)
}

/// The most frequent value in `values`, defaulting to an empty string for
/// an empty iterator (never reached by a quality-gate-approved group).
fn mode_of<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts.into_iter().max_by_key(|(_, count)| *count).map(|(value, _)| value.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test fixtures only")]

    use std::sync::Mutex;

    use async_trait::async_trait;
    use feedforward_core::ClassificationResult;
    use feedforward_core::ClusterCandidate;
    use feedforward_core::Conversation;
    use feedforward_core::Embedding;
    use feedforward_core::Facets;
    use feedforward_core::LlmError;
    use feedforward_core::Orphan;
    use feedforward_core::OrphanId;
    use feedforward_core::PipelineRun;
    use feedforward_core::PmReviewVerdict;
    use feedforward_core::RunId;
    use feedforward_core::SignatureId;
    use feedforward_core::Story;
    use feedforward_core::StoreError;
    use feedforward_core::canonicalize::AliasTable;
    use feedforward_core::canonicalize::SignatureRegistry;
    use serde_json::Value;

    use super::StoryMember;
    use super::assemble_story;
    use super::build_group_signature;

    struct NoOpLlm;

    #[async_trait]
    impl feedforward_core::LlmClient for NoOpLlm {
        async fn classify_stage1(&self, _customer_text: &str, _timeout: std::time::Duration) -> Result<Value, LlmError> {
            Err(LlmError::Transient("unused".to_string()))
        }
        async fn classify_stage2(&self, _transcript: &str, _timeout: std::time::Duration) -> Result<Value, LlmError> {
            Err(LlmError::Transient("unused".to_string()))
        }
        async fn extract_facets(&self, _transcript: &str, _timeout: std::time::Duration) -> Result<Value, LlmError> {
            Err(LlmError::Transient("unused".to_string()))
        }
        async fn pm_review(&self, _summaries: &[String], _timeout: std::time::Duration) -> Result<Value, LlmError> {
            Err(LlmError::Transient("unused".to_string()))
        }
        async fn generate_description(&self, _excerpts: &[String], _timeout: std::time::Duration) -> Result<String, LlmError> {
            Ok("## Summary\ngenerated".to_string())
        }
    }

    #[derive(Default)]
    struct FakeStore {
        stories: Mutex<Vec<Story>>,
    }

    #[async_trait]
    impl feedforward_core::RunStore for FakeStore {
        async fn save_run(&self, _run: &PipelineRun) -> Result<(), StoreError> {
            Ok(())
        }
        async fn load_run(&self, _id: RunId) -> Result<PipelineRun, StoreError> {
            Err(StoreError::NotFound("unused".to_string()))
        }
        async fn list_active_runs(&self) -> Result<Vec<PipelineRun>, StoreError> {
            Ok(Vec::new())
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
        async fn load_embeddings_and_facets(
            &self,
            _run_id: RunId,
        ) -> Result<Vec<(feedforward_core::ConversationId, Option<Embedding>, Option<Facets>)>, StoreError> {
            Ok(Vec::new())
        }
        async fn save_clusters(&self, _run_id: RunId, _clusters: &[ClusterCandidate]) -> Result<(), StoreError> {
            Ok(())
        }
        async fn save_pm_verdict(&self, _verdict: &PmReviewVerdict) -> Result<(), StoreError> {
            Ok(())
        }
        async fn find_story_by_signature(&self, signature: &SignatureId) -> Result<Option<Story>, StoreError> {
            Ok(self.stories.lock().unwrap().iter().find(|story| &story.signature == signature).cloned())
        }
        async fn save_story(&self, story: &Story) -> Result<(), StoreError> {
            let mut stories = self.stories.lock().unwrap();
            stories.retain(|existing| existing.id != story.id);
            stories.push(story.clone());
            Ok(())
        }
        async fn list_run_stories(&self, _run_id: RunId) -> Result<Vec<Story>, StoreError> {
            Ok(self.stories.lock().unwrap().clone())
        }
        async fn find_orphan_by_signature(&self, _signature: &SignatureId) -> Result<Option<Orphan>, StoreError> {
            Ok(None)
        }
        async fn save_orphan(&self, _orphan: &Orphan) -> Result<(), StoreError> {
            Ok(())
        }
        async fn delete_orphan(&self, _id: OrphanId) -> Result<(), StoreError> {
            Ok(())
        }
        async fn load_alias_table(&self) -> Result<Vec<(String, String, String)>, StoreError> {
            Ok(Vec::new())
        }
        async fn commit_aliases(&self, _aliases: &[(String, String, String)]) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn member(id: &str) -> StoryMember {
        StoryMember {
            conversation_id: feedforward_core::ConversationId::new(id),
            excerpt: format!("excerpt for {id}"),
            action_type: "bug_report".to_string(),
            direction: "deficit".to_string(),
            product_area_raw: "pins".to_string(),
            component_raw: "board".to_string(),
            symptom: "pins missing".to_string(),
        }
    }

    #[tokio::test]
    async fn second_call_with_same_signature_appends_rather_than_creates() {
        let store = FakeStore::default();
        let llm = NoOpLlm;
        let run_a = RunId::new();
        let mut registry = SignatureRegistry::load(run_a, AliasTable::new());
        let members_a = vec![member("c1"), member("c2"), member("c3")];
        let signature = build_group_signature(&members_a, &mut registry);

        let first = assemble_story(&store, &llm, &signature, 80, &members_a, run_a, std::time::Duration::from_secs(1)).await.unwrap();
        assert!(first.newly_created);

        let run_b = RunId::new();
        let mut registry_b = SignatureRegistry::load(run_b, AliasTable::new());
        let members_b = vec![member("c4")];
        let signature_b = build_group_signature(&members_b, &mut registry_b);
        assert_eq!(signature.signature, signature_b.signature);

        let second = assemble_story(&store, &llm, &signature_b, 80, &members_b, run_b, std::time::Duration::from_secs(1)).await.unwrap();
        assert!(!second.newly_created);
        assert_eq!(second.story.evidence.len(), 4);
    }

    #[test]
    fn minority_raw_spelling_is_registered_as_a_session_alias() {
        let mut registry = SignatureRegistry::load(RunId::new(), AliasTable::new());
        let members = vec![member("c1"), member("c2"), { let mut m = member("c3"); m.product_area_raw = "Pin's".to_string(); m }];

        let signature = build_group_signature(&members, &mut registry);
        assert_eq!(signature.product_area_canonical, "pins");
        assert_eq!(registry.canonicalize("product_area", "Pin's"), "pins");
        assert!(registry.session_aliases().iter().any(|(kind, raw, canonical)| kind == "product_area" && raw == "pin s" && canonical == "pins"));
    }
}
