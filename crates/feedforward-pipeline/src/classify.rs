// feedforward-pipeline/src/classify.rs
// ============================================================================
// Module: Two-Stage Classifier
// Description: Fast routing pass plus refined transcript analysis.
// Purpose: Turn a raw conversation into one or two ClassificationResults.
// Dependencies: feedforward-core, serde_json
// ============================================================================

//! ## Overview
//! Stage 1 classifies customer-facing text only; stage 2 runs only when the
//! conversation already has a support reply, over the full transcript. A
//! failed LLM call never aborts the run: it produces a conservative
//! `Other`/non-actionable result and reports a category for `error_summary`.

use std::time::Duration;

use feedforward_core::ClassificationResult;
use feedforward_core::ClassificationStage;
use feedforward_core::Conversation;
use feedforward_core::ConversationType;
use feedforward_core::LlmClient;
use feedforward_core::RunId;
use serde_json::Value;

/// The result of classifying one conversation: the stage results produced,
/// plus an `error_summary` category if any LLM call failed.
#[derive(Debug, Clone, Default)]
pub struct ClassifyOutcome {
    /// One result for stage 1, and a second for stage 2 when it ran.
    pub results: Vec<ClassificationResult>,
    /// Category to record in the run's error summary, if a call failed.
    pub error_category: Option<&'static str>,
}

/// Runs stage 1 (and stage 2, when a support reply exists) for `conversation`.
pub async fn classify_conversation<L: LlmClient + ?Sized>(
    llm: &L,
    conversation: &Conversation,
    run_id: RunId,
    timeout: Duration,
) -> ClassifyOutcome {
    let mut outcome = ClassifyOutcome::default();

    let stage1_type = match llm.classify_stage1(&conversation.customer_facing_text(), timeout).await {
        Ok(value) => parse_conversation_type(&value),
        Err(err) => {
            tracing::warn!(run_id = %run_id, conversation_id = %conversation.id, error = %err, "stage1 classification failed");
            outcome.error_category = Some("llm_error");
            ConversationType::Other
        }
    };
    let stage1_confidence = (stage1_type != ConversationType::Other).then_some(0.6_f32);
    outcome.results.push(ClassificationResult {
        conversation_id: conversation.id.clone(),
        run_id,
        stage: ClassificationStage::Stage1,
        conversation_type: stage1_type,
        actionable: is_actionable(stage1_type),
        confidence: stage1_confidence,
        classification_changed: false,
    });

    if conversation.has_support_response() {
        let stage2_type = match llm.classify_stage2(&conversation.full_transcript(), timeout).await {
            Ok(value) => parse_conversation_type(&value),
            Err(err) => {
                tracing::warn!(run_id = %run_id, conversation_id = %conversation.id, error = %err, "stage2 classification failed");
                outcome.error_category = Some("llm_error");
                stage1_type
            }
        };
        outcome.results.push(ClassificationResult {
            conversation_id: conversation.id.clone(),
            run_id,
            stage: ClassificationStage::Stage2,
            conversation_type: stage2_type,
            actionable: is_actionable(stage2_type),
            confidence: stage1_confidence,
            classification_changed: stage2_type != stage1_type,
        });
    }

    outcome
}

/// Whether a conversation type is treated as actionable support content, per
/// the glossary's `{product_issue, feature_request, how_to_question}` set.
const fn is_actionable(conversation_type: ConversationType) -> bool {
    !matches!(conversation_type, ConversationType::Other)
}

/// Parses the `type` field of a stage-1/stage-2 LLM response, defaulting any
/// value outside the recognized set to [`ConversationType::Other`].
fn parse_conversation_type(value: &Value) -> ConversationType {
    match value.get("type").and_then(Value::as_str).unwrap_or("other") {
        "product_issue" => ConversationType::ProductIssue,
        "feature_request" => ConversationType::FeatureRequest,
        "how_to_question" => ConversationType::HowToQuestion,
        _ => ConversationType::Other,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test fixtures only")]

    use async_trait::async_trait;
    use feedforward_core::ConversationId;
    use feedforward_core::ConversationType;
    use feedforward_core::LlmError;
    use feedforward_core::RunId;
    use feedforward_core::Timestamp;
    use serde_json::Value;
    use serde_json::json;

    use super::classify_conversation;

    struct ScriptedLlm {
        stage1: Result<Value, LlmError>,
        stage2: Result<Value, LlmError>,
    }

    #[async_trait]
    impl feedforward_core::LlmClient for ScriptedLlm {
        async fn classify_stage1(&self, _customer_text: &str, _timeout: std::time::Duration) -> Result<Value, LlmError> {
            self.stage1.clone()
        }

        async fn classify_stage2(&self, _transcript: &str, _timeout: std::time::Duration) -> Result<Value, LlmError> {
            self.stage2.clone()
        }

        async fn extract_facets(&self, _transcript: &str, _timeout: std::time::Duration) -> Result<Value, LlmError> {
            Err(LlmError::Transient("unused in this test".to_string()))
        }

        async fn pm_review(&self, _summaries: &[String], _timeout: std::time::Duration) -> Result<Value, LlmError> {
            Err(LlmError::Transient("unused in this test".to_string()))
        }

        async fn generate_description(&self, _excerpts: &[String], _timeout: std::time::Duration) -> Result<String, LlmError> {
            Err(LlmError::Transient("unused in this test".to_string()))
        }
    }

    fn conversation(support: Vec<String>) -> feedforward_core::Conversation {
        feedforward_core::Conversation {
            id: ConversationId::new("c1"),
            source_url: "https://support.example.com/c1".to_string(),
            opened_at: Timestamp::from_millis(0),
            customer_messages: vec!["pins are missing".to_string()],
            support_messages: support,
        }
    }

    #[tokio::test]
    async fn stage2_only_runs_when_support_response_exists() {
        let llm = ScriptedLlm {
            stage1: Ok(json!({"type": "product_issue"})),
            stage2: Ok(json!({"type": "product_issue"})),
        };
        let outcome = classify_conversation(&llm, &conversation(vec![]), RunId::new(), std::time::Duration::from_secs(1)).await;
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn stage2_override_sets_classification_changed() {
        let llm = ScriptedLlm {
            stage1: Ok(json!({"type": "product_issue"})),
            stage2: Ok(json!({"type": "how_to_question"})),
        };
        let outcome = classify_conversation(
            &llm,
            &conversation(vec!["try this workaround".to_string()]),
            RunId::new(),
            std::time::Duration::from_secs(1),
        )
        .await;
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results[1].classification_changed);
        assert_eq!(outcome.results[1].conversation_type, ConversationType::HowToQuestion);
    }

    #[tokio::test]
    async fn failed_stage1_call_is_non_actionable_and_tallied() {
        let llm = ScriptedLlm {
            stage1: Err(LlmError::Timeout),
            stage2: Ok(json!({"type": "product_issue"})),
        };
        let outcome = classify_conversation(&llm, &conversation(vec![]), RunId::new(), std::time::Duration::from_secs(1)).await;
        assert_eq!(outcome.error_category, Some("llm_error"));
        assert!(!outcome.results[0].actionable);
    }
}
