// feedforward-pipeline/src/extract.rs
// ============================================================================
// Module: Embedding & Facet Extractor
// Description: Batch embeddings and single-call structured facets.
// Purpose: Produce the per-conversation inputs hybrid clustering needs.
// Dependencies: feedforward-core, serde_json
// ============================================================================

//! ## Overview
//! Runs over the pipeline-eligible subset of a run's classifications. One
//! batched embedding call covers every eligible conversation; facets are
//! extracted with one structured-output call per conversation. Vocabulary
//! fields outside the enumerated sets are coerced rather than rejected.

use std::time::Duration;

use feedforward_core::Conversation;
use feedforward_core::Embedding;
use feedforward_core::EmbeddingClient;
use feedforward_core::Facets;
use feedforward_core::LlmClient;
use feedforward_core::RunId;
use serde_json::Value;

const ACTION_TYPES: [&str; 6] = ["inquiry", "complaint", "bug_report", "how_to", "feature_request", "other"];
const DIRECTIONS: [&str; 7] = ["excess", "deficit", "creation", "deletion", "modification", "performance", "neutral"];

/// Embeds every `conversations` text in one batched call.
///
/// # Errors
///
/// Returns the embedding client's error when the batch call fails; the
/// caller records it under the `llm_error`-adjacent category and continues
/// with an empty embedding set for this run.
pub async fn embed_conversations<E: EmbeddingClient + ?Sized>(
    embedding: &E,
    conversations: &[Conversation],
    run_id: RunId,
    timeout: Duration,
) -> Result<Vec<Embedding>, feedforward_core::EmbeddingError> {
    if conversations.is_empty() {
        return Ok(Vec::new());
    }
    let texts: Vec<String> = conversations.iter().map(Conversation::full_transcript).collect();
    let vectors = embedding.embed_batch(&texts, timeout).await?;
    let model_version = embedding.model_version().to_string();
    Ok(conversations
        .iter()
        .zip(vectors)
        .map(|(conversation, vector)| Embedding {
            conversation_id: conversation.id.clone(),
            run_id,
            vector,
            model_version: model_version.clone(),
        })
        .collect())
}

/// Extracts facets for one conversation, coercing out-of-vocabulary values.
///
/// A failed call is reported via the returned `error_category` rather than
/// propagated; no `Facets` record is produced in that case.
pub async fn extract_facets<L: LlmClient + ?Sized>(
    llm: &L,
    conversation: &Conversation,
    run_id: RunId,
    timeout: Duration,
) -> (Option<Facets>, Option<&'static str>) {
    let transcript_with_source = format!("{}\n\nsource: {}", conversation.full_transcript(), conversation.source_url);
    match llm.extract_facets(&transcript_with_source, timeout).await {
        Ok(value) => (Some(facets_from_value(&value, conversation, run_id)), None),
        Err(err) => {
            tracing::warn!(run_id = %run_id, conversation_id = %conversation.id, error = %err, "facet extraction failed");
            (None, Some("llm_error"))
        }
    }
}

fn facets_from_value(value: &Value, conversation: &Conversation, run_id: RunId) -> Facets {
    let action_type = coerce_enum(value.get("action_type").and_then(Value::as_str), &ACTION_TYPES, "other");
    let direction = coerce_enum(value.get("direction").and_then(Value::as_str), &DIRECTIONS, "neutral");
    Facets {
        conversation_id: conversation.id.clone(),
        run_id,
        action_type,
        direction,
        product_area_raw: str_field(value, "product_area"),
        component_raw: str_field(value, "component"),
        symptom: str_field(value, "symptom"),
        resolution_action: opt_str_field(value, "resolution_action"),
        root_cause: opt_str_field(value, "root_cause"),
        solution_provided: value.get("solution_provided").and_then(Value::as_bool).unwrap_or(false),
        resolution_category: opt_str_field(value, "resolution_category"),
    }
}

fn coerce_enum(raw: Option<&str>, vocabulary: &[&str], fallback: &str) -> String {
    match raw {
        Some(value) if vocabulary.contains(&value) => value.to_string(),
        _ => fallback.to_string(),
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn opt_str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test fixtures only")]

    use std::sync::Mutex;

    use async_trait::async_trait;
    use feedforward_core::ConversationId;
    use feedforward_core::LlmError;
    use feedforward_core::RunId;
    use feedforward_core::Timestamp;
    use serde_json::Value;
    use serde_json::json;

    use super::extract_facets;
    use super::facets_from_value;

    struct RecordingLlm {
        seen_transcript: Mutex<String>,
    }

    #[async_trait]
    impl feedforward_core::LlmClient for RecordingLlm {
        async fn classify_stage1(&self, _customer_text: &str, _timeout: std::time::Duration) -> Result<Value, LlmError> {
            Err(LlmError::Transient("unused in this test".to_string()))
        }

        async fn classify_stage2(&self, _transcript: &str, _timeout: std::time::Duration) -> Result<Value, LlmError> {
            Err(LlmError::Transient("unused in this test".to_string()))
        }

        async fn extract_facets(&self, transcript: &str, _timeout: std::time::Duration) -> Result<Value, LlmError> {
            *self.seen_transcript.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = transcript.to_string();
            Ok(json!({"action_type": "bug_report", "direction": "deficit", "product_area": "legacy_publisher"}))
        }

        async fn pm_review(&self, _summaries: &[String], _timeout: std::time::Duration) -> Result<Value, LlmError> {
            Err(LlmError::Transient("unused in this test".to_string()))
        }

        async fn generate_description(&self, _excerpts: &[String], _timeout: std::time::Duration) -> Result<String, LlmError> {
            Err(LlmError::Transient("unused in this test".to_string()))
        }
    }

    fn conversation() -> feedforward_core::Conversation {
        feedforward_core::Conversation {
            id: ConversationId::new("c1"),
            source_url: "https://support.example.com/c1".to_string(),
            opened_at: Timestamp::from_millis(0),
            customer_messages: vec!["pins are missing".to_string()],
            support_messages: vec![],
        }
    }

    #[test]
    fn out_of_vocabulary_action_type_coerces_to_other() {
        let value = json!({"action_type": "sorcery", "direction": "deficit"});
        let facets = facets_from_value(&value, &conversation(), RunId::new());
        assert_eq!(facets.action_type, "other");
        assert_eq!(facets.direction, "deficit");
    }

    #[test]
    fn out_of_vocabulary_direction_coerces_to_neutral() {
        let value = json!({"action_type": "bug_report", "direction": "sideways"});
        let facets = facets_from_value(&value, &conversation(), RunId::new());
        assert_eq!(facets.direction, "neutral");
    }

    #[tokio::test]
    async fn facet_extraction_input_includes_source_url() {
        let llm = RecordingLlm { seen_transcript: Mutex::new(String::new()) };
        let (facets, error) = extract_facets(&llm, &conversation(), RunId::new(), std::time::Duration::from_secs(1)).await;
        assert!(error.is_none());
        assert!(facets.is_some());
        let seen = llm.seen_transcript.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert!(seen.contains(&conversation().source_url), "facet extraction input must carry source_url for product-area disambiguation");
    }
}
