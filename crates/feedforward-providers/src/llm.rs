// feedforward-providers/src/llm.rs
// ============================================================================
// Module: HTTP LLM Client
// Description: Chat-completion-backed implementation of `LlmClient`.
// Purpose: Drive stage-1/stage-2 classification, facet extraction, PM
//          review, and description generation through one HTTP endpoint.
// Dependencies: feedforward-core, reqwest, serde_json, tokio
// ============================================================================

//! ## Overview
//! Every call is one suspension point: a JSON chat-completion request,
//! raced against the caller-supplied timeout. A response that fails to
//! parse as JSON is retried exactly once with an amended "return JSON
//! only" instruction; a second failure surfaces as
//! [`LlmError::Malformed`] rather than being silently coerced.

use std::time::Duration;

use async_trait::async_trait;
use feedforward_core::LlmClient;
use feedforward_core::LlmError;
use reqwest::Client;
use serde_json::Value;
use serde_json::json;

use crate::http::HttpClientConfig;
use crate::http::build_client;
use crate::http::read_body_limited;

/// Configuration for [`HttpLlmClient`].
#[derive(Debug, Clone)]
pub struct HttpLlmConfig {
    /// Chat-completion endpoint URL.
    pub endpoint: String,
    /// Bearer token sent as `Authorization: Bearer <token>`.
    pub api_key: String,
    /// Model identifier sent in the request body.
    pub model: String,
    /// Sampling temperature; low by default for structured output tasks.
    pub temperature: f32,
    /// Shared HTTP client configuration (timeout is overridden per call).
    pub http: HttpClientConfig,
}

/// A chat-completion-backed [`LlmClient`].
pub struct HttpLlmClient {
    client: Client,
    config: HttpLlmConfig,
}

impl HttpLlmClient {
    /// Builds a new client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client fails to initialize.
    pub fn new(config: HttpLlmConfig) -> Result<Self, reqwest::Error> {
        let client = build_client(&config.http)?;
        Ok(Self {
            client,
            config,
        })
    }

    async fn call_chat_json(&self, system: &str, user: &str, timeout: Duration) -> Result<Value, LlmError> {
        match self.send_chat(system, user, timeout).await {
            Ok(value) => Ok(value),
            Err(LlmError::Malformed(_)) => {
                let prompt = format!("{user}\n\nReturn ONLY valid JSON, no prose, no markdown fences.");
                self.send_chat(system, &prompt, timeout).await
            }
            Err(other) => Err(other),
        }
    }

    async fn send_chat(&self, system: &str, user: &str, timeout: Duration) -> Result<Value, LlmError> {
        let body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let request = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body);

        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|err| LlmError::Transient(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(LlmError::Transient(format!("http status {status}")));
        }

        let raw = read_body_limited(response, self.config.http.max_response_bytes)
            .await
            .map_err(LlmError::Transient)?;

        serde_json::from_slice::<Value>(&raw).map_err(|err| LlmError::Malformed(err.to_string()))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn classify_stage1(&self, customer_text: &str, timeout: Duration) -> Result<Value, LlmError> {
        self.call_chat_json(
            "Classify this customer support message as product_issue, feature_request, \
             or other. Respond with JSON: {\"type\": ..., \"actionable\": bool, \"confidence\": 0..1}.",
            customer_text,
            timeout,
        )
        .await
    }

    async fn classify_stage2(&self, transcript: &str, timeout: Duration) -> Result<Value, LlmError> {
        self.call_chat_json(
            "Given the full support transcript, classify as product_issue, feature_request, \
             how_to_question, or other. Respond with JSON: {\"type\": ..., \"actionable\": bool, \
             \"confidence\": 0..1, \"changed_from_stage1\": bool}.",
            transcript,
            timeout,
        )
        .await
    }

    async fn extract_facets(&self, transcript: &str, timeout: Duration) -> Result<Value, LlmError> {
        self.call_chat_json(
            "Extract structured facets from this support transcript. Respond with JSON: \
             {\"action_type\":..,\"direction\":..,\"product_area\":..,\"component\":..,\"symptom\":..,\
             \"resolution_action\":..|null,\"root_cause\":..|null,\"solution_provided\":bool,\
             \"resolution_category\":..|null}.",
            transcript,
            timeout,
        )
        .await
    }

    async fn pm_review(&self, cluster_summaries: &[String], timeout: Duration) -> Result<Value, LlmError> {
        let joined = cluster_summaries.join("\n---\n");
        self.call_chat_json(
            "Would ONE implementation fix ALL of the conversations below? Respond with JSON: \
             {\"verdict\": \"keep_together\"|\"split\"|\"reject\", \"subgroups\": [[ids...]], \
             \"rationale\": ..}.",
            &joined,
            timeout,
        )
        .await
    }

    async fn generate_description(&self, evidence_excerpts: &[String], timeout: Duration) -> Result<String, LlmError> {
        let joined = evidence_excerpts.join("\n---\n");
        let value = self
            .call_chat_json(
                "Write an INVEST-style story description (independent, negotiable, valuable, \
                 estimable, small, testable) covering the common issue in the excerpts below. \
                 Respond with JSON: {\"description\": ..}.",
                &joined,
                timeout,
            )
            .await?;
        value
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| LlmError::Malformed("missing description field".to_string()))
    }
}
