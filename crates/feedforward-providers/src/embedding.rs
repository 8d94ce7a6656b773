// feedforward-providers/src/embedding.rs
// ============================================================================
// Module: HTTP Embedding Client
// Description: Batch embedding implementation of `EmbeddingClient`.
// Purpose: Turn conversation text into vectors for hybrid clustering.
// Dependencies: feedforward-core, reqwest, serde_json, tokio
// ============================================================================

//! ## Overview
//! One HTTP call embeds an entire batch; the response is expected to
//! preserve input order so callers can zip the result back onto the
//! conversations they submitted.

use std::time::Duration;

use async_trait::async_trait;
use feedforward_core::EmbeddingClient;
use feedforward_core::EmbeddingError;
use reqwest::Client;
use serde_json::Value;
use serde_json::json;

use crate::http::HttpClientConfig;
use crate::http::build_client;
use crate::http::read_body_limited;

/// Configuration for [`HttpEmbeddingClient`].
#[derive(Debug, Clone)]
pub struct HttpEmbeddingConfig {
    /// Batch embedding endpoint URL.
    pub endpoint: String,
    /// Bearer token sent as `Authorization: Bearer <token>`.
    pub api_key: String,
    /// Model identifier sent in the request body and reported by
    /// [`EmbeddingClient::model_version`].
    pub model: String,
    /// Shared HTTP client configuration.
    pub http: HttpClientConfig,
}

/// A batch-embedding-backed [`EmbeddingClient`].
pub struct HttpEmbeddingClient {
    client: Client,
    config: HttpEmbeddingConfig,
}

impl HttpEmbeddingClient {
    /// Builds a new client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client fails to initialize.
    pub fn new(config: HttpEmbeddingConfig) -> Result<Self, reqwest::Error> {
        let client = build_client(&config.http)?;
        Ok(Self {
            client,
            config,
        })
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed_batch(&self, texts: &[String], timeout: Duration) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = json!({
            "model": self.config.model,
            "input": texts,
        });

        let request = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body);

        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| EmbeddingError::Timeout)?
            .map_err(|err| EmbeddingError::Transient(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(EmbeddingError::Transient(format!("http status {status}")));
        }

        let raw = read_body_limited(response, self.config.http.max_response_bytes)
            .await
            .map_err(EmbeddingError::Transient)?;

        let parsed: Value = serde_json::from_slice(&raw)
            .map_err(|err| EmbeddingError::Transient(format!("malformed embedding response: {err}")))?;

        let vectors = parsed
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| EmbeddingError::Transient("missing data array".to_string()))?;

        vectors
            .iter()
            .map(|entry| {
                entry
                    .get("embedding")
                    .and_then(Value::as_array)
                    .map(|vec| {
                        vec.iter()
                            .map(|component| component.as_f64().unwrap_or(0.0) as f32)
                            .collect()
                    })
                    .ok_or_else(|| EmbeddingError::Transient("missing embedding field".to_string()))
            })
            .collect()
    }

    fn model_version(&self) -> &str {
        &self.config.model
    }
}
