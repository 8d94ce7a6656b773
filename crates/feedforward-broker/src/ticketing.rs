// feedforward-broker/src/ticketing.rs
// ============================================================================
// Module: HTTP Ticketing Source
// Description: HTTP-backed implementation of `TicketingSource`.
// Purpose: Page through a date-range search and fetch conversation detail
//          from a ticketing API, retrying transient failures.
// Dependencies: feedforward-core, feedforward-providers, reqwest, serde_json,
//               url
// ============================================================================

//! ## Overview
//! [`HttpTicketingSource`] is a thin, retrying client over one ticketing
//! API: paged search by open-date range, and per-conversation detail
//! fetch. A `429` response with `Retry-After` or a 5xx status is retried
//! with [`feedforward_providers::BackoffPolicy`]; any other 4xx status
//! aborts immediately since the request itself is malformed or
//! unauthorized and retrying cannot help.

use std::time::Duration;

use async_trait::async_trait;
use feedforward_core::Conversation;
use feedforward_core::ConversationId;
use feedforward_core::Timestamp;
use feedforward_core::interfaces::ConversationPage;
use feedforward_core::interfaces::TicketingError;
use feedforward_core::interfaces::TicketingSource;
use feedforward_providers::BackoffPolicy;
use feedforward_providers::HttpClientConfig;
use feedforward_providers::build_client;
use feedforward_providers::read_body_limited;
use reqwest::Client;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use serde_json::Value;

/// Configuration for [`HttpTicketingSource`].
#[derive(Debug, Clone)]
pub struct HttpTicketingConfig {
    /// Ticketing API base URL, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    /// Bearer token sent as `Authorization: Bearer <token>`.
    pub api_key: String,
    /// Number of conversation IDs requested per search page.
    pub page_size: u32,
    /// Retry/backoff policy for transient failures.
    pub backoff: BackoffPolicy,
    /// Shared HTTP client configuration.
    pub http: HttpClientConfig,
}

impl Default for HttpTicketingConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            page_size: 50,
            backoff: BackoffPolicy::default(),
            http: HttpClientConfig::default(),
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    conversation_ids: Vec<String>,
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct DetailResponse {
    source_url: String,
    opened_at_millis: i64,
    customer_messages: Vec<String>,
    support_messages: Vec<String>,
}

/// An HTTP-backed [`TicketingSource`].
pub struct HttpTicketingSource {
    client: Client,
    config: HttpTicketingConfig,
}

impl HttpTicketingSource {
    /// Builds a new source from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client fails to initialize.
    pub fn new(config: HttpTicketingConfig) -> Result<Self, reqwest::Error> {
        let client = build_client(&config.http)?;
        Ok(Self {
            client,
            config,
        })
    }

    async fn get_with_retry(&self, path: &str, query: &[(&str, String)]) -> Result<Value, TicketingError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = self.get_once(path, query).await;
            match outcome {
                Ok(value) => return Ok(value),
                Err(RetryableError::Permanent(err)) => return Err(err),
                Err(RetryableError::Transient {
                    retry_after,
                    err,
                }) => {
                    if attempt >= self.config.backoff.max_attempts {
                        return Err(err);
                    }
                    let delay = retry_after.unwrap_or_else(|| self.config.backoff.delay_for_attempt(attempt));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn get_once(&self, path: &str, query: &[(&str, String)]) -> Result<Value, RetryableError> {
        let url = format!("{}{path}", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .query(query)
            .send()
            .await
            .map_err(|err| RetryableError::Transient {
                retry_after: None,
                err: TicketingError::Transient(err.to_string()),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(&response);
            return Err(RetryableError::Transient {
                retry_after,
                err: TicketingError::RateLimited {
                    retry_after,
                },
            });
        }
        if status.is_server_error() {
            return Err(RetryableError::Transient {
                retry_after: None,
                err: TicketingError::Transient(format!("http status {status}")),
            });
        }
        if !status.is_success() {
            return Err(RetryableError::Permanent(TicketingError::Permanent(format!(
                "http status {status}"
            ))));
        }

        let raw = read_body_limited(response, self.config.http.max_response_bytes)
            .await
            .map_err(|err| RetryableError::Permanent(TicketingError::Permanent(err)))?;

        serde_json::from_slice(&raw)
            .map_err(|err| RetryableError::Permanent(TicketingError::Permanent(err.to_string())))
    }
}

enum RetryableError {
    Transient {
        retry_after: Option<Duration>,
        err: TicketingError,
    },
    Permanent(TicketingError),
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl TicketingSource for HttpTicketingSource {
    async fn search(
        &self,
        since: Timestamp,
        until: Timestamp,
        cursor: Option<String>,
    ) -> Result<ConversationPage, TicketingError> {
        let mut query = vec![
            ("since", since.as_millis().to_string()),
            ("until", until.as_millis().to_string()),
            ("page_size", self.config.page_size.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }
        let value = self.get_with_retry("/conversations/search", &query).await?;
        let parsed: SearchResponse = serde_json::from_value(value)
            .map_err(|err| TicketingError::Permanent(format!("malformed search response: {err}")))?;
        Ok(ConversationPage {
            conversation_ids: parsed.conversation_ids.into_iter().map(ConversationId::new).collect(),
            next_cursor: parsed.next_cursor,
        })
    }

    async fn fetch_detail(&self, id: &ConversationId) -> Result<Conversation, TicketingError> {
        let path = format!("/conversations/{}", id.as_str());
        let value = self.get_with_retry(&path, &[]).await?;
        let parsed: DetailResponse = serde_json::from_value(value)
            .map_err(|err| TicketingError::Permanent(format!("malformed detail response: {err}")))?;
        Ok(Conversation {
            id: id.clone(),
            source_url: parsed.source_url,
            opened_at: Timestamp::from_millis(parsed.opened_at_millis),
            customer_messages: parsed.customer_messages,
            support_messages: parsed.support_messages,
        })
    }
}
