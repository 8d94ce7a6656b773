// feedforward-providers/src/http.rs
// ============================================================================
// Module: HTTP Client
// Description: Shared async HTTP client builder for external collaborators.
// Purpose: Provide one hardened reqwest client for LLM/embedding providers.
// Dependencies: reqwest
// ============================================================================

//! ## Overview
//! All outbound provider calls share one client configuration: TLS-only,
//! redirects disabled, a bounded response size, and a default timeout that
//! callers override per-request via [`crate::retry`] and the caller-supplied
//! `Duration` on each trait method. Security posture: provider responses are
//! untrusted input and are size-checked before JSON parsing.

use std::time::Duration;

use reqwest::Client;
use reqwest::redirect::Policy;

/// Configuration for the shared provider HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpClientConfig {
    /// Default request timeout, overridden per-call where the trait allows.
    pub default_timeout: Duration,
    /// Maximum response body size accepted from a provider.
    pub max_response_bytes: usize,
    /// User agent string sent with every request.
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_response_bytes: 10 * 1024 * 1024,
            user_agent: "feedforward-pipeline/0.1".to_string(),
        }
    }
}

/// Builds the shared hardened client used by every HTTP-backed provider.
///
/// # Errors
///
/// Returns an error when the underlying TLS backend fails to initialize.
pub fn build_client(config: &HttpClientConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(config.default_timeout)
        .user_agent(config.user_agent.clone())
        .redirect(Policy::none())
        .build()
}

/// Reads a response body while enforcing `max_bytes`, returning an error
/// description rather than panicking on truncation or oversize bodies.
///
/// # Errors
///
/// Returns an error when the declared or actual body size exceeds `max_bytes`,
/// or the body cannot be read.
pub async fn read_body_limited(
    response: reqwest::Response,
    max_bytes: usize,
) -> Result<Vec<u8>, String> {
    if let Some(len) = response.content_length() {
        if usize::try_from(len).unwrap_or(usize::MAX) > max_bytes {
            return Err(format!("response declares {len} bytes, exceeds limit {max_bytes}"));
        }
    }
    let bytes = response.bytes().await.map_err(|err| err.to_string())?;
    if bytes.len() > max_bytes {
        return Err(format!("response body is {} bytes, exceeds limit {max_bytes}", bytes.len()));
    }
    Ok(bytes.to_vec())
}
