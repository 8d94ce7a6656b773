// feedforward-providers/src/lib.rs
// ============================================================================
// Module: FeedForward Providers
// Description: HTTP-backed collaborator implementations.
// Purpose: Supply concrete `LlmClient` and `EmbeddingClient` implementations
//          plus the shared HTTP client and retry policy they build on.
// Dependencies: feedforward-core, reqwest, serde_json, tokio
// ============================================================================

//! ## Overview
//! This crate ships the HTTP-backed implementations of the external
//! collaborator traits declared in `feedforward-core::interfaces`: an
//! [`llm::HttpLlmClient`] and an [`embedding::HttpEmbeddingClient`], both
//! built on a shared hardened client ([`http::build_client`]) and a shared
//! backoff policy ([`retry::BackoffPolicy`]).

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod embedding;
pub mod http;
pub mod llm;
pub mod retry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use embedding::HttpEmbeddingClient;
pub use embedding::HttpEmbeddingConfig;
pub use http::HttpClientConfig;
pub use http::build_client;
pub use http::read_body_limited;
pub use llm::HttpLlmClient;
pub use llm::HttpLlmConfig;
pub use retry::BackoffPolicy;
pub use retry::RetryDecision;

#[cfg(test)]
mod tests {
    //! Test-only lint relaxations for panic-based assertions and debug output.
    #![allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )]
}
