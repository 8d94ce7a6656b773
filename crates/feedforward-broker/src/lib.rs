// feedforward-broker/src/lib.rs
// ============================================================================
// Module: FeedForward Broker
// Description: Ticketing-source collaborator implementation.
// Purpose: Fetch conversations from one ticketing API through a paged
//          search and a per-conversation detail call.
// Dependencies: feedforward-core, feedforward-providers, reqwest, tokio, url
// ============================================================================

//! ## Overview
//! This crate ships [`ticketing::HttpTicketingSource`], the one concrete
//! implementation of `feedforward_core::interfaces::TicketingSource`
//! this pipeline uses. Pagination, rate-limit backoff, and timeout
//! handling live here; bounding how many conversations are fetched
//! concurrently is the orchestrator's job, not this crate's.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod ticketing;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use ticketing::HttpTicketingConfig;
pub use ticketing::HttpTicketingSource;
