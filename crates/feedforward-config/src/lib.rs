// feedforward-config/src/lib.rs
// ============================================================================
// Module: FeedForward Config Library
// Description: Canonical pipeline tuning configuration.
// Purpose: Single source of truth for every tunable named across the
//          pipeline, loaded from TOML with fail-closed validation.
// Dependencies: feedforward-core, feedforward-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `feedforward-config` defines [`config::PipelineConfig`], loaded from a
//! TOML file with strict size limits and `serde`-validated defaults for
//! every tunable: concurrency, timeouts, clustering thresholds, quality
//! gate scoring weights, retry ceilings, and collaborator endpoints.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ClusteringConfig;
pub use config::ConcurrencyConfig;
pub use config::ConfidenceWeights;
pub use config::ConfigError;
pub use config::EmbeddingEndpointConfig;
pub use config::LlmEndpointConfig;
pub use config::PipelineConfig;
pub use config::QualityGateConfig;
pub use config::RetryConfig;
pub use config::StoreConfig;
pub use config::TicketingEndpointConfig;
