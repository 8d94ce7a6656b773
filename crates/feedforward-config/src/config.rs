// feedforward-config/src/config.rs
// ============================================================================
// Module: Pipeline Configuration
// Description: Configuration loading and validation for the pipeline.
// Purpose: Provide one tunable source of truth, loaded from TOML with
//          environment-variable overrides and fail-closed validation.
// Dependencies: feedforward-core, feedforward-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! [`PipelineConfig`] is the single source of truth for every tunable named
//! across the pipeline: concurrency, per-collaborator timeouts, clustering
//! and quality-gate thresholds, and collaborator endpoint settings.
//! Configuration is loaded from a TOML file with strict size limits and
//! fails closed on malformed or out-of-range values rather than silently
//! clamping them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use feedforward_store_sqlite::SqliteStoreMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "feedforward.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "FEEDFORWARD_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;

const fn default_concurrency_limit() -> usize {
    20
}
const fn default_llm_timeout_secs() -> u64 {
    30
}
const fn default_embedding_timeout_secs() -> u64 {
    60
}
const fn default_cluster_distance_threshold() -> f32 {
    0.5
}
const fn default_min_group_size() -> usize {
    3
}
const fn default_evidence_coverage_threshold() -> f32 {
    0.6
}
const fn default_confidence_score_threshold() -> u8 {
    50
}
const fn default_fetch_failure_threshold() -> f32 {
    0.5
}
const fn default_dry_run_preview_cache_size() -> usize {
    5
}
const fn default_retry_max_attempts() -> u32 {
    5
}
const fn default_retry_base_ms() -> u64 {
    200
}
const fn default_retry_cap_ms() -> u64 {
    30_000
}
const fn default_ticketing_page_size() -> u32 {
    50
}

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// The pipeline's complete tuning configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Bounded-concurrency and per-collaborator timeout settings.
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Hybrid clustering thresholds.
    #[serde(default)]
    pub clustering: ClusteringConfig,
    /// Quality gate thresholds and scoring weights.
    #[serde(default)]
    pub quality_gate: QualityGateConfig,
    /// Retry/backoff ceilings shared by every HTTP collaborator.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Ticketing source connection settings.
    pub ticketing: TicketingEndpointConfig,
    /// LLM provider connection settings.
    pub llm: LlmEndpointConfig,
    /// Embedding provider connection settings.
    pub embedding: EmbeddingEndpointConfig,
    /// `SQLite` run store settings.
    #[serde(default)]
    pub store: StoreConfig,
}

impl PipelineConfig {
    /// Loads configuration from disk using the default resolution rules:
    /// an explicit `path`, then the `FEEDFORWARD_CONFIG` environment
    /// variable, then `feedforward.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path);
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every tunable for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when any field is out of its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.concurrency.validate()?;
        self.clustering.validate()?;
        self.quality_gate.validate()?;
        self.retry.validate()?;
        self.ticketing.validate()?;
        self.llm.validate()?;
        self.embedding.validate()?;
        self.store.validate()?;
        Ok(())
    }
}

/// Bounded-concurrency and per-collaborator timeout settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    /// Maximum concurrent in-flight calls per phase, gated by a semaphore.
    #[serde(default = "default_concurrency_limit")]
    pub limit: usize,
    /// Timeout for each LLM call, in seconds.
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    /// Timeout for each embedding call, in seconds.
    #[serde(default = "default_embedding_timeout_secs")]
    pub embedding_timeout_secs: u64,
    /// Fraction of a fetch page's conversations that may fail before the
    /// fetching phase itself is treated as failed.
    #[serde(default = "default_fetch_failure_threshold")]
    pub fetch_failure_threshold: f32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            limit: default_concurrency_limit(),
            llm_timeout_secs: default_llm_timeout_secs(),
            embedding_timeout_secs: default_embedding_timeout_secs(),
            fetch_failure_threshold: default_fetch_failure_threshold(),
        }
    }
}

impl ConcurrencyConfig {
    /// Validates concurrency configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.limit == 0 {
            return Err(ConfigError::Invalid("concurrency.limit must be greater than zero".to_string()));
        }
        if self.llm_timeout_secs == 0 {
            return Err(ConfigError::Invalid("concurrency.llm_timeout_secs must be greater than zero".to_string()));
        }
        if self.embedding_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "concurrency.embedding_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fetch_failure_threshold) {
            return Err(ConfigError::Invalid(
                "concurrency.fetch_failure_threshold must be within [0.0, 1.0]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Hybrid clustering thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusteringConfig {
    /// Fixed cosine-distance threshold for agglomerative clustering.
    #[serde(default = "default_cluster_distance_threshold")]
    pub distance_threshold: f32,
    /// Minimum members a cluster must retain after PM review to become a
    /// story rather than route to orphan accumulation.
    #[serde(default = "default_min_group_size")]
    pub min_group_size: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            distance_threshold: default_cluster_distance_threshold(),
            min_group_size: default_min_group_size(),
        }
    }
}

impl ClusteringConfig {
    /// Validates clustering configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.distance_threshold) {
            return Err(ConfigError::Invalid(
                "clustering.distance_threshold must be within [0.0, 1.0]".to_string(),
            ));
        }
        if self.min_group_size == 0 {
            return Err(ConfigError::Invalid("clustering.min_group_size must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// Named weights for the quality gate's confidence scorer, calibrated from
/// PM review correlation and kept tunable rather than hardcoded.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ConfidenceWeights {
    /// Weight of embedding cosine similarity.
    #[serde(default = "ConfidenceWeights::default_embedding_similarity")]
    pub embedding_similarity: f32,
    /// Weight of intent similarity.
    #[serde(default = "ConfidenceWeights::default_intent_similarity")]
    pub intent_similarity: f32,
    /// Weight of intent homogeneity across cluster members.
    #[serde(default = "ConfidenceWeights::default_intent_homogeneity")]
    pub intent_homogeneity: f32,
    /// Weight of symptom overlap across cluster members.
    #[serde(default = "ConfidenceWeights::default_symptom_overlap")]
    pub symptom_overlap: f32,
    /// Weight of product-area agreement.
    #[serde(default = "ConfidenceWeights::default_product_match")]
    pub product_match: f32,
    /// Weight of component agreement.
    #[serde(default = "ConfidenceWeights::default_component_match")]
    pub component_match: f32,
    /// Weight of platform uniformity.
    #[serde(default = "ConfidenceWeights::default_platform_uniformity")]
    pub platform_uniformity: f32,
}

impl ConfidenceWeights {
    const fn default_embedding_similarity() -> f32 {
        0.30
    }
    const fn default_intent_similarity() -> f32 {
        0.20
    }
    const fn default_intent_homogeneity() -> f32 {
        0.15
    }
    const fn default_symptom_overlap() -> f32 {
        0.10
    }
    const fn default_product_match() -> f32 {
        0.10
    }
    const fn default_component_match() -> f32 {
        0.10
    }
    const fn default_platform_uniformity() -> f32 {
        0.05
    }

    /// Returns the sum of all seven weights, expected to be `1.0`.
    #[must_use]
    pub fn total(&self) -> f32 {
        self.embedding_similarity
            + self.intent_similarity
            + self.intent_homogeneity
            + self.symptom_overlap
            + self.product_match
            + self.component_match
            + self.platform_uniformity
    }
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            embedding_similarity: Self::default_embedding_similarity(),
            intent_similarity: Self::default_intent_similarity(),
            intent_homogeneity: Self::default_intent_homogeneity(),
            symptom_overlap: Self::default_symptom_overlap(),
            product_match: Self::default_product_match(),
            component_match: Self::default_component_match(),
            platform_uniformity: Self::default_platform_uniformity(),
        }
    }
}

/// Quality gate thresholds and scoring weights.
#[derive(Debug, Clone, Deserialize)]
pub struct QualityGateConfig {
    /// Minimum fraction of evidence samples that must be valid (non-placeholder
    /// `id`, non-empty `excerpt`) for a cluster to pass evidence validation.
    #[serde(default = "default_evidence_coverage_threshold")]
    pub evidence_coverage_threshold: f32,
    /// Minimum confidence score, in `[0, 100]`, required to pass the gate.
    #[serde(default = "default_confidence_score_threshold")]
    pub confidence_score_threshold: u8,
    /// Component weights for the confidence scorer.
    #[serde(default)]
    pub confidence_weights: ConfidenceWeights,
    /// Bound on the number of clusters held in the dry-run preview cache.
    #[serde(default = "default_dry_run_preview_cache_size")]
    pub dry_run_preview_cache_size: usize,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            evidence_coverage_threshold: default_evidence_coverage_threshold(),
            confidence_score_threshold: default_confidence_score_threshold(),
            confidence_weights: ConfidenceWeights::default(),
            dry_run_preview_cache_size: default_dry_run_preview_cache_size(),
        }
    }
}

impl QualityGateConfig {
    /// Validates quality gate configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.evidence_coverage_threshold) {
            return Err(ConfigError::Invalid(
                "quality_gate.evidence_coverage_threshold must be within [0.0, 1.0]".to_string(),
            ));
        }
        if self.confidence_score_threshold > 100 {
            return Err(ConfigError::Invalid(
                "quality_gate.confidence_score_threshold must be within [0, 100]".to_string(),
            ));
        }
        let total = self.confidence_weights.total();
        if (total - 1.0).abs() > 0.01 {
            return Err(ConfigError::Invalid(format!(
                "quality_gate.confidence_weights must sum to 1.0, got {total}"
            )));
        }
        if self.dry_run_preview_cache_size == 0 {
            return Err(ConfigError::Invalid(
                "quality_gate.dry_run_preview_cache_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry/backoff ceilings shared by every HTTP collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts before giving up on a transient failure.
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    /// Base delay, in milliseconds, for exponential backoff.
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    /// Maximum delay, in milliseconds, backoff may reach.
    #[serde(default = "default_retry_cap_ms")]
    pub cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_ms: default_retry_base_ms(),
            cap_ms: default_retry_cap_ms(),
        }
    }
}

impl RetryConfig {
    /// Validates retry configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be greater than zero".to_string()));
        }
        if self.base_ms == 0 {
            return Err(ConfigError::Invalid("retry.base_ms must be greater than zero".to_string()));
        }
        if self.cap_ms < self.base_ms {
            return Err(ConfigError::Invalid("retry.cap_ms must be >= retry.base_ms".to_string()));
        }
        Ok(())
    }
}

/// Ticketing source connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketingEndpointConfig {
    /// Ticketing API base URL.
    pub base_url: String,
    /// Bearer token for the ticketing API.
    pub api_key: String,
    /// Number of conversation IDs requested per search page.
    #[serde(default = "default_ticketing_page_size")]
    pub page_size: u32,
}

impl TicketingEndpointConfig {
    /// Validates ticketing endpoint configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("ticketing.base_url must be non-empty".to_string()));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("ticketing.api_key must be non-empty".to_string()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("ticketing.page_size must be greater than zero".to_string()));
        }
        Ok(())
    }
}

/// LLM provider connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmEndpointConfig {
    /// Chat-completion endpoint URL.
    pub endpoint: String,
    /// API key for the LLM provider.
    pub api_key: String,
    /// Model identifier to request.
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "LlmEndpointConfig::default_temperature")]
    pub temperature: f32,
}

impl LlmEndpointConfig {
    const fn default_temperature() -> f32 {
        0.0
    }

    /// Validates LLM endpoint configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.endpoint must be non-empty".to_string()));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.api_key must be non-empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.model must be non-empty".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid("llm.temperature must be within [0.0, 2.0]".to_string()));
        }
        Ok(())
    }
}

/// Embedding provider connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingEndpointConfig {
    /// Batch-embedding endpoint URL.
    pub endpoint: String,
    /// API key for the embedding provider.
    pub api_key: String,
    /// Model identifier to request.
    pub model: String,
}

impl EmbeddingEndpointConfig {
    /// Validates embedding endpoint configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("embedding.endpoint must be non-empty".to_string()));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("embedding.api_key must be non-empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("embedding.model must be non-empty".to_string()));
        }
        Ok(())
    }
}

/// `SQLite` run store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the `SQLite` database file.
    #[serde(default = "StoreConfig::default_path")]
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "StoreConfig::default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
}

impl StoreConfig {
    fn default_path() -> PathBuf {
        PathBuf::from("feedforward.db")
    }
    const fn default_busy_timeout_ms() -> u64 {
        5_000
    }

    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store.path must be non-empty".to_string()));
        }
        if self.busy_timeout_ms == 0 {
            return Err(ConfigError::Invalid("store.busy_timeout_ms must be greater than zero".to_string()));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            busy_timeout_ms: Self::default_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> PathBuf {
    if let Some(path) = path {
        return path.to_path_buf();
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(env_path);
    }
    PathBuf::from(DEFAULT_CONFIG_NAME)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "test fixtures only")]

    use super::ConfidenceWeights;
    use super::ConcurrencyConfig;
    use super::PipelineConfig;

    const MINIMAL_TOML: &str = r#"
        [ticketing]
        base_url = "https://tickets.example.com"
        api_key = "key"

        [llm]
        endpoint = "https://llm.example.com/v1/chat"
        api_key = "key"
        model = "gpt-test"

        [embedding]
        endpoint = "https://embed.example.com/v1/embed"
        api_key = "key"
        model = "embed-test"
    "#;

    #[test]
    fn defaults_match_documented_values() {
        let config: PipelineConfig = toml::from_str(MINIMAL_TOML).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.concurrency.limit, 20);
        assert_eq!(config.concurrency.llm_timeout_secs, 30);
        assert_eq!(config.concurrency.embedding_timeout_secs, 60);
        assert!((config.clustering.distance_threshold - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.clustering.min_group_size, 3);
        assert!((config.quality_gate.evidence_coverage_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.quality_gate.confidence_score_threshold, 50);
        assert_eq!(config.quality_gate.dry_run_preview_cache_size, 5);
    }

    #[test]
    fn confidence_weights_default_to_one() {
        let weights = ConfidenceWeights::default();
        assert!((weights.total() - 1.0).abs() < 0.001);
    }

    #[test]
    fn confidence_weights_must_sum_to_one() {
        let mut config: PipelineConfig = toml::from_str(MINIMAL_TOML).expect("parse");
        config.quality_gate.confidence_weights.embedding_similarity = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_concurrency_limit_is_rejected() {
        let concurrency = ConcurrencyConfig {
            limit: 0,
            ..ConcurrencyConfig::default()
        };
        let mut config: PipelineConfig = toml::from_str(MINIMAL_TOML).expect("parse");
        config.concurrency = concurrency;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_required_ticketing_field_fails_to_parse() {
        let result: Result<PipelineConfig, _> = toml::from_str(
            r#"
            [llm]
            endpoint = "https://llm.example.com"
            api_key = "key"
            model = "gpt-test"

            [embedding]
            endpoint = "https://embed.example.com"
            api_key = "key"
            model = "embed-test"
            "#,
        );
        assert!(result.is_err());
    }
}
