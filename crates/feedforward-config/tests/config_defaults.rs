//! Config defaults and core validation tests for feedforward-config.
// feedforward-config/tests/config_defaults.rs
// =============================================================================
// Module: Config Defaults and Core Validation Tests
// Description: Validate default behavior and core config invariants.
// Purpose: Ensure minimal config is valid and critical invariants are enforced.
// =============================================================================
#![allow(unsafe_code, reason = "This test mutates the process env var in a controlled scope.")]

use feedforward_config::ConfigError;
use feedforward_config::PipelineConfig;

type TestResult = Result<(), String>;

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

fn minimal_config() -> Result<PipelineConfig, String> {
    toml::from_str(MINIMAL_TOML).map_err(|err: toml::de::Error| err.to_string())
}

fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}

#[test]
fn default_config_validates() -> TestResult {
    let config = minimal_config()?;
    config.validate().map_err(|err| err.to_string())?;
    Ok(())
}

#[test]
fn min_group_size_of_zero_is_rejected() -> TestResult {
    let mut config = minimal_config()?;
    config.clustering.min_group_size = 0;
    assert_invalid(config.validate(), "clustering.min_group_size")?;
    Ok(())
}

#[test]
fn distance_threshold_above_one_is_rejected() -> TestResult {
    let mut config = minimal_config()?;
    config.clustering.distance_threshold = 1.5;
    assert_invalid(config.validate(), "clustering.distance_threshold")?;
    Ok(())
}

#[test]
fn confidence_score_threshold_above_100_is_rejected() -> TestResult {
    let mut config = minimal_config()?;
    config.quality_gate.confidence_score_threshold = 101;
    assert_invalid(config.validate(), "quality_gate.confidence_score_threshold")?;
    Ok(())
}

#[test]
fn empty_llm_endpoint_is_rejected() -> TestResult {
    let mut config = minimal_config()?;
    config.llm.endpoint = String::new();
    assert_invalid(config.validate(), "llm.endpoint")?;
    Ok(())
}

#[test]
fn retry_cap_below_base_is_rejected() -> TestResult {
    let mut config = minimal_config()?;
    config.retry.cap_ms = 10;
    config.retry.base_ms = 200;
    assert_invalid(config.validate(), "retry.cap_ms")?;
    Ok(())
}

#[test]
fn env_var_overrides_default_config_path() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, MINIMAL_TOML).map_err(|err| err.to_string())?;

    unsafe {
        std::env::set_var("FEEDFORWARD_CONFIG", &path);
    }
    let result = PipelineConfig::load(None);
    unsafe {
        std::env::remove_var("FEEDFORWARD_CONFIG");
    }

    result.map_err(|err| err.to_string())?;
    Ok(())
}
