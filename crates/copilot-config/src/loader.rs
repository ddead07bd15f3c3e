//! Configuration loading, environment overrides and validation.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info};

use crate::CopilotConfig;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

const SERVICE_MODES: &[&str] = &["generation", "knowledge_search", "mix"];

/// Load configuration from a YAML file, apply `COPILOT_*` environment
/// overrides and validate the result.
pub fn load_config(path: &Path) -> Result<CopilotConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;
    info!(
        path = %path.display(),
        generation_kind = %config.generation.kind,
        model = %config.generation.model,
        retrieval_enabled = config.retrieval.enabled,
        correction_rules = config.correction.rules.len(),
        "config loaded"
    );
    Ok(config)
}

/// Parse a YAML document without touching the environment.
pub fn parse_config(content: &str) -> Result<CopilotConfig, ConfigError> {
    Ok(serde_yaml::from_str(content)?)
}

/// Apply generation parameter and feature flag overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut CopilotConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let generation = &mut config.generation;
    if let Some(model) = lookup("COPILOT_MODEL").filter(|v| !v.trim().is_empty()) {
        generation.model = model;
    }
    override_parsed(&lookup, "COPILOT_TEMPERATURE", &mut generation.temperature)?;
    override_parsed(&lookup, "COPILOT_MAX_TOKENS", &mut generation.max_tokens)?;
    override_parsed(&lookup, "COPILOT_TOP_P", &mut generation.top_p)?;
    override_parsed(
        &lookup,
        "COPILOT_FREQUENCY_PENALTY",
        &mut generation.frequency_penalty,
    )?;
    override_parsed(
        &lookup,
        "COPILOT_PRESENCE_PENALTY",
        &mut generation.presence_penalty,
    )?;
    override_parsed(
        &lookup,
        "COPILOT_ENABLE_RETRIEVAL_AUGMENTATION",
        &mut config.retrieval.enabled,
    )?;
    Ok(())
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return Ok(());
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(());
    }
    *target = raw
        .to_ascii_lowercase()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(format!("{} has invalid value '{}'", key, raw)))?;
    debug!(key, value = raw, "config override applied");
    Ok(())
}

/// Validate a configuration.
pub fn validate_config(config: &CopilotConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    let generation = &config.generation;
    if generation.model.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "generation.model must not be empty".to_string(),
        ));
    }
    if !(0.0..=2.0).contains(&generation.temperature) {
        return Err(ConfigError::Invalid(
            "generation.temperature must be within [0, 2]".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&generation.top_p) {
        return Err(ConfigError::Invalid(
            "generation.top_p must be within [0, 1]".to_string(),
        ));
    }
    if generation.max_tokens == 0 {
        return Err(ConfigError::Invalid(
            "generation.max_tokens must be > 0".to_string(),
        ));
    }
    if generation.timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "generation.timeout_secs must be > 0".to_string(),
        ));
    }

    validate_prompts(config)?;

    let retrieval = &config.retrieval;
    if !(0.0..=1.0).contains(&retrieval.similarity_threshold) {
        return Err(ConfigError::Invalid(
            "retrieval.similarity_threshold must be within [0, 1]".to_string(),
        ));
    }
    if retrieval.max_tasks == 0 {
        return Err(ConfigError::Invalid(
            "retrieval.max_tasks must be > 0".to_string(),
        ));
    }
    if config.knowledge_index.top_k == 0 {
        return Err(ConfigError::Invalid(
            "knowledge_index.top_k must be > 0".to_string(),
        ));
    }

    let budget = &config.budget;
    if budget.adjustment_factor <= 0.0 || budget.adjustment_factor > 1.0 {
        return Err(ConfigError::Invalid(
            "budget.adjustment_factor must be within (0, 1]".to_string(),
        ));
    }
    if config.reserved_completion_tokens() >= budget.token_limit {
        return Err(ConfigError::Invalid(format!(
            "budget.token_limit ({}) must exceed reserved completion tokens ({})",
            budget.token_limit,
            config.reserved_completion_tokens()
        )));
    }

    if !SERVICE_MODES.contains(&config.service.default_mode.as_str()) {
        return Err(ConfigError::Invalid(format!(
            "service.default_mode '{}' must be one of {}",
            config.service.default_mode,
            SERVICE_MODES.join(", ")
        )));
    }

    if config.catalog.command_prefix.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "catalog.command_prefix must not be empty".to_string(),
        ));
    }

    for (idx, rule) in config.correction.rules.iter().enumerate() {
        if rule.match_rule.trim().is_empty() || rule.action.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "correction.rules[{}] needs both match_rule and action",
                idx
            )));
        }
    }

    Ok(())
}

fn validate_prompts(config: &CopilotConfig) -> Result<(), ConfigError> {
    let templates = [
        ("generate_scenario", &config.prompts.generate_scenario),
        ("split_task", &config.prompts.split_task),
        ("check_similarity", &config.prompts.check_similarity),
    ];
    for (name, messages) in templates {
        let Some(messages) = messages else {
            continue;
        };
        if messages.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "prompts.{} must contain at least one message",
                name
            )));
        }
        for message in messages {
            if !matches!(message.role.as_str(), "system" | "user" | "assistant") {
                return Err(ConfigError::Invalid(format!(
                    "prompts.{} has unknown role '{}'",
                    name, message.role
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
version: 1
generation:
  kind: azure_openai
  endpoint: https://example.openai.azure.com
  api_key_env: OPENAI_API_KEY
  api_version: 2023-05-15
  model: gpt-4
  max_tokens: 2000
budget:
  token_limit: 8192
retrieval:
  similarity_threshold: 0.7
correction:
  rules:
    - match_rule: "('az vm create', '--image', 'UbuntuLTS')"
      action: "ReplaceArg('~', 'Ubuntu2204')"
"#;

    #[test]
    fn test_parse_sample_config_fills_defaults() {
        let config = parse_config(SAMPLE).expect("parse");
        validate_config(&config).expect("valid");
        assert_eq!(config.generation.kind, "azure_openai");
        assert_eq!(config.generation.temperature, 0.5);
        assert_eq!(config.generation.top_p, 0.95);
        assert_eq!(config.reserved_completion_tokens(), 2000);
        assert_eq!(config.retrieval.max_tasks, 8);
        assert_eq!(config.knowledge_index.depot, "Azure.azure-cli-docs");
        assert_eq!(config.correction.rules.len(), 1);
        assert!(config.retrieval.enabled);
    }

    #[test]
    fn test_env_overrides_apply_generation_params() {
        let mut config = parse_config(SAMPLE).expect("parse");
        let env: HashMap<&str, &str> = [
            ("COPILOT_TEMPERATURE", "0.1"),
            ("COPILOT_MAX_TOKENS", "1500"),
            ("COPILOT_ENABLE_RETRIEVAL_AUGMENTATION", "False"),
        ]
        .into_iter()
        .collect();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()))
            .expect("overrides");
        assert_eq!(config.generation.temperature, 0.1);
        assert_eq!(config.generation.max_tokens, 1500);
        assert!(!config.retrieval.enabled);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = CopilotConfig::default();
        let err = apply_env_overrides(&mut config, |k| {
            (k == "COPILOT_TOP_P").then(|| "high".to_string())
        })
        .expect_err("should fail");
        assert!(err.to_string().contains("COPILOT_TOP_P"));
    }

    #[test]
    fn test_budget_must_leave_room_for_context() {
        let config = parse_config("budget:\n  token_limit: 4000\n").expect("parse");
        let err = validate_config(&config).expect_err("reserved equals limit");
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("budget.token_limit")));
    }

    #[test]
    fn test_unknown_service_mode_rejected() {
        let config = parse_config("service:\n  default_mode: fastest\n").expect("parse");
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_prompt_override_roles_checked() {
        let yaml = "prompts:\n  split_task:\n    - role: robot\n      content: hi\n";
        let config = parse_config(yaml).expect("parse");
        let err = validate_config(&config).expect_err("bad role");
        assert!(err.to_string().contains("prompts.split_task"));
    }
}
