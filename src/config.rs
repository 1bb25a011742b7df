#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::error::{Result, SwarmError};
use std::path::PathBuf;

/// Process-level orchestrator defaults. Per-conversation behaviour
/// lives in `ChatConfig`; these values apply when the conversation's
/// own configuration is silent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Approval deadline applied when the scheduling policy sets none.
    pub default_approval_timeout_ms: u64,
    /// Safety cap on model-stream iterations inside one turn.
    pub max_turn_iterations: u32,
    /// Model hint handed to the context builder.
    pub model_hint: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_approval_timeout_ms: 300_000,
            max_turn_iterations: 50,
            model_hint: "default".to_string(),
        }
    }
}

pub async fn load_config(path: Option<PathBuf>) -> Result<OrchestratorConfig> {
    let config_path = path.unwrap_or_else(|| PathBuf::from(".swarm/orchestrator.toml"));
    if !config_path.exists() {
        return Ok(OrchestratorConfig::default());
    }

    let content = tokio::fs::read_to_string(&config_path)
        .await
        .map_err(|e| SwarmError::ConfigError(format!("Failed to read config: {e}")))?;

    Ok(parse_config_content(&content))
}

#[must_use]
pub fn parse_config_content(content: &str) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();

    for line in content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
    {
        if let Some(value) = parse_key_value(line, "default_approval_timeout_ms") {
            if let Ok(ms) = expand_env_vars(value).parse() {
                config.default_approval_timeout_ms = ms;
            }
        }
        if let Some(value) = parse_key_value(line, "max_turn_iterations") {
            if let Ok(n) = expand_env_vars(value).parse() {
                config.max_turn_iterations = n;
            }
        }
        if let Some(value) = parse_key_value(line, "model_hint") {
            config.model_hint = expand_env_vars(value);
        }
    }

    config
}

fn expand_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_part = &result[start + 2..start + end];
            let (var_name, default) = var_part.split_once(":-").unwrap_or((var_part, ""));
            let value = std::env::var(var_name).unwrap_or_else(|_| default.to_string());
            result.replace_range(start..=(start + end), &value);
        } else {
            break;
        }
    }
    result
}

fn parse_key_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let (found_key, value) = line.split_once('=')?;
    if found_key.trim() != key {
        return None;
    }
    Some(value.trim().trim_matches('"'))
}
