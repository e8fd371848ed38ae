//! Agent Configuration
//!
//! Per-phase LLM configuration with cascading resolution, resolved once at
//! run start and immutable thereafter:
//!
//! 1. run-level override (from `RunConfig`)
//! 2. phase-specific environment variable (`DETECTION_LLM_MODEL`, ...)
//! 3. process-wide default environment variable (`DEFAULT_LLM_MODEL`, ...)
//! 4. built-in per-phase default

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::phase::Phase;

/// Fully resolved LLM configuration for one phase agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider identifier ("openai", "anthropic", "ollama", "openai-compatible")
    pub provider: String,
    pub model: String,
    /// Literal key, or the `env:VAR_NAME` indirection resolved at provider
    /// construction time.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Endpoint override for self-hosted / OpenAI-compatible providers.
    #[serde(default)]
    pub endpoint: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-request transport timeout.
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Phase-specific prompt instructions appended to the agent's prompt.
    #[serde(default)]
    pub instructions: Option<String>,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

impl LlmConfig {
    /// Built-in defaults per phase.
    pub fn default_for(phase: Phase) -> Self {
        let (provider, model, temperature, max_tokens) = match phase {
            Phase::Detection => ("openai", "gpt-3.5-turbo", 0.3, 2000),
            Phase::Analysis => ("openai", "gpt-4o", 0.5, 4000),
            Phase::Planning => ("anthropic", "claude-3-5-sonnet-20241022", 0.7, 8000),
            Phase::Execution => ("openai", "gpt-4o", 0.2, 4000),
            Phase::Reporting => ("openai", "gpt-3.5-turbo", 0.7, 3000),
            Phase::Learning => ("openai", "gpt-4o", 0.5, 4000),
        };
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            api_key: None,
            endpoint: None,
            temperature,
            max_tokens,
            request_timeout: default_request_timeout(),
            instructions: None,
        }
    }

    /// Resolve the configuration for `phase`, applying the cascade against
    /// the process environment.
    pub fn resolve(phase: Phase, overrides: Option<&LlmOverrides>) -> Self {
        Self::resolve_with(phase, overrides, |name| std::env::var(name).ok())
    }

    /// Cascade resolution with an injectable environment lookup (tests pass a
    /// closure over a map).
    pub fn resolve_with(
        phase: Phase,
        overrides: Option<&LlmOverrides>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut config = Self::default_for(phase);
        let prefix = phase.as_str().to_ascii_uppercase();

        let cascade = |field: &str| {
            lookup(&format!("{}_LLM_{}", prefix, field))
                .or_else(|| lookup(&format!("DEFAULT_LLM_{}", field)))
        };

        if let Some(provider) = cascade("PROVIDER") {
            config.provider = provider;
        }
        if let Some(model) = cascade("MODEL") {
            config.model = model;
        }
        if let Some(temperature) = cascade("TEMPERATURE").and_then(|v| v.parse().ok()) {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = cascade("MAX_TOKENS").and_then(|v| v.parse().ok()) {
            config.max_tokens = max_tokens;
        }

        if let Some(overrides) = overrides {
            overrides.apply(&mut config);
        }

        // Provider API keys default to the conventional environment variables.
        if config.api_key.is_none() {
            config.api_key = match config.provider.as_str() {
                "openai" | "openai-compatible" => Some("env:OPENAI_API_KEY".to_string()),
                "anthropic" => Some("env:ANTHROPIC_API_KEY".to_string()),
                _ => None,
            };
        }
        config
    }
}

/// Sparse run-level override for one phase; unset fields fall through the
/// cascade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmOverrides {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default, with = "humantime_serde::option")]
    pub request_timeout: Option<Duration>,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl LlmOverrides {
    fn apply(&self, config: &mut LlmConfig) {
        if let Some(v) = &self.provider {
            config.provider = v.clone();
        }
        if let Some(v) = &self.model {
            config.model = v.clone();
        }
        if let Some(v) = &self.api_key {
            config.api_key = Some(v.clone());
        }
        if let Some(v) = &self.endpoint {
            config.endpoint = Some(v.clone());
        }
        if let Some(v) = self.temperature {
            config.temperature = v;
        }
        if let Some(v) = self.max_tokens {
            config.max_tokens = v;
        }
        if let Some(v) = self.request_timeout {
            config.request_timeout = v;
        }
        if let Some(v) = &self.instructions {
            config.instructions = Some(v.clone());
        }
    }
}

/// Per-run configuration supplied by the caller at `start_run`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Per-phase LLM overrides, keyed by phase name.
    #[serde(default)]
    pub llm: BTreeMap<Phase, LlmOverrides>,
    /// Opaque domain-specific options passed through to the agents.
    #[serde(default)]
    pub options: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_builtin_defaults_table() {
        let planning = LlmConfig::default_for(Phase::Planning);
        assert_eq!(planning.provider, "anthropic");
        assert_eq!(planning.max_tokens, 8000);

        let detection = LlmConfig::default_for(Phase::Detection);
        assert_eq!(detection.model, "gpt-3.5-turbo");
        assert_eq!(detection.temperature, 0.3);
    }

    #[test]
    fn test_cascade_precedence() {
        let env: HashMap<&str, &str> = [
            ("DEFAULT_LLM_PROVIDER", "ollama"),
            ("DEFAULT_LLM_MODEL", "llama3.2"),
            ("DETECTION_LLM_MODEL", "llama3.2:70b"),
        ]
        .into_iter()
        .collect();
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());

        // Phase-specific env beats the process default.
        let detection = LlmConfig::resolve_with(Phase::Detection, None, lookup);
        assert_eq!(detection.provider, "ollama");
        assert_eq!(detection.model, "llama3.2:70b");

        // Other phases see only the process default.
        let analysis = LlmConfig::resolve_with(Phase::Analysis, None, lookup);
        assert_eq!(analysis.model, "llama3.2");
        // Built-in default survives where nothing is set.
        assert_eq!(analysis.temperature, 0.5);
    }

    #[test]
    fn test_run_override_beats_env() {
        let lookup =
            |name: &str| (name == "DEFAULT_LLM_MODEL").then(|| "llama3.2".to_string());
        let overrides = LlmOverrides {
            model: Some("gpt-4o-mini".to_string()),
            temperature: Some(0.0),
            ..Default::default()
        };
        let config = LlmConfig::resolve_with(Phase::Reporting, Some(&overrides), lookup);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.temperature, 0.0);
    }
}
