// Copyright (c) 2026 Vigil Systems
// SPDX-License-Identifier: AGPL-3.0

// LLM Provider Infrastructure - Anti-Corruption Layer Implementations
//
// Each provider adapter translates between the domain interface and one
// external API. Provider choice is per phase, resolved from LlmConfig.

pub mod anthropic;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use crate::domain::config::LlmConfig;
use crate::domain::llm::LLMProvider;

use anthropic::AnthropicAdapter;
use ollama::OllamaAdapter;
use openai::OpenAIAdapter;

const OPENAI_DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Build a provider adapter from a resolved phase configuration.
pub fn build_provider(config: &LlmConfig) -> anyhow::Result<Arc<dyn LLMProvider>> {
    let api_key = resolve_api_key(&config.api_key)?;

    let provider: Arc<dyn LLMProvider> = match config.provider.as_str() {
        "openai" | "openai-compatible" => {
            let endpoint = config
                .endpoint
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_ENDPOINT.to_string());
            Arc::new(OpenAIAdapter::new(
                endpoint,
                api_key,
                config.model.clone(),
                config.request_timeout,
            ))
        }
        "anthropic" => Arc::new(AnthropicAdapter::new(
            api_key,
            config.model.clone(),
            config.request_timeout,
        )),
        "ollama" => {
            let endpoint = config
                .endpoint
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_ENDPOINT.to_string());
            Arc::new(OllamaAdapter::new(
                endpoint,
                config.model.clone(),
                config.request_timeout,
            ))
        }
        other => anyhow::bail!("unsupported provider type: {}", other),
    };

    Ok(provider)
}

/// Resolve an API key, supporting the `env:VAR_NAME` indirection.
fn resolve_api_key(key: &Option<String>) -> anyhow::Result<String> {
    match key {
        Some(k) if k.starts_with("env:") => {
            let var_name = k.strip_prefix("env:").unwrap_or_default();
            std::env::var(var_name)
                .map_err(|_| anyhow::anyhow!("environment variable not set: {}", var_name))
        }
        Some(k) => Ok(k.clone()),
        // Local providers run without auth.
        None => Ok(String::new()),
    }
}
