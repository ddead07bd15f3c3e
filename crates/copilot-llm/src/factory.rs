//! LLM client factory for building clients from generation configuration.

use std::sync::Arc;

use thiserror::Error;

use copilot_config::GenerationConfig;

use crate::llm::{ChatDialect, HttpLlmClient, HttpLlmClientConfig, LlmClient, MockLlmClient};

/// Errors that can occur when building an LLM client.
#[derive(Debug, Error)]
pub enum LlmBuildError {
    #[error("unknown backend kind: {0}")]
    UnknownKind(String),
    #[error("missing API key for backend")]
    MissingApiKey,
    #[error("environment variable '{0}' not found")]
    EnvNotFound(String),
    #[error("backend '{0}' requires an endpoint")]
    MissingEndpoint(String),
    #[error("client construction failed: {0}")]
    Client(String),
}

/// Build the generative backend client named by `config.kind`.
pub fn build_client(config: &GenerationConfig) -> Result<Arc<dyn LlmClient>, LlmBuildError> {
    let kind = config.kind.to_lowercase();
    match kind.as_str() {
        "mock" => {
            let response = config.mock_response.clone().unwrap_or_default();
            Ok(Arc::new(MockLlmClient::new(response)))
        }
        "openai" => {
            let api_key = resolve_api_key(config)?;
            let mut http = HttpLlmClientConfig {
                dialect: ChatDialect::OpenAi,
                api_key: Some(api_key),
                timeout_secs: config.timeout_secs,
                ..HttpLlmClientConfig::default()
            };
            if let Some(endpoint) = &config.endpoint {
                http.endpoint = endpoint.clone();
            }
            build_http(http)
        }
        "azure_openai" => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| LlmBuildError::MissingEndpoint(config.kind.clone()))?;
            let api_key = resolve_api_key(config)?;
            build_http(HttpLlmClientConfig {
                dialect: ChatDialect::AzureOpenAi,
                endpoint,
                api_key: Some(api_key),
                api_version: config.api_version.clone(),
                timeout_secs: config.timeout_secs,
                ..HttpLlmClientConfig::default()
            })
        }
        _ => Err(LlmBuildError::UnknownKind(config.kind.clone())),
    }
}

fn build_http(config: HttpLlmClientConfig) -> Result<Arc<dyn LlmClient>, LlmBuildError> {
    let client = HttpLlmClient::new(config).map_err(|e| LlmBuildError::Client(e.to_string()))?;
    Ok(Arc::new(client))
}

fn resolve_api_key(config: &GenerationConfig) -> Result<String, LlmBuildError> {
    let env_name = config
        .api_key_env
        .as_ref()
        .ok_or(LlmBuildError::MissingApiKey)?;
    std::env::var(env_name).map_err(|_| LlmBuildError::EnvNotFound(env_name.clone()))
}
