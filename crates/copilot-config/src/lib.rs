//! # Copilot Config
//!
//! Single-file configuration for the scenario copilot.
//! One `copilot.yaml` configures the generative backend, prompt templates,
//! the knowledge index, the command catalog, retrieval tuning, the token
//! budget, correction rules and observability.

mod loader;

pub use loader::{apply_env_overrides, load_config, parse_config, validate_config, ConfigError};

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level configuration schema.
#[derive(Debug, Clone, Deserialize)]
pub struct CopilotConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub knowledge_index: KnowledgeIndexConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub correction: CorrectionConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            generation: GenerationConfig::default(),
            prompts: PromptsConfig::default(),
            embedding: EmbeddingConfig::default(),
            knowledge_index: KnowledgeIndexConfig::default(),
            catalog: CatalogConfig::default(),
            retrieval: RetrievalConfig::default(),
            budget: BudgetConfig::default(),
            service: ServiceConfig::default(),
            correction: CorrectionConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl CopilotConfig {
    /// Completion tokens reserved out of the context window.
    /// Falls back to the generation `max_tokens` when not set explicitly.
    pub fn reserved_completion_tokens(&self) -> u32 {
        self.budget
            .reserved_completion_tokens
            .unwrap_or(self.generation.max_tokens)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
    /// Version string reported in every response envelope.
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
            api_version: default_api_version(),
        }
    }
}

fn default_app_name() -> String {
    "scenario-copilot".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

fn default_api_version() -> String {
    "1.0".to_string()
}

/// Generative backend connection and sampling parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    /// Backend kind: `openai`, `azure_openai` or `mock`.
    #[serde(default = "default_generation_kind")]
    pub kind: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// `api-version` query value for Azure deployments.
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    /// Canned reply used by the `mock` backend.
    #[serde(default)]
    pub mock_response: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            kind: default_generation_kind(),
            endpoint: None,
            api_key_env: None,
            api_version: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: None,
            timeout_secs: default_generation_timeout(),
            mock_response: None,
        }
    }
}

fn default_generation_kind() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.5
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_top_p() -> f32 {
    0.95
}

fn default_generation_timeout() -> u64 {
    60
}

/// One chat message of a prompt template override.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromptMessageSpec {
    pub role: String,
    pub content: String,
}

/// Optional prompt template overrides. Unset entries use built-in templates.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptsConfig {
    #[serde(default)]
    pub generate_scenario: Option<Vec<PromptMessageSpec>>,
    #[serde(default)]
    pub split_task: Option<Vec<PromptMessageSpec>>,
    #[serde(default)]
    pub check_similarity: Option<Vec<PromptMessageSpec>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: None,
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_http_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeIndexConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the index access token.
    #[serde(default)]
    pub access_token_env: Option<String>,
    /// Documentation depot every query is restricted to.
    #[serde(default = "default_depot")]
    pub depot: String,
    /// Number of raw records requested per query.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub score_threshold: Option<f64>,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for KnowledgeIndexConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_token_env: None,
            depot: default_depot(),
            top_k: default_top_k(),
            score_threshold: None,
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_depot() -> String {
    "Azure.azure-cli-docs".to_string()
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// YAML or JSON command catalog file. Without it every candidate is
    /// treated as an unknown signature.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Leading token every executable command starts with.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: None,
            command_prefix: default_command_prefix(),
        }
    }
}

fn default_command_prefix() -> String {
    "az".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    /// Feature flag for the whole retrieval augmentation stage.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum normalized similarity for keyword matching, in `[0, 1]`.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Chunks kept for a step without a candidate command.
    #[serde(default = "default_top_chunks")]
    pub top_chunks: usize,
    /// Upper bound on decomposed steps.
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: default_similarity_threshold(),
            top_chunks: default_top_chunks(),
            max_tasks: default_max_tasks(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_similarity_threshold() -> f64 {
    0.6
}

fn default_top_chunks() -> usize {
    3
}

fn default_max_tasks() -> usize {
    8
}

#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    /// Context window of the target model.
    #[serde(default = "default_token_limit")]
    pub token_limit: u32,
    #[serde(default)]
    pub reserved_completion_tokens: Option<u32>,
    #[serde(default = "default_adjustment_factor")]
    pub adjustment_factor: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            token_limit: default_token_limit(),
            reserved_completion_tokens: None,
            adjustment_factor: default_adjustment_factor(),
        }
    }
}

fn default_token_limit() -> u32 {
    16_384
}

fn default_adjustment_factor() -> f64 {
    0.95
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// `generation`, `knowledge_search` or `mix`.
    #[serde(default = "default_service_mode")]
    pub default_mode: String,
    /// Minimum top score before a search hit is even verified.
    #[serde(default = "default_quality_threshold")]
    pub knowledge_quality_threshold: f64,
    #[serde(default = "default_top_num")]
    pub default_top_num: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_mode: default_service_mode(),
            knowledge_quality_threshold: default_quality_threshold(),
            default_top_num: default_top_num(),
        }
    }
}

fn default_service_mode() -> String {
    "generation".to_string()
}

fn default_quality_threshold() -> f64 {
    1.0
}

fn default_top_num() -> usize {
    5
}

/// Correction rule written in the textual rule grammar.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CorrectionRuleSpec {
    /// e.g. `('az vm create', '--name', '*')`
    pub match_rule: String,
    /// e.g. `ReplaceSig('az vmss create')`
    pub action: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorrectionConfig {
    #[serde(default)]
    pub rules: Vec<CorrectionRuleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub traces_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
            traces_enabled: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
