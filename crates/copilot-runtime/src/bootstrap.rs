//! Builds a ready [`Pipeline`] from a config file and initializes tracing.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use copilot_config::{load_config, ConfigError, CopilotConfig, ObservabilityConfig};
use copilot_core::chunks::ChunkFilter;
use copilot_core::command::{CommandCatalog, CommandValidator};
use copilot_core::correction::{CorrectionEngine, RuleParseError};
use copilot_core::knowledge::{
    Embedder, KnowledgeError, KnowledgeIndex, NoopScenarioSearch, RawChunk, ScenarioSearch,
};
use copilot_core::similarity::KeywordMatcher;
use copilot_knowledge::{
    CatalogError, HttpEmbeddingClient, HttpEmbeddingConfig, HttpKnowledgeIndexClient,
    HttpKnowledgeIndexConfig, KnowledgeClient, StaticCommandCatalog,
};
use copilot_llm::{build_client, GenerationInvoker, GenerationParams, LlmBuildError, PromptSet};

use crate::pipeline::{ParseServiceTypeError, Pipeline, PipelineSettings};
use crate::task_context::TaskContextBuilder;

/// Runtime bootstrap errors.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("generation backend build error: {0}")]
    LlmBuild(#[from] LlmBuildError),
    #[error("knowledge client error: {0}")]
    Knowledge(#[from] KnowledgeError),
    #[error("command catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("correction rule error: {0}")]
    Rules(#[from] RuleParseError),
    #[error("service type error: {0}")]
    ServiceType(#[from] ParseServiceTypeError),
    #[error("environment variable '{0}' not found")]
    EnvNotFound(String),
}

/// Running app bundle created from config.
pub struct CopilotApp {
    pub pipeline: Pipeline,
    pub config: Arc<CopilotConfig>,
}

static TRACING_INIT: OnceLock<()> = OnceLock::new();

impl CopilotApp {
    pub async fn from_config_path(path: impl Into<PathBuf>) -> Result<Self, BootstrapError> {
        Self::from_config_path_with_search(path, Arc::new(NoopScenarioSearch)).await
    }

    /// Like [`CopilotApp::from_config_path`] with an external scenario search.
    pub async fn from_config_path_with_search(
        path: impl Into<PathBuf>,
        search: Arc<dyn ScenarioSearch>,
    ) -> Result<Self, BootstrapError> {
        let path = path.into();
        let config = load_config(&path)?;
        init_tracing_if_needed(&config.observability);
        info!(config = %path.display(), "bootstrapping copilot");
        Self::from_config(config, search)
    }

    pub fn from_config(
        config: CopilotConfig,
        search: Arc<dyn ScenarioSearch>,
    ) -> Result<Self, BootstrapError> {
        let pipeline = build_pipeline(&config, search)?;
        Ok(Self {
            pipeline,
            config: Arc::new(config),
        })
    }
}

/// Wire every collaborator named by `config` into a pipeline.
pub fn build_pipeline(
    config: &CopilotConfig,
    search: Arc<dyn ScenarioSearch>,
) -> Result<Pipeline, BootstrapError> {
    let settings = PipelineSettings::from_config(config)?;
    let corrector = build_correction_engine(config)?;
    let client = build_client(&config.generation)?;
    let invoker = GenerationInvoker::new(client, GenerationParams::from(&config.generation));
    let prompts = PromptSet::from_config(&config.prompts);

    let catalog = build_catalog(config)?;
    let knowledge = build_knowledge_client(config)?;
    let filter = ChunkFilter::new(
        KeywordMatcher::new(config.retrieval.similarity_threshold),
        config.catalog.command_prefix.clone(),
    );
    let contexts = TaskContextBuilder::new(
        CommandValidator::new(catalog),
        knowledge,
        filter,
        config.retrieval.top_chunks,
    );

    info!(
        model = %config.generation.model,
        backend = %config.generation.kind,
        retrieval_enabled = settings.retrieval_enabled,
        service_type = %settings.default_service_type,
        correction_rules = corrector.rules().len(),
        "pipeline built"
    );
    Ok(Pipeline::new(
        invoker, prompts, contexts, search, corrector, settings,
    ))
}

/// Parse the configured correction rules; malformed rules fail startup.
pub fn build_correction_engine(config: &CopilotConfig) -> Result<CorrectionEngine, RuleParseError> {
    CorrectionEngine::from_specs(
        config
            .correction
            .rules
            .iter()
            .map(|rule| (rule.match_rule.as_str(), rule.action.as_str())),
    )
}

fn build_catalog(config: &CopilotConfig) -> Result<Arc<dyn CommandCatalog>, BootstrapError> {
    let prefix = config.catalog.command_prefix.clone();
    match &config.catalog.path {
        Some(path) => Ok(Arc::new(StaticCommandCatalog::load(prefix, path)?)),
        None => {
            warn!("no command catalog configured, every command guess is unknown");
            Ok(Arc::new(StaticCommandCatalog::empty(prefix)))
        }
    }
}

fn build_knowledge_client(config: &CopilotConfig) -> Result<KnowledgeClient, BootstrapError> {
    let embedder: Arc<dyn Embedder> = match &config.embedding.endpoint {
        Some(endpoint) => Arc::new(HttpEmbeddingClient::new(HttpEmbeddingConfig {
            endpoint: endpoint.clone(),
            api_key: resolve_env(config.embedding.api_key_env.as_deref())?,
            timeout_secs: config.embedding.timeout_secs,
        })?),
        None => Arc::new(Unconfigured("embedding.endpoint")),
    };
    let index_config = &config.knowledge_index;
    let index: Arc<dyn KnowledgeIndex> = match &index_config.endpoint {
        Some(endpoint) => Arc::new(HttpKnowledgeIndexClient::new(HttpKnowledgeIndexConfig {
            endpoint: endpoint.clone(),
            access_token: resolve_env(index_config.access_token_env.as_deref())?,
            depot: index_config.depot.clone(),
            score_threshold: index_config.score_threshold,
            timeout_secs: index_config.timeout_secs,
        })?),
        None => Arc::new(Unconfigured("knowledge_index.endpoint")),
    };
    if config.retrieval.enabled
        && (config.embedding.endpoint.is_none() || index_config.endpoint.is_none())
    {
        warn!("retrieval enabled without knowledge endpoints, tasks will not be grounded");
    }
    Ok(KnowledgeClient::new(embedder, index, index_config.top_k))
}

fn resolve_env(name: Option<&str>) -> Result<Option<String>, BootstrapError> {
    match name {
        Some(name) => std::env::var(name)
            .map(Some)
            .map_err(|_| BootstrapError::EnvNotFound(name.to_string())),
        None => Ok(None),
    }
}

/// Stand-in for a knowledge backend that has no endpoint.
struct Unconfigured(&'static str);

#[async_trait]
impl Embedder for Unconfigured {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, KnowledgeError> {
        Err(KnowledgeError::NotConfigured(self.0.to_string()))
    }
}

#[async_trait]
impl KnowledgeIndex for Unconfigured {
    async fn query(
        &self,
        _vector: &[f32],
        _filter_command: Option<&str>,
        _top_k: usize,
    ) -> Result<Vec<RawChunk>, KnowledgeError> {
        Err(KnowledgeError::NotConfigured(self.0.to_string()))
    }
}

/// Install the global subscriber once. `RUST_LOG` wins over the configured
/// level; `COPILOT_LOG_FILE` wins over the configured file.
pub fn init_tracing_if_needed(observability: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let log_file_path = std::env::var("COPILOT_LOG_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| observability.log_file.clone());
        let file_writer = log_file_path.as_deref().and_then(create_log_writer);
        let fallback_level = match observability.log_level.trim().to_ascii_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => "info",
        };

        let make_filter = || {
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        };
        let span_events = if observability.traces_enabled {
            tracing_subscriber::fmt::format::FmtSpan::NEW
                | tracing_subscriber::fmt::format::FmtSpan::CLOSE
        } else {
            tracing_subscriber::fmt::format::FmtSpan::NONE
        };

        match file_writer {
            Some(writer) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(make_filter())
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_span_events(span_events)
                    .try_init();
            }
            None => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(make_filter())
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events)
                    .try_init();
            }
        }

        tracing::info!(
            log_level = %observability.log_level,
            traces_enabled = observability.traces_enabled,
            log_file = log_file_path.as_deref().unwrap_or("(stderr)"),
            "tracing initialized"
        );
    });
}

fn create_log_writer(path: &str) -> Option<SharedFileMakeWriter> {
    use std::fs::{create_dir_all, OpenOptions};

    let file_path = Path::new(path);
    if let Some(parent) = file_path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = create_dir_all(parent) {
                eprintln!(
                    "failed to create log directory '{}': {}",
                    parent.display(),
                    err
                );
                return None;
            }
        }
    }
    let file = match OpenOptions::new().create(true).append(true).open(file_path) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("failed to open log file '{}': {}", file_path.display(), err);
            return None;
        }
    };
    Some(SharedFileMakeWriter::new(file))
}

#[derive(Clone)]
struct SharedFileMakeWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl SharedFileMakeWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

struct SharedFileWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedFileMakeWriter {
    type Writer = SharedFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileWriter {
            file: self.file.clone(),
        }
    }
}

impl std::io::Write for SharedFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("log file mutex poisoned"))?;
        std::io::Write::write(&mut *file, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("log file mutex poisoned"))?;
        std::io::Write::flush(&mut *file)
    }
}
