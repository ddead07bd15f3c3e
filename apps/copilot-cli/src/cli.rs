use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use copilot_api::{CopilotRequest, CopilotService, DEFAULT_TOP_NUM};
use copilot_config::{load_config, CopilotConfig};
use copilot_core::knowledge::NoopScenarioSearch;
use copilot_core::types::HistoryMessage;
use copilot_runtime::{build_correction_engine, init_tracing_if_needed, CopilotApp};

const DEFAULT_CONFIG: &str = "configs/copilot.yaml";

#[derive(Debug, Parser)]
#[command(name = "copilot", about = "Generate CLI scenarios from natural language")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer one question and print the response envelope as JSON
    Ask(AskArgs),
    /// Load and validate a config file, including correction rules
    CheckConfig(CheckConfigArgs),
}

#[derive(Debug, Args, Clone)]
struct AskArgs {
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    /// JSON file holding prior turns: [{"role": "user", "content": "..."}]
    #[arg(long)]
    history: Option<PathBuf>,
    /// generation, knowledge-search or mix; defaults to the configured mode
    #[arg(long)]
    mode: Option<String>,
    #[arg(long, default_value_t = DEFAULT_TOP_NUM)]
    top_num: usize,
    #[arg(long)]
    verbose: bool,
    #[arg(value_name = "QUESTION", required = true)]
    question: Vec<String>,
}

#[derive(Debug, Args, Clone)]
struct CheckConfigArgs {
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Ask(args) => ask(args).await,
            Command::CheckConfig(args) => check_config(&args.config),
        }
    }
}

async fn ask(args: AskArgs) -> anyhow::Result<()> {
    let mut config = read_config(&args.config)?;
    if args.verbose {
        config.observability.log_level = "debug".to_string();
    }
    init_tracing_if_needed(&config.observability);

    let history = match &args.history {
        Some(path) => read_history(path)?,
        None => Vec::new(),
    };
    let app = CopilotApp::from_config(config, Arc::new(NoopScenarioSearch))
        .context("failed to build pipeline")?;
    let service = CopilotService::from_app(app);

    let mut request = CopilotRequest::new(args.question.join(" "));
    request.history = history;
    request.top_num = args.top_num;
    request.service_type = args.mode;

    let envelope = service.handle(request).await;
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    if let Some(error) = &envelope.error {
        bail!("request failed with status {}: {}", envelope.status, error.message);
    }
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = read_config(path)?;
    init_tracing_if_needed(&config.observability);
    let rules = build_correction_engine(&config).context("invalid correction rule")?;
    CopilotApp::from_config(config, Arc::new(NoopScenarioSearch))
        .context("failed to build pipeline")?;
    info!(config = %path.display(), "config check passed");
    println!(
        "config ok: {} ({} correction rule(s))",
        path.display(),
        rules.rules().len()
    );
    Ok(())
}

fn read_config(path: &Path) -> anyhow::Result<CopilotConfig> {
    load_config(path).with_context(|| format!("failed to load config '{}'", path.display()))
}

fn read_history(path: &Path) -> anyhow::Result<Vec<HistoryMessage>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read history '{}'", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("history '{}' is not a JSON message array", path.display()))
}
