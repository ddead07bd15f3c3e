//! Request orchestration: split, ground, assemble, generate, parse and
//! correct, with optional vetted-scenario search in front.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use copilot_config::CopilotConfig;
use copilot_core::assembler::{ContextAssembler, TokenBudget};
use copilot_core::correction::CorrectionEngine;
use copilot_core::knowledge::{ScenarioSearch, SearchHit};
use copilot_core::parser::{parse_scenario, ParseError};
use copilot_core::types::{HistoryMessage, Scenario};
use copilot_llm::{GenerationInvoker, GenerationTask, LlmError, PromptSet};

use crate::splitter::TaskSplitter;
use crate::task_context::TaskContextBuilder;
use crate::usage::{AugmentationStats, UsageReport};

/// Request-fatal pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("generation failed: {0}")]
    Generation(#[from] LlmError),
    #[error(transparent)]
    Malformed(#[from] ParseError),
    #[error("request cancelled")]
    Cancelled,
}

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Retrieval-augmented generation.
    Generation,
    /// Vetted scenarios only.
    KnowledgeSearch,
    /// Vetted scenarios when they pass verification, else generation.
    Mix,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::KnowledgeSearch => "knowledge_search",
            Self::Mix => "mix",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown service type '{0}', expected generation, knowledge_search or mix")]
pub struct ParseServiceTypeError(pub String);

impl FromStr for ServiceType {
    type Err = ParseServiceTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "generation" | "gptgeneration" => Ok(Self::Generation),
            "knowledgesearch" => Ok(Self::KnowledgeSearch),
            "mix" => Ok(Self::Mix),
            _ => Err(ParseServiceTypeError(s.to_string())),
        }
    }
}

/// Immutable knobs of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub retrieval_enabled: bool,
    pub default_service_type: ServiceType,
    pub default_top_num: usize,
    pub knowledge_quality_threshold: f64,
    pub command_prefix: String,
    pub max_tasks: usize,
    pub token_limit: u32,
    pub reserved_completion_tokens: u32,
    pub adjustment_factor: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retrieval_enabled: true,
            default_service_type: ServiceType::Generation,
            default_top_num: 5,
            knowledge_quality_threshold: 1.0,
            command_prefix: "az".to_string(),
            max_tasks: 8,
            token_limit: 16_384,
            reserved_completion_tokens: 4_000,
            adjustment_factor: 0.95,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &CopilotConfig) -> Result<Self, ParseServiceTypeError> {
        Ok(Self {
            retrieval_enabled: config.retrieval.enabled,
            default_service_type: config.service.default_mode.parse()?,
            default_top_num: config.service.default_top_num,
            knowledge_quality_threshold: config.service.knowledge_quality_threshold,
            command_prefix: config.catalog.command_prefix.clone(),
            max_tasks: config.retrieval.max_tasks,
            token_limit: config.budget.token_limit,
            reserved_completion_tokens: config.reserved_completion_tokens(),
            adjustment_factor: config.budget.adjustment_factor,
        })
    }
}

/// One question with its conversation and serving options.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    pub question: String,
    pub history: Vec<HistoryMessage>,
    pub service_type: Option<ServiceType>,
    pub top_num: Option<usize>,
}

impl PipelineRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            history: Vec::new(),
            service_type: None,
            top_num: None,
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_service_type(mut self, service_type: ServiceType) -> Self {
        self.service_type = Some(service_type);
        self
    }

    pub fn with_top_num(mut self, top_num: usize) -> Self {
        self.top_num = Some(top_num);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub request_id: Uuid,
    pub service_type: ServiceType,
    pub scenarios: Vec<Scenario>,
    pub usage: UsageReport,
}

/// Serves copilot requests. Cheap to clone and shared across requests.
#[derive(Clone)]
pub struct Pipeline {
    invoker: GenerationInvoker,
    prompts: Arc<PromptSet>,
    splitter: TaskSplitter,
    contexts: TaskContextBuilder,
    assembler: ContextAssembler,
    search: Arc<dyn ScenarioSearch>,
    corrector: Arc<CorrectionEngine>,
    settings: Arc<PipelineSettings>,
}

impl Pipeline {
    pub fn new(
        invoker: GenerationInvoker,
        prompts: PromptSet,
        contexts: TaskContextBuilder,
        search: Arc<dyn ScenarioSearch>,
        corrector: CorrectionEngine,
        settings: PipelineSettings,
    ) -> Self {
        let splitter = TaskSplitter::new(
            invoker.clone(),
            prompts.split_task.clone(),
            settings.max_tasks,
        );
        let assembler = ContextAssembler::new(invoker.counter());
        Self {
            invoker,
            prompts: Arc::new(prompts),
            splitter,
            contexts,
            assembler,
            search,
            corrector: Arc::new(corrector),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Serve `question` with the default service type.
    pub async fn handle(
        &self,
        question: &str,
        history: &[HistoryMessage],
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        let request = PipelineRequest::new(question).with_history(history.to_vec());
        self.run(&request, cancel).await
    }

    pub async fn run(
        &self,
        request: &PipelineRequest,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        let request_id = Uuid::new_v4();
        let service_type = request
            .service_type
            .unwrap_or(self.settings.default_service_type);
        let span = info_span!(
            "copilot_request",
            request_id = %request_id,
            service_type = service_type.as_str()
        );
        async move {
            let top_num = request.top_num.unwrap_or(self.settings.default_top_num);
            let mut usage = UsageReport::default();
            info!(
                question_len = request.question.len(),
                history = request.history.len(),
                top_num,
                "copilot request started"
            );

            let mut scenarios = match service_type {
                ServiceType::Generation => {
                    self.generate(&request.question, &request.history, &mut usage, cancel)
                        .await?
                }
                ServiceType::KnowledgeSearch => self
                    .search_verified(&request.question, top_num, &mut usage, cancel)
                    .await?
                    .unwrap_or_default(),
                ServiceType::Mix => {
                    match self
                        .search_verified(&request.question, top_num, &mut usage, cancel)
                        .await?
                    {
                        Some(found) => found,
                        None => {
                            self.generate(&request.question, &request.history, &mut usage, cancel)
                                .await?
                        }
                    }
                }
            };

            let corrections: usize = scenarios
                .iter_mut()
                .map(|scenario| self.corrector.correct_scenario(scenario))
                .sum();
            info!(
                scenarios = scenarios.len(),
                corrections,
                total_tokens = usage.total_tokens(),
                "copilot request completed"
            );
            Ok(PipelineOutput {
                request_id,
                service_type,
                scenarios,
                usage,
            })
        }
        .instrument(span)
        .await
    }

    async fn generate(
        &self,
        question: &str,
        history: &[HistoryMessage],
        usage: &mut UsageReport,
        cancel: &CancellationToken,
    ) -> Result<Vec<Scenario>, PipelineError> {
        let question = if self.settings.retrieval_enabled {
            self.augment(question, usage, cancel).await?
        } else {
            question.to_string()
        };

        let generation = cancellable(
            cancel,
            self.invoker.invoke(
                GenerationTask::GenerateScenario,
                &self.prompts.generate_scenario,
                &question,
                history,
            ),
        )
        .await??;
        usage.record(generation.usage);

        let Some(mut scenario) = parse_scenario(&generation.content)? else {
            info!("generation produced no scenario");
            return Ok(Vec::new());
        };
        let prefix = format!("{} ", self.settings.command_prefix);
        let mapped = scenario.map_unknown_to_steps(&prefix);
        if mapped > 0 {
            debug!(mapped, "non-command entries turned into steps");
        }
        Ok(vec![scenario])
    }

    /// Append guidance and documentation context for the question when the
    /// token budget allows it.
    async fn augment(
        &self,
        question: &str,
        usage: &mut UsageReport,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let split = cancellable(cancel, self.splitter.split(question)).await??;
        usage.record(split.usage);
        if split.tasks.is_empty() {
            return Ok(question.to_string());
        }

        let contexts = self
            .contexts
            .build_all(&split.tasks, cancel)
            .await
            .map_err(|_| PipelineError::Cancelled)?;

        let budget = TokenBudget {
            token_limit: self.settings.token_limit,
            reserved_completion_tokens: self.settings.reserved_completion_tokens,
            adjustment_factor: self.settings.adjustment_factor,
            system_prompt_tokens: self
                .prompts
                .generate_scenario
                .token_cost(self.assembler.counter()),
        }
        .available();
        let assembly = self.assembler.assemble(question, &contexts, budget);
        usage.augmentation = Some(AugmentationStats {
            task_count: split.tasks.len(),
            token_budget: budget,
            estimated_task_list_tokens: assembly.guidance_tokens,
            estimated_context_tokens: assembly.context_tokens,
            guidance_added: assembly.guidance_added,
            context_added: assembly.context_added,
        });
        Ok(assembly.question)
    }

    /// Vetted scenarios for the question, or `None` when search finds
    /// nothing usable.
    async fn search_verified(
        &self,
        question: &str,
        top_num: usize,
        usage: &mut UsageReport,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<Scenario>>, PipelineError> {
        let hits = match cancellable(cancel, self.search.search(question, top_num)).await? {
            Ok(hits) => hits,
            Err(err) => {
                warn!(error = %err, "scenario search failed");
                return Ok(None);
            }
        };
        let Some(best) = hits.first() else {
            info!("scenario search found nothing");
            return Ok(None);
        };
        if !self.verify(question, best, usage, cancel).await? {
            info!(score = best.score, "scenario search result rejected");
            return Ok(None);
        }
        Ok(Some(hits.into_iter().map(|hit| hit.scenario).collect()))
    }

    async fn verify(
        &self,
        question: &str,
        best: &SearchHit,
        usage: &mut UsageReport,
        cancel: &CancellationToken,
    ) -> Result<bool, PipelineError> {
        if best.score < self.settings.knowledge_quality_threshold {
            debug!(
                score = best.score,
                threshold = self.settings.knowledge_quality_threshold,
                "search score below quality threshold"
            );
            return Ok(false);
        }
        let check = format!(
            "question: {}\ndescription: {}",
            question, best.scenario.description
        );
        let generation = cancellable(
            cancel,
            self.invoker.invoke(
                GenerationTask::CheckSimilarity,
                &self.prompts.check_similarity,
                &check,
                &[],
            ),
        )
        .await??;
        usage.record(generation.usage);
        parse_verdict(&generation.content)
    }
}

fn parse_verdict(content: &str) -> Result<bool, PipelineError> {
    let verdict = content.replace(['"', '\''], "").trim().to_lowercase();
    match verdict.as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => {
            warn!(verdict = %verdict, "similarity check did not answer true or false");
            Err(ParseError::MalformedGenerationResult(format!(
                "expected true or false, got '{}'",
                verdict
            ))
            .into())
        }
    }
}

async fn cancellable<F>(cancel: &CancellationToken, future: F) -> Result<F::Output, PipelineError>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        output = future => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use copilot_core::assembler::{CONTEXT_INTRO, GUIDANCE_INTRO};
    use copilot_core::chunks::ChunkFilter;
    use copilot_core::command::{CommandSource, CommandValidator, ValidationOutcome};
    use copilot_core::knowledge::{KnowledgeError, NoopScenarioSearch};
    use copilot_core::similarity::KeywordMatcher;
    use copilot_core::types::{CommandEntry, Role};
    use copilot_knowledge::KnowledgeClient;
    use copilot_llm::{ChatMessage, GenerationParams, MockLlmClient, PromptTemplate};

    use crate::task_context::tests::{
        raw, LengthEmbedder, ScriptedIndex, TableCatalog, VM_CREATE_DOC,
    };

    const SCENARIO: &str = r#"{"scenario":"Create a VM","description":"Create a virtual machine.","commandSet":[{"command":"az vm create","arguments":["--name","--image"],"reason":"Create the VM","example":"az vm create --name $vm --image UbuntuLTS"},{"command":"ssh azureuser@$ip","arguments":[],"reason":"Connect","example":"ssh azureuser@$ip"}]}"#;

    struct FixedSearch {
        hits: Vec<SearchHit>,
    }

    #[async_trait]
    impl ScenarioSearch for FixedSearch {
        async fn search(&self, _question: &str, top_num: usize) -> Result<Vec<SearchHit>, KnowledgeError> {
            Ok(self.hits.iter().take(top_num).cloned().collect())
        }
    }

    struct FailingSearch;

    #[async_trait]
    impl ScenarioSearch for FailingSearch {
        async fn search(&self, _question: &str, _top_num: usize) -> Result<Vec<SearchHit>, KnowledgeError> {
            Err(KnowledgeError::Http("search down".to_string()))
        }
    }

    fn prompts() -> PromptSet {
        PromptSet {
            generate_scenario: PromptTemplate::system_only("generate"),
            split_task: PromptTemplate::system_only("split"),
            check_similarity: PromptTemplate::system_only("check"),
        }
    }

    fn pipeline(
        mock: Arc<MockLlmClient>,
        catalog: TableCatalog,
        index: Arc<ScriptedIndex>,
        search: Arc<dyn ScenarioSearch>,
        settings: PipelineSettings,
    ) -> Pipeline {
        let invoker = GenerationInvoker::new(mock, GenerationParams::default());
        let contexts = TaskContextBuilder::new(
            CommandValidator::new(Arc::new(catalog)),
            KnowledgeClient::new(Arc::new(LengthEmbedder), index, 5),
            ChunkFilter::new(KeywordMatcher::default(), "az"),
            3,
        );
        let corrector = CorrectionEngine::from_specs([(
            "('az vm create', '--image', '*')",
            "ReplaceArg('~', 'Ubuntu2204')",
        )])
        .expect("rules");
        Pipeline::new(invoker, prompts(), contexts, search, corrector, settings)
    }

    fn hit(description: &str, score: f64) -> SearchHit {
        SearchHit {
            scenario: Scenario::new("Vetted", description).with_entry(CommandEntry::command(
                "az group create",
                vec!["--name".to_string()],
                "az group create --name rg",
                "Create a group",
            )),
            score,
        }
    }

    fn user_message(request: &copilot_llm::ChatRequest) -> String {
        request
            .messages
            .last()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .expect("user message")
    }

    #[tokio::test]
    async fn test_without_augmentation_sends_prompt_and_question_only() {
        let mock = Arc::new(MockLlmClient::new(SCENARIO));
        let settings = PipelineSettings {
            retrieval_enabled: false,
            ..PipelineSettings::default()
        };
        let pipeline = pipeline(
            mock.clone(),
            TableCatalog(Vec::new()),
            Arc::new(ScriptedIndex::default()),
            Arc::new(NoopScenarioSearch),
            settings,
        );

        let output = pipeline
            .handle("How to create a VM?", &[], &CancellationToken::new())
            .await
            .expect("output");

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].messages,
            vec![
                ChatMessage::system("generate"),
                ChatMessage::user("How to create a VM?"),
            ]
        );
        assert_eq!(output.scenarios.len(), 1);
        assert_eq!(output.usage.calls.len(), 1);
        assert!(output.usage.augmentation.is_none());
    }

    #[tokio::test]
    async fn test_generation_maps_steps_and_applies_corrections() {
        let mock = Arc::new(MockLlmClient::new(SCENARIO));
        let settings = PipelineSettings {
            retrieval_enabled: false,
            ..PipelineSettings::default()
        };
        let output = pipeline(
            mock,
            TableCatalog(Vec::new()),
            Arc::new(ScriptedIndex::default()),
            Arc::new(NoopScenarioSearch),
            settings,
        )
        .handle("How to create a VM?", &[], &CancellationToken::new())
        .await
        .expect("output");

        let scenario = &output.scenarios[0];
        assert_eq!(scenario.command_set[0].example, "az vm create --name $vm --image Ubuntu2204");
        assert!(scenario.command_set[1].is_step());
    }

    #[tokio::test]
    async fn test_text_only_task_is_grounded_by_description() {
        let mock = Arc::new(MockLlmClient::with_sequence([
            r#"["Create a resource group"]"#,
            SCENARIO,
        ]));
        let index = Arc::new(ScriptedIndex {
            unfiltered: vec![raw("az group create", "### Summary\nCreate a new resource group.", 0.9)],
            ..ScriptedIndex::default()
        });
        let pipeline = pipeline(
            mock.clone(),
            TableCatalog(Vec::new()),
            index.clone(),
            Arc::new(NoopScenarioSearch),
            PipelineSettings::default(),
        );

        let output = pipeline
            .handle("Create a resource group", &[], &CancellationToken::new())
            .await
            .expect("output");

        assert_eq!(index.queries.lock().expect("lock").as_slice(), &[None]);
        let requests = mock.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages[0], ChatMessage::system("split"));
        let question = user_message(&requests[1]);
        assert!(question.starts_with("Create a resource group"));
        assert!(question.contains(GUIDANCE_INTRO));
        assert!(question.contains(CONTEXT_INTRO));
        assert!(question.contains("\"command\":\"az group create\""));

        let stats = output.usage.augmentation.expect("augmentation stats");
        assert_eq!(stats.task_count, 1);
        assert!(stats.guidance_added && stats.context_added);
        assert_eq!(output.usage.calls.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_parameters_trim_reaches_question() {
        let mock = Arc::new(MockLlmClient::with_sequence([
            r#"["Create a VM||az vm create --name --image --license --generate-ssh-keys"]"#,
            SCENARIO,
        ]));
        let index = Arc::new(ScriptedIndex {
            by_filter: vec![(
                "az vm create".to_string(),
                vec![raw("az vm create", VM_CREATE_DOC, 0.82)],
            )],
            ..ScriptedIndex::default()
        });
        let pipeline = pipeline(
            mock.clone(),
            TableCatalog(vec![("az vm create", ValidationOutcome::InvalidParameters)]),
            index,
            Arc::new(NoopScenarioSearch),
            PipelineSettings::default(),
        );

        pipeline
            .handle("Create a licensed VM", &[], &CancellationToken::new())
            .await
            .expect("output");

        let question = user_message(&mock.requests()[1]);
        assert!(question.contains("az vm create --name --image --license --generate-ssh-keys"));
        assert!(question.contains("--license-type"));
    }

    #[tokio::test]
    async fn test_valid_core_candidate_becomes_guide_step() {
        let mock = Arc::new(MockLlmClient::with_sequence([
            r#"["Create a group||az group create --name --location"]"#,
            SCENARIO,
        ]));
        let pipeline = pipeline(
            mock.clone(),
            TableCatalog(vec![("az group create", ValidationOutcome::Valid(CommandSource::Core))]),
            Arc::new(ScriptedIndex::default()),
            Arc::new(NoopScenarioSearch),
            PipelineSettings::default(),
        );
        let output = pipeline
            .handle("Create a group", &[], &CancellationToken::new())
            .await
            .expect("output");

        let question = user_message(&mock.requests()[1]);
        assert!(question.contains(&format!("{}az group create --name --location", GUIDANCE_INTRO)));
        assert!(!question.contains(CONTEXT_INTRO));
        let stats = output.usage.augmentation.expect("stats");
        assert!(stats.guidance_added);
        assert!(!stats.context_added);
    }

    #[tokio::test]
    async fn test_unusable_split_generates_plain_question() {
        let mock = Arc::new(MockLlmClient::with_sequence(["Sorry, I cannot split that.", SCENARIO]));
        let pipeline = pipeline(
            mock.clone(),
            TableCatalog(Vec::new()),
            Arc::new(ScriptedIndex::default()),
            Arc::new(NoopScenarioSearch),
            PipelineSettings::default(),
        );
        let output = pipeline
            .handle("Do something", &[], &CancellationToken::new())
            .await
            .expect("output");
        assert_eq!(user_message(&mock.requests()[1]), "Do something");
        assert_eq!(output.scenarios.len(), 1);
    }

    #[tokio::test]
    async fn test_apology_yields_no_scenarios() {
        let settings = PipelineSettings {
            retrieval_enabled: false,
            ..PipelineSettings::default()
        };
        let output = pipeline(
            Arc::new(MockLlmClient::new("Sorry, this question is out of my scope.")),
            TableCatalog(Vec::new()),
            Arc::new(ScriptedIndex::default()),
            Arc::new(NoopScenarioSearch),
            settings,
        )
        .handle("What is the weather?", &[], &CancellationToken::new())
        .await
        .expect("output");
        assert!(output.scenarios.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_generation_is_an_error() {
        let settings = PipelineSettings {
            retrieval_enabled: false,
            ..PipelineSettings::default()
        };
        let result = pipeline(
            Arc::new(MockLlmClient::new("{\"scenario\": ")),
            TableCatalog(Vec::new()),
            Arc::new(ScriptedIndex::default()),
            Arc::new(NoopScenarioSearch),
            settings,
        )
        .handle("q", &[], &CancellationToken::new())
        .await;
        assert!(matches!(result, Err(PipelineError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_generation_error_propagates() {
        let mock = Arc::new(MockLlmClient::new(SCENARIO));
        mock.push_error(LlmError::Timeout("deadline".to_string()));
        let settings = PipelineSettings {
            retrieval_enabled: false,
            ..PipelineSettings::default()
        };
        let result = pipeline(
            mock,
            TableCatalog(Vec::new()),
            Arc::new(ScriptedIndex::default()),
            Arc::new(NoopScenarioSearch),
            settings,
        )
        .handle("q", &[], &CancellationToken::new())
        .await;
        assert!(matches!(result, Err(PipelineError::Generation(LlmError::Timeout(_)))));
    }

    #[tokio::test]
    async fn test_knowledge_search_returns_verified_hits() {
        let mock = Arc::new(MockLlmClient::new("\"True\""));
        let search = Arc::new(FixedSearch {
            hits: vec![hit("Create a resource group.", 2.5), hit("Other.", 1.2)],
        });
        let output = pipeline(
            mock.clone(),
            TableCatalog(Vec::new()),
            Arc::new(ScriptedIndex::default()),
            search,
            PipelineSettings::default(),
        )
        .run(
            &PipelineRequest::new("Create a resource group")
                .with_service_type(ServiceType::KnowledgeSearch)
                .with_top_num(5),
            &CancellationToken::new(),
        )
        .await
        .expect("output");

        assert_eq!(output.scenarios.len(), 2);
        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            user_message(&requests[0]),
            "question: Create a resource group\ndescription: Create a resource group."
        );
    }

    #[tokio::test]
    async fn test_knowledge_search_below_threshold_skips_check() {
        let mock = Arc::new(MockLlmClient::new("True"));
        let search = Arc::new(FixedSearch {
            hits: vec![hit("Create a resource group.", 0.4)],
        });
        let output = pipeline(
            mock.clone(),
            TableCatalog(Vec::new()),
            Arc::new(ScriptedIndex::default()),
            search,
            PipelineSettings::default(),
        )
        .run(
            &PipelineRequest::new("q").with_service_type(ServiceType::KnowledgeSearch),
            &CancellationToken::new(),
        )
        .await
        .expect("output");
        assert!(output.scenarios.is_empty());
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_mix_falls_back_to_generation_when_rejected() {
        let mock = Arc::new(MockLlmClient::with_sequence(["False", SCENARIO]));
        let search = Arc::new(FixedSearch {
            hits: vec![hit("Delete a resource group.", 3.0)],
        });
        let settings = PipelineSettings {
            retrieval_enabled: false,
            ..PipelineSettings::default()
        };
        let output = pipeline(
            mock.clone(),
            TableCatalog(Vec::new()),
            Arc::new(ScriptedIndex::default()),
            search,
            settings,
        )
        .run(
            &PipelineRequest::new("Create a VM").with_service_type(ServiceType::Mix),
            &CancellationToken::new(),
        )
        .await
        .expect("output");
        assert_eq!(output.scenarios[0].scenario, "Create a VM");
        assert_eq!(output.usage.calls.len(), 2);
    }

    #[tokio::test]
    async fn test_mix_falls_back_when_search_fails() {
        let settings = PipelineSettings {
            retrieval_enabled: false,
            ..PipelineSettings::default()
        };
        let output = pipeline(
            Arc::new(MockLlmClient::new(SCENARIO)),
            TableCatalog(Vec::new()),
            Arc::new(ScriptedIndex::default()),
            Arc::new(FailingSearch),
            settings,
        )
        .run(
            &PipelineRequest::new("Create a VM").with_service_type(ServiceType::Mix),
            &CancellationToken::new(),
        )
        .await
        .expect("output");
        assert_eq!(output.scenarios.len(), 1);
    }

    #[tokio::test]
    async fn test_non_boolean_verdict_is_malformed() {
        let search = Arc::new(FixedSearch {
            hits: vec![hit("Create a resource group.", 2.0)],
        });
        let result = pipeline(
            Arc::new(MockLlmClient::new("Maybe")),
            TableCatalog(Vec::new()),
            Arc::new(ScriptedIndex::default()),
            search,
            PipelineSettings::default(),
        )
        .run(
            &PipelineRequest::new("q").with_service_type(ServiceType::KnowledgeSearch),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(PipelineError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = pipeline(
            Arc::new(MockLlmClient::new(SCENARIO)),
            TableCatalog(Vec::new()),
            Arc::new(ScriptedIndex::default()),
            Arc::new(NoopScenarioSearch),
            PipelineSettings::default(),
        )
        .handle("q", &[], &cancel)
        .await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[test]
    fn test_service_type_parsing() {
        assert_eq!("GPTGeneration".parse::<ServiceType>(), Ok(ServiceType::Generation));
        assert_eq!("knowledgeSearch".parse::<ServiceType>(), Ok(ServiceType::KnowledgeSearch));
        assert_eq!("knowledge_search".parse::<ServiceType>(), Ok(ServiceType::KnowledgeSearch));
        assert_eq!("Mix".parse::<ServiceType>(), Ok(ServiceType::Mix));
        assert!("chat".parse::<ServiceType>().is_err());
    }

    #[test]
    fn test_verdict_normalization() {
        assert!(parse_verdict("\"True\"").expect("verdict"));
        assert!(!parse_verdict("'false'").expect("verdict"));
        assert!(parse_verdict("yes").is_err());
    }
}
