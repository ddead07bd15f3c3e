//! Grounds each atomic task in validated commands and retrieved
//! documentation, concurrently across tasks.

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use copilot_core::chunks::{merge_chunks, top_chunks, trim_command_and_chunk, ChunkFilter};
use copilot_core::command::{parse_command_info, CommandSource, CommandValidator, ValidationOutcome};
use copilot_core::knowledge::KnowledgeError;
use copilot_core::types::{AtomicTask, TaskContext};
use copilot_knowledge::KnowledgeClient;

/// The fan-out was cancelled before every task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

#[derive(Clone)]
pub struct TaskContextBuilder {
    validator: CommandValidator,
    knowledge: KnowledgeClient,
    filter: ChunkFilter,
    top_chunks: usize,
}

impl TaskContextBuilder {
    pub fn new(
        validator: CommandValidator,
        knowledge: KnowledgeClient,
        filter: ChunkFilter,
        top_chunks: usize,
    ) -> Self {
        Self {
            validator,
            knowledge,
            filter,
            top_chunks,
        }
    }

    /// One context per task, in task order. A task whose retrieval fails
    /// degrades to its bare description.
    pub async fn build_all(
        &self,
        tasks: &[AtomicTask],
        cancel: &CancellationToken,
    ) -> Result<Vec<TaskContext>, Cancelled> {
        let fan_out = join_all(tasks.iter().map(|task| self.build(task)));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(tasks = tasks.len(), "task context fan-out cancelled");
                Err(Cancelled)
            }
            contexts = fan_out => Ok(contexts),
        }
    }

    pub async fn build(&self, task: &AtomicTask) -> TaskContext {
        match self.try_build(task).await {
            Ok(context) => context,
            Err(err) => {
                warn!(
                    task = %task.description,
                    error = %err,
                    "knowledge retrieval failed, using bare step"
                );
                TaskContext::ungrounded(task.description.clone())
            }
        }
    }

    async fn try_build(&self, task: &AtomicTask) -> Result<TaskContext, KnowledgeError> {
        let description = task.description.as_str();
        let Some(candidate) = task.candidate_command.as_deref() else {
            let chunks = self.knowledge.retrieve(description, None).await?;
            let chunks = top_chunks(merge_chunks(chunks), self.top_chunks);
            return Ok(TaskContext::new(description, chunks));
        };

        let outcome = self.validator.validate(candidate);
        debug!(task = %description, candidate = %candidate, outcome = ?outcome, "candidate validated");
        match outcome {
            ValidationOutcome::Valid(CommandSource::Core) => Ok(TaskContext::new(candidate, Vec::new())),
            ValidationOutcome::NotACommand => Ok(TaskContext::ungrounded(description)),
            ValidationOutcome::UnknownSignature => {
                let chunks = self.knowledge.retrieve(candidate, None).await?;
                let chunks = self.filter.filter_by_keyword_similarity(chunks, candidate);
                Ok(TaskContext::new(description, chunks))
            }
            ValidationOutcome::InvalidParameters | ValidationOutcome::Valid(CommandSource::Extension) => {
                let signature = parse_command_info(candidate).signature;
                match self
                    .knowledge
                    .retrieve_best_for_signature(candidate, &signature)
                    .await?
                {
                    Some(chunk) => {
                        let (trimmed, chunk) =
                            trim_command_and_chunk(candidate, &chunk, self.filter.matcher());
                        Ok(TaskContext::new(trimmed, vec![chunk]))
                    }
                    None => {
                        debug!(signature = %signature, "signature not indexed, retrieving by description");
                        let chunks = self.knowledge.retrieve(description, None).await?;
                        let chunks = self.filter.filter_by_keyword_similarity(chunks, candidate);
                        Ok(TaskContext::new(description, chunks))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use copilot_core::command::CommandCatalog;
    use copilot_core::knowledge::{Embedder, KnowledgeIndex, RawChunk};
    use copilot_core::similarity::KeywordMatcher;

    pub(crate) const VM_CREATE_DOC: &str = "### Summary\nCreate an Azure Virtual Machine.\n\n### Required Parameters\n\n--name -n\nName of the virtual machine.\n\n--resource-group -g\nName of resource group.\n\n### Optional Parameters\n\n--image\nThe name of the operating system image.\n\n--license-type\nSpecifies that the image or disk was licensed on-premises.\n\n--generate-ssh-keys\nGenerate SSH public and private key files if missing.";

    /// Catalog answering from a fixed table keyed by signature.
    pub(crate) struct TableCatalog(pub Vec<(&'static str, ValidationOutcome)>);

    impl CommandCatalog for TableCatalog {
        fn validate(&self, signature: &str, _flags: &[String]) -> ValidationOutcome {
            self.0
                .iter()
                .find(|(sig, _)| *sig == signature)
                .map(|(_, outcome)| *outcome)
                .unwrap_or(ValidationOutcome::UnknownSignature)
        }
    }

    /// Embeds text as its length so the index can tell queries apart.
    pub(crate) struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError> {
            Ok(vec![text.len() as f32])
        }
    }

    /// Index returning canned records and recording each query.
    #[derive(Default)]
    pub(crate) struct ScriptedIndex {
        pub by_filter: Vec<(String, Vec<RawChunk>)>,
        pub unfiltered: Vec<RawChunk>,
        pub fail: bool,
        pub queries: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl KnowledgeIndex for ScriptedIndex {
        async fn query(
            &self,
            _vector: &[f32],
            filter_command: Option<&str>,
            _top_k: usize,
        ) -> Result<Vec<RawChunk>, KnowledgeError> {
            self.queries
                .lock()
                .expect("lock")
                .push(filter_command.map(str::to_string));
            if self.fail {
                return Err(KnowledgeError::Http("connection refused".to_string()));
            }
            Ok(match filter_command {
                Some(filter) => self
                    .by_filter
                    .iter()
                    .find(|(sig, _)| sig == filter)
                    .map(|(_, items)| items.clone())
                    .unwrap_or_default(),
                None => self.unfiltered.clone(),
            })
        }
    }

    pub(crate) fn raw(title: &str, content: &str, score: f64) -> RawChunk {
        RawChunk {
            title: title.to_string(),
            content: content.to_string(),
            score,
        }
    }

    pub(crate) fn builder(
        catalog: TableCatalog,
        index: Arc<ScriptedIndex>,
    ) -> TaskContextBuilder {
        TaskContextBuilder::new(
            CommandValidator::new(Arc::new(catalog)),
            KnowledgeClient::new(Arc::new(LengthEmbedder), index, 5),
            ChunkFilter::new(KeywordMatcher::default(), "az"),
            3,
        )
    }

    #[tokio::test]
    async fn test_no_candidate_uses_description_and_top_chunks() {
        let index = Arc::new(ScriptedIndex {
            unfiltered: vec![
                raw("az group create", "### Summary\nCreate a group.", 0.9),
                raw("az group list", "### Summary\nList groups.", 0.4),
                raw("az group delete", "### Summary\nDelete a group.", 0.7),
                raw("az group show", "### Summary\nShow a group.", 0.8),
            ],
            ..ScriptedIndex::default()
        });
        let context = builder(TableCatalog(Vec::new()), index.clone())
            .build(&AtomicTask::parse("Create a resource group"))
            .await;
        assert_eq!(context.guide_step, "Create a resource group");
        let commands: Vec<&str> = context.chunks.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(commands, vec!["az group create", "az group show", "az group delete"]);
        assert_eq!(index.queries.lock().expect("lock").as_slice(), &[None]);
    }

    #[tokio::test]
    async fn test_valid_core_command_is_used_verbatim() {
        let index = Arc::new(ScriptedIndex::default());
        let context = builder(
            TableCatalog(vec![("az group create", ValidationOutcome::Valid(CommandSource::Core))]),
            index.clone(),
        )
        .build(&AtomicTask::parse("Create a group||az group create --name --location"))
        .await;
        assert_eq!(context, TaskContext::new("az group create --name --location", Vec::new()));
        assert!(index.queries.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn test_foreign_command_falls_back_to_description() {
        let context = builder(
            TableCatalog(vec![("git clone", ValidationOutcome::NotACommand)]),
            Arc::new(ScriptedIndex::default()),
        )
        .build(&AtomicTask::parse("Clone the sample||git clone https://example/repo"))
        .await;
        assert_eq!(context, TaskContext::ungrounded("Clone the sample"));
    }

    #[tokio::test]
    async fn test_unknown_signature_retrieves_by_candidate_and_filters() {
        let index = Arc::new(ScriptedIndex {
            unfiltered: vec![
                raw("az webapp create", "### Summary\nCreate a web app.", 0.8),
                raw("az storage account create", "### Summary\nCreate a storage account.", 0.7),
            ],
            ..ScriptedIndex::default()
        });
        let context = builder(TableCatalog(Vec::new()), index)
            .build(&AtomicTask::parse("Create a web app||az webapps create --name"))
            .await;
        assert_eq!(context.guide_step, "Create a web app");
        assert_eq!(context.chunks.len(), 1);
        assert_eq!(context.chunks[0].command, "az webapp create");
    }

    #[tokio::test]
    async fn test_invalid_parameters_trims_command_against_chunk() {
        let index = Arc::new(ScriptedIndex {
            by_filter: vec![(
                "az vm create".to_string(),
                vec![raw("az vm create", VM_CREATE_DOC, 0.82)],
            )],
            ..ScriptedIndex::default()
        });
        let context = builder(
            TableCatalog(vec![("az vm create", ValidationOutcome::InvalidParameters)]),
            index.clone(),
        )
        .build(&AtomicTask::parse(
            "Create a VM||az vm create --name --image --license --generate-ssh-keys",
        ))
        .await;

        assert_eq!(context.guide_step, "az vm create --name --image --license --generate-ssh-keys");
        assert!(context.guide_step.contains("--generate-ssh-keys"));
        let chunk = &context.chunks[0];
        let optional: Vec<&str> = chunk.optional_parameters.iter().map(|p| p.name.as_str()).collect();
        assert!(optional.contains(&"--license-type"));
        assert!(!optional.contains(&"--generate-ssh-keys"));
        assert_eq!(
            index.queries.lock().expect("lock").as_slice(),
            &[Some("az vm create".to_string())]
        );
    }

    #[tokio::test]
    async fn test_extension_command_without_index_entry_falls_back() {
        let index = Arc::new(ScriptedIndex {
            unfiltered: vec![raw("az containerapp up", "### Summary\nDeploy a container app.", 0.6)],
            ..ScriptedIndex::default()
        });
        let context = builder(
            TableCatalog(vec![(
                "az containerapp up",
                ValidationOutcome::Valid(CommandSource::Extension),
            )]),
            index.clone(),
        )
        .build(&AtomicTask::parse("Deploy the app||az containerapp up --source ."))
        .await;
        assert_eq!(context.guide_step, "Deploy the app");
        assert_eq!(context.chunks[0].command, "az containerapp up");
        assert_eq!(
            index.queries.lock().expect("lock").as_slice(),
            &[Some("az containerapp up".to_string()), None]
        );
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades_per_task() {
        let index = Arc::new(ScriptedIndex {
            fail: true,
            ..ScriptedIndex::default()
        });
        let builder = builder(
            TableCatalog(vec![("az group create", ValidationOutcome::Valid(CommandSource::Core))]),
            index,
        );
        let tasks = vec![
            AtomicTask::parse("Create a storage account"),
            AtomicTask::parse("Create a group||az group create --name"),
        ];
        let contexts = builder
            .build_all(&tasks, &CancellationToken::new())
            .await
            .expect("contexts");
        assert_eq!(
            contexts,
            vec![
                TaskContext::ungrounded("Create a storage account"),
                TaskContext::new("az group create --name", Vec::new()),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_fan_out() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let builder = builder(TableCatalog(Vec::new()), Arc::new(ScriptedIndex::default()));
        let result = builder
            .build_all(&[AtomicTask::parse("anything")], &cancel)
            .await;
        assert_eq!(result, Err(Cancelled));
    }
}
