use tracing::{info, warn};

use copilot_core::parser::parse_string_array;
use copilot_core::types::AtomicTask;
use copilot_llm::{GenerationInvoker, GenerationTask, LlmError, PromptTemplate, UsageRecord};

/// Tasks decomposed from a question. Empty means "no decomposition".
#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutcome {
    pub tasks: Vec<AtomicTask>,
    pub usage: UsageRecord,
}

/// Asks the generative backend to break a question into atomic tasks.
#[derive(Clone)]
pub struct TaskSplitter {
    invoker: GenerationInvoker,
    template: PromptTemplate,
    max_tasks: usize,
}

impl TaskSplitter {
    pub fn new(invoker: GenerationInvoker, template: PromptTemplate, max_tasks: usize) -> Self {
        Self {
            invoker,
            template,
            max_tasks: max_tasks.max(1),
        }
    }

    /// Backend failures propagate; unusable output yields no tasks.
    pub async fn split(&self, question: &str) -> Result<SplitOutcome, LlmError> {
        let generation = self
            .invoker
            .invoke(GenerationTask::SplitTask, &self.template, question, &[])
            .await?;

        let raw_tasks = match parse_string_array(&generation.content) {
            Ok(Some(items)) => items,
            Ok(None) => {
                info!("split returned no decomposition");
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, "split output unusable, continuing without augmentation");
                Vec::new()
            }
        };

        let total = raw_tasks.len();
        let tasks: Vec<AtomicTask> = raw_tasks
            .iter()
            .filter(|raw| !raw.trim().is_empty())
            .take(self.max_tasks)
            .map(|raw| AtomicTask::parse(raw))
            .collect();
        if total > tasks.len() {
            info!(received = total, kept = tasks.len(), "split tasks truncated");
        }
        info!(tasks = tasks.len(), "question split");

        Ok(SplitOutcome {
            tasks,
            usage: generation.usage,
        })
    }
}
