//! Generation invoker: builds the message list for one task and records
//! token usage for the call.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, Level};

use copilot_config::GenerationConfig;
use copilot_core::assembler::{count_message_tokens, TokenCounter};
use copilot_core::types::{HistoryMessage, Role};

use crate::llm::{
    truncate_for_log, ChatMessage, ChatRequest, LlmClient, LlmError, MAX_LLM_OUTPUT_LOG_CHARS,
    MAX_PROMPT_LOG_CHARS,
};
use crate::prompts::PromptTemplate;
use crate::tokens::default_token_counter;

/// Sampling parameters shared by every generative call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub stop: Option<Vec<String>>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

impl From<&GenerationConfig> for GenerationParams {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            stop: config.stop.clone(),
        }
    }
}

/// Which generative task a call served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTask {
    GenerateScenario,
    SplitTask,
    CheckSimilarity,
}

impl GenerationTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerateScenario => "generate_scenario",
            Self::SplitTask => "split_task",
            Self::CheckSimilarity => "check_similarity",
        }
    }
}

/// Token accounting for one generative call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub task: GenerationTask,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// `true` when the backend reported usage, `false` for local estimates.
    pub reported: bool,
    pub estimated_question_tokens: usize,
    pub estimated_history_tokens: usize,
    pub estimated_prompt_tokens: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Raw model output plus its usage.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub content: String,
    pub usage: UsageRecord,
}

/// Sends prompt template, history and question to the generative backend.
#[derive(Clone)]
pub struct GenerationInvoker {
    client: Arc<dyn LlmClient>,
    params: GenerationParams,
    counter: Arc<dyn TokenCounter>,
}

impl GenerationInvoker {
    pub fn new(client: Arc<dyn LlmClient>, params: GenerationParams) -> Self {
        Self {
            client,
            params,
            counter: default_token_counter(),
        }
    }

    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn counter(&self) -> Arc<dyn TokenCounter> {
        self.counter.clone()
    }

    /// Template messages, then history, then one user message joining the
    /// user turns of history with the question.
    pub fn build_messages(
        template: &PromptTemplate,
        question: &str,
        history: &[HistoryMessage],
    ) -> Vec<ChatMessage> {
        let mut messages = template.messages().to_vec();
        messages.extend(history.iter().map(ChatMessage::from));
        let mut joined: Vec<&str> = history
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        joined.push(question);
        messages.push(ChatMessage::user(joined.join("\n")));
        messages
    }

    pub async fn invoke(
        &self,
        task: GenerationTask,
        template: &PromptTemplate,
        question: &str,
        history: &[HistoryMessage],
    ) -> Result<Generation, LlmError> {
        let messages = Self::build_messages(template, question, history);
        let counter = self.counter.as_ref();
        let estimated_prompt_tokens = template.token_cost(counter);
        let estimated_question_tokens = counter.count(question);
        let estimated_history_tokens = if history.is_empty() {
            0
        } else {
            count_message_tokens(counter, history.iter().map(|m| m.content.as_str()))
        };

        if tracing::enabled!(Level::DEBUG) {
            let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
            debug!(
                task = task.as_str(),
                model = %self.params.model,
                message_count = messages.len(),
                question = %truncate_for_log(last, MAX_PROMPT_LOG_CHARS),
                "generation request"
            );
        }

        let request = ChatRequest {
            model: self.params.model.clone(),
            messages,
            temperature: self.params.temperature,
            max_tokens: self.params.max_tokens,
            top_p: self.params.top_p,
            frequency_penalty: self.params.frequency_penalty,
            presence_penalty: self.params.presence_penalty,
            stop: self.params.stop.clone(),
        };
        let estimated_total_prompt = count_message_tokens(
            counter,
            request.messages.iter().map(|m| m.content.as_str()),
        );

        let started_at = Utc::now();
        let started = Instant::now();
        let response = self.client.chat(request).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (prompt_tokens, completion_tokens, total_tokens, reported) = match response.usage {
            Some(usage) => (
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens,
                true,
            ),
            None => {
                let prompt = estimated_total_prompt as u32;
                let completion = counter.count(&response.content) as u32;
                (prompt, completion, prompt + completion, false)
            }
        };

        if tracing::enabled!(Level::DEBUG) {
            debug!(
                task = task.as_str(),
                output = %truncate_for_log(&response.content, MAX_LLM_OUTPUT_LOG_CHARS),
                "generation output"
            );
        }
        info!(
            task = task.as_str(),
            model = %self.params.model,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            reported,
            duration_ms,
            "generation completed"
        );

        Ok(Generation {
            content: response.content,
            usage: UsageRecord {
                task,
                model: self.params.model.clone(),
                prompt_tokens,
                completion_tokens,
                total_tokens,
                reported,
                estimated_question_tokens,
                estimated_history_tokens,
                estimated_prompt_tokens,
                started_at,
                duration_ms,
            },
        })
    }
}
