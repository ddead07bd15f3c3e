//! Token-budgeted augmentation of the user question.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::chunks::merge_chunks;
use crate::types::TaskContext;

pub const GUIDANCE_INTRO: &str = "\nHere are the steps you can refer to for this question:\n";
pub const CONTEXT_INTRO: &str = "\nBelow are some potentially relevant CLI commands information as context, please select the commands information that may be used in the scenario of the question from context, and supplement the missing commands information of context\n";

/// Framing overhead per chat message.
const TOKENS_PER_MESSAGE: usize = 4;
/// Every reply is primed with an assistant header.
const TOKENS_REPLY_PRIMING: usize = 2;

/// Estimates how many model tokens a text occupies.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

impl TokenCounter for Arc<dyn TokenCounter> {
    fn count(&self, text: &str) -> usize {
        (**self).count(text)
    }
}

/// Fallback estimate for BPE tokenizers: every punctuation character is one
/// token and alphanumeric runs cost one token per four characters. Compact
/// JSON is therefore counted by its delimiters, not its few spaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        let mut tokens = 0;
        let mut run = 0usize;
        for c in text.chars() {
            if c.is_alphanumeric() {
                run += 1;
                continue;
            }
            tokens += run.div_ceil(4);
            run = 0;
            if !c.is_whitespace() {
                tokens += 1;
            }
        }
        tokens + run.div_ceil(4)
    }
}

/// Token estimate of a chat transcript including per-message framing.
pub fn count_message_tokens<'a, I>(counter: &dyn TokenCounter, contents: I) -> usize
where
    I: IntoIterator<Item = &'a str>,
{
    contents
        .into_iter()
        .map(|content| TOKENS_PER_MESSAGE + counter.count(content))
        .sum::<usize>()
        + TOKENS_REPLY_PRIMING
}

/// Inputs of the augmentation budget formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub token_limit: u32,
    pub reserved_completion_tokens: u32,
    pub adjustment_factor: f64,
    pub system_prompt_tokens: usize,
}

impl TokenBudget {
    /// `(limit - reserved) * factor - system prompt`, floored at zero.
    pub fn available(&self) -> usize {
        let window = self
            .token_limit
            .saturating_sub(self.reserved_completion_tokens) as f64;
        let remaining = window * self.adjustment_factor - self.system_prompt_tokens as f64;
        if remaining <= 0.0 {
            0
        } else {
            remaining.floor() as usize
        }
    }
}

/// Result of an assembly pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    pub question: String,
    pub guidance_added: bool,
    pub context_added: bool,
    /// Estimated tokens of the guidance section, whether appended or not.
    pub guidance_tokens: usize,
    /// Estimated tokens of the chunk context section, whether appended or not.
    pub context_tokens: usize,
}

/// Appends guidance and chunk context sections to a question, each one only
/// when the whole section fits the budget.
#[derive(Clone)]
pub struct ContextAssembler {
    counter: Arc<dyn TokenCounter>,
}

impl ContextAssembler {
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    pub fn assemble(&self, question: &str, contexts: &[TaskContext], budget: usize) -> Assembly {
        let guide_steps: Vec<&str> = contexts.iter().map(|c| c.guide_step.as_str()).collect();
        let chunks = merge_chunks(
            contexts
                .iter()
                .flat_map(|c| c.chunks.iter().cloned())
                .collect(),
        );
        let rendered: Vec<String> = chunks.iter().map(|chunk| chunk.render()).collect();

        let guidance = build_section(GUIDANCE_INTRO, guide_steps.iter().copied());
        let context = build_section(CONTEXT_INTRO, rendered.iter().map(String::as_str));

        let mut assembly = Assembly {
            question: question.to_string(),
            guidance_added: false,
            context_added: false,
            guidance_tokens: guidance.as_deref().map_or(0, |s| self.counter.count(s)),
            context_tokens: context.as_deref().map_or(0, |s| self.counter.count(s)),
        };
        if let Some(section) = guidance {
            assembly.guidance_added = self.try_append(&mut assembly.question, &section, budget);
        }
        if let Some(section) = context {
            assembly.context_added = self.try_append(&mut assembly.question, &section, budget);
        }

        info!(
            budget,
            guide_steps = guide_steps.len(),
            chunks = chunks.len(),
            guidance_added = assembly.guidance_added,
            context_added = assembly.context_added,
            "question assembled"
        );
        assembly
    }

    fn try_append(&self, question: &mut String, section: &str, budget: usize) -> bool {
        let mut candidate = String::with_capacity(question.len() + section.len());
        candidate.push_str(question);
        candidate.push_str(section);
        let tokens = self.counter.count(&candidate);
        if tokens > budget {
            debug!(tokens, budget, "section skipped, over budget");
            return false;
        }
        *question = candidate;
        true
    }
}

fn build_section<'a, I>(intro: &str, lines: I) -> Option<String>
where
    I: Iterator<Item = &'a str>,
{
    let body: Vec<&str> = lines.filter(|line| !line.trim().is_empty()).collect();
    if body.is_empty() {
        return None;
    }
    Some(format!("\n{}{}", intro, body.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KnowledgeChunk, Parameter};

    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(Arc::new(WordCounter))
    }

    fn contexts() -> Vec<TaskContext> {
        vec![
            TaskContext::new("az group create --name --location", Vec::new()),
            TaskContext::new(
                "Create a storage account",
                vec![KnowledgeChunk::new("az storage account create", "Create a storage account.", 0.8)
                    .with_required(vec![Parameter::new("--name -n", "Account name.")])],
            ),
        ]
    }

    #[test]
    fn test_budget_formula() {
        let budget = TokenBudget {
            token_limit: 8192,
            reserved_completion_tokens: 4000,
            adjustment_factor: 0.95,
            system_prompt_tokens: 500,
        };
        assert_eq!(budget.available(), 3482);
    }

    #[test]
    fn test_budget_clamps_to_zero() {
        let budget = TokenBudget {
            token_limit: 4096,
            reserved_completion_tokens: 4000,
            adjustment_factor: 0.95,
            system_prompt_tokens: 500,
        };
        assert_eq!(budget.available(), 0);
    }

    #[test]
    fn test_both_sections_added_when_budget_allows() {
        let assembly = assembler().assemble("How to host a site?", &contexts(), 10_000);
        assert!(assembly.guidance_added);
        assert!(assembly.context_added);
        let guidance_at = assembly.question.find(GUIDANCE_INTRO).expect("guidance");
        let context_at = assembly.question.find(CONTEXT_INTRO).expect("context");
        assert!(guidance_at < context_at);
        assert!(assembly.question.starts_with("How to host a site?"));
        assert!(assembly.question.contains("\"command\":\"az storage account create\""));
    }

    #[test]
    fn test_sections_are_all_or_nothing() {
        let counter = WordCounter;
        let question = "How to host a site?";
        let full = assembler().assemble(question, &contexts(), 10_000);
        let with_guidance_only = counter.count(question) + full.guidance_tokens;

        let assembly = assembler().assemble(question, &contexts(), with_guidance_only);
        assert!(assembly.guidance_added);
        assert!(!assembly.context_added);
        assert!(!assembly.question.contains("Below are some"));
        assert!(counter.count(&assembly.question) <= with_guidance_only);

        let assembly = assembler().assemble(question, &contexts(), with_guidance_only - 1);
        assert!(!assembly.guidance_added);
        assert_eq!(assembly.question, question);
    }

    #[test]
    fn test_context_can_fit_when_guidance_does_not() {
        let long_steps: Vec<TaskContext> = (0..50)
            .map(|i| TaskContext::new(format!("step number {} with many words in it", i), Vec::new()))
            .chain(std::iter::once(TaskContext::new(
                "short",
                vec![KnowledgeChunk::new("az group list", "List groups.", 0.5)],
            )))
            .collect();
        let assembly = assembler().assemble("q", &long_steps, 60);
        assert!(!assembly.guidance_added);
        assert!(assembly.context_added);
        assert!(WordCounter.count(&assembly.question) <= 60);
    }

    #[test]
    fn test_no_sections_without_contexts() {
        let assembly = assembler().assemble("q", &[], 100);
        assert_eq!(assembly.question, "q");
        assert_eq!(assembly.guidance_tokens, 0);
    }

    #[test]
    fn test_message_tokens_include_framing() {
        let tokens = count_message_tokens(&WordCounter, ["one two", "three"]);
        assert_eq!(tokens, 4 + 2 + 4 + 1 + 2);
    }

    #[test]
    fn test_heuristic_counter_scales_with_word_length() {
        let counter = HeuristicTokenCounter;
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("az vm create"), 1 + 1 + 2);
        // - - generate - ssh - keys
        assert_eq!(counter.count("--generate-ssh-keys"), 1 + 1 + 2 + 1 + 1 + 1 + 1);
        assert_eq!(counter.count(r#"{"a":1}"#), 7);
    }

    #[test]
    fn test_large_json_chunk_rejected_under_tight_budget() {
        let parameters: Vec<Parameter> = (0..40)
            .map(|i| Parameter::new(format!("--param-{}", i), format!("Parameter {}.", i)))
            .collect();
        let contexts = vec![TaskContext::new(
            "Create a virtual machine",
            vec![KnowledgeChunk::new("az vm create", "Create a VM.", 0.9).with_optional(parameters)],
        )];
        let counter = HeuristicTokenCounter;
        let assembler = ContextAssembler::new(Arc::new(counter));
        let budget = 120;

        let assembly = assembler.assemble("Create a vm", &contexts, budget);
        assert!(assembly.guidance_added);
        assert!(!assembly.context_added);
        assert!(assembly.context_tokens > budget);
        assert!(counter.count(&assembly.question) <= budget);
    }
}
