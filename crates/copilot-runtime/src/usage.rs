use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use copilot_llm::UsageRecord;

/// Summed token usage of one model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub calls: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Estimates gathered while augmenting the question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AugmentationStats {
    pub task_count: usize,
    pub token_budget: usize,
    pub estimated_task_list_tokens: usize,
    pub estimated_context_tokens: usize,
    pub guidance_added: bool,
    pub context_added: bool,
}

/// Every generative call of a request plus per-model totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub calls: Vec<UsageRecord>,
    pub by_model: BTreeMap<String, ModelUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub augmentation: Option<AugmentationStats>,
}

impl UsageReport {
    pub fn record(&mut self, usage: UsageRecord) {
        let totals = self.by_model.entry(usage.model.clone()).or_default();
        totals.calls += 1;
        totals.prompt_tokens += u64::from(usage.prompt_tokens);
        totals.completion_tokens += u64::from(usage.completion_tokens);
        totals.total_tokens += u64::from(usage.total_tokens);
        self.calls.push(usage);
    }

    pub fn total_tokens(&self) -> u64 {
        self.by_model.values().map(|m| m.total_tokens).sum()
    }
}
