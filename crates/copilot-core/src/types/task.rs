//! Atomic steps produced by question decomposition.

use serde::{Deserialize, Serialize};

use super::KnowledgeChunk;

/// Separator between a step description and a command guess.
pub const TASK_SEPARATOR: &str = "||";

/// A single decomposed step with an optional, untrusted command guess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicTask {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_command: Option<String>,
}

impl AtomicTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            candidate_command: None,
        }
    }

    pub fn with_candidate(mut self, command: impl Into<String>) -> Self {
        self.candidate_command = Some(command.into());
        self
    }

    /// Cut a raw `description||command` line on the first separator.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(TASK_SEPARATOR) {
            Some((description, command)) => {
                let command = command.trim();
                Self {
                    description: description.trim().to_string(),
                    candidate_command: (!command.is_empty()).then(|| command.to_string()),
                }
            }
            None => Self::new(raw.trim()),
        }
    }
}

/// Grounded guidance for one atomic task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Either the validated (possibly trimmed) command or the step description.
    pub guide_step: String,
    #[serde(default)]
    pub chunks: Vec<KnowledgeChunk>,
}

impl TaskContext {
    pub fn new(guide_step: impl Into<String>, chunks: Vec<KnowledgeChunk>) -> Self {
        Self {
            guide_step: guide_step.into(),
            chunks,
        }
    }

    /// Context carrying only the step text, used whenever grounding fails.
    pub fn ungrounded(description: impl Into<String>) -> Self {
        Self::new(description, Vec::new())
    }
}
