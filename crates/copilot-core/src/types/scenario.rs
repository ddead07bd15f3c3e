//! Scenario output model.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// A named, documented sequence of commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default, alias = "Scenario")]
    pub scenario: String,
    #[serde(
        rename = "commandSet",
        alias = "CommandSet",
        default,
        deserialize_with = "lenient_entries"
    )]
    pub command_set: Vec<CommandEntry>,
    #[serde(default, alias = "Description")]
    pub description: String,
    /// Fields carried through untouched (search metadata, model extras).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Scenario {
    pub fn new(scenario: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            command_set: Vec::new(),
            description: description.into(),
            extra: Map::new(),
        }
    }

    pub fn with_entry(mut self, entry: CommandEntry) -> Self {
        self.command_set.push(entry);
        self
    }

    /// Turn command entries not starting with `prefix` into free-text steps.
    pub fn map_unknown_to_steps(&mut self, prefix: &str) -> usize {
        let mut mapped = 0;
        for entry in &mut self.command_set {
            if let EntryTarget::Command { command, .. } = &entry.target {
                if !command.starts_with(prefix) {
                    entry.target = EntryTarget::Step {
                        step: command.clone(),
                    };
                    mapped += 1;
                }
            }
        }
        mapped
    }
}

/// Entries that are neither a command nor a step are dropped.
fn lenient_entries<'de, D>(deserializer: D) -> Result<Vec<CommandEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<CommandEntry>(value) {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(error = %err, "skipping command entry");
                None
            }
        })
        .collect())
}

/// One entry of a scenario's command set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEntry {
    #[serde(flatten)]
    pub target: EntryTarget,
    #[serde(default)]
    pub example: String,
    #[serde(default)]
    pub reason: String,
}

/// An executable command with its arguments, or a free-text step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryTarget {
    Command {
        command: String,
        #[serde(default)]
        arguments: Vec<String>,
    },
    Step {
        step: String,
    },
}

impl CommandEntry {
    pub fn command(
        command: impl Into<String>,
        arguments: Vec<String>,
        example: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            target: EntryTarget::Command {
                command: command.into(),
                arguments,
            },
            example: example.into(),
            reason: reason.into(),
        }
    }

    pub fn step(step: impl Into<String>, example: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: EntryTarget::Step { step: step.into() },
            example: example.into(),
            reason: reason.into(),
        }
    }

    pub fn command_name(&self) -> Option<&str> {
        match &self.target {
            EntryTarget::Command { command, .. } => Some(command),
            EntryTarget::Step { .. } => None,
        }
    }

    pub fn arguments(&self) -> &[String] {
        match &self.target {
            EntryTarget::Command { arguments, .. } => arguments,
            EntryTarget::Step { .. } => &[],
        }
    }

    pub fn is_step(&self) -> bool {
        matches!(self.target, EntryTarget::Step { .. })
    }
}
