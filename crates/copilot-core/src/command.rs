//! Command validation against a signature catalog.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where a valid command is shipped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    Core,
    Extension,
}

/// Classification of a candidate command string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid(CommandSource),
    /// Not shaped like a command of this CLI at all.
    NotACommand,
    UnknownSignature,
    /// Known signature with at least one unrecognized parameter flag.
    InvalidParameters,
}

/// A command string split into its signature and parameter flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub signature: String,
    pub flags: Vec<String>,
}

/// Split a command at the first token beginning with `-`.
///
/// Tokens before it form the signature; every later token that begins with
/// `-` is a flag. Value tokens are dropped.
pub fn parse_command_info(command: &str) -> CommandInfo {
    let mut signature = Vec::new();
    let mut flags = Vec::new();
    let mut in_arguments = false;
    for token in command.split_whitespace() {
        if token.starts_with('-') {
            in_arguments = true;
            flags.push(token.to_string());
        } else if !in_arguments {
            signature.push(token);
        }
    }
    CommandInfo {
        signature: signature.join(" "),
        flags,
    }
}

/// Known command surface. Lookups are in-memory and synchronous.
pub trait CommandCatalog: Send + Sync {
    fn validate(&self, signature: &str, flags: &[String]) -> ValidationOutcome;
}

impl CommandCatalog for Arc<dyn CommandCatalog> {
    fn validate(&self, signature: &str, flags: &[String]) -> ValidationOutcome {
        (**self).validate(signature, flags)
    }
}

/// Adapter turning raw command strings into catalog lookups.
#[derive(Clone)]
pub struct CommandValidator {
    catalog: Arc<dyn CommandCatalog>,
}

impl CommandValidator {
    pub fn new(catalog: Arc<dyn CommandCatalog>) -> Self {
        Self { catalog }
    }

    pub fn validate(&self, command: &str) -> ValidationOutcome {
        let info = parse_command_info(command);
        if info.signature.is_empty() {
            return ValidationOutcome::NotACommand;
        }
        let outcome = self.catalog.validate(&info.signature, &info.flags);
        debug!(
            signature = %info.signature,
            flag_count = info.flags.len(),
            outcome = ?outcome,
            "command validated"
        );
        outcome
    }
}
