//! In-memory command catalog loaded from a YAML or JSON file.
//!
//! ```yaml
//! global_parameters: ["--debug", "--output -o", "--query", "--subscription"]
//! commands:
//!   - signature: az group create
//!     source: core
//!     parameters: ["--name -n", "--resource-group -g", "--location -l", "--tags"]
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use copilot_core::command::{CommandCatalog, CommandSource, ValidationOutcome};

/// Catalog loading errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("duplicate signature: {0}")]
    Duplicate(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub global_parameters: Vec<String>,
    #[serde(default)]
    pub commands: Vec<CatalogCommand>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogCommand {
    pub signature: String,
    #[serde(default = "default_source")]
    pub source: CommandSource,
    /// Each entry lists whitespace-separated aliases of one parameter.
    #[serde(default)]
    pub parameters: Vec<String>,
}

fn default_source() -> CommandSource {
    CommandSource::Core
}

#[derive(Debug, Clone)]
struct Entry {
    source: CommandSource,
    flags: HashSet<String>,
}

/// Known signatures with their accepted flags.
#[derive(Debug, Clone)]
pub struct StaticCommandCatalog {
    prefix: String,
    global_flags: HashSet<String>,
    commands: HashMap<String, Entry>,
}

impl StaticCommandCatalog {
    pub fn new(prefix: impl Into<String>, file: CatalogFile) -> Result<Self, CatalogError> {
        let global_flags = split_aliases(&file.global_parameters);
        let mut commands = HashMap::with_capacity(file.commands.len());
        for command in file.commands {
            let signature = normalize_signature(&command.signature);
            let entry = Entry {
                source: command.source,
                flags: split_aliases(&command.parameters),
            };
            if commands.insert(signature.clone(), entry).is_some() {
                return Err(CatalogError::Duplicate(signature));
            }
        }
        Ok(Self {
            prefix: prefix.into(),
            global_flags,
            commands,
        })
    }

    /// Catalog with no commands; every prefixed signature is unknown.
    pub fn empty(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            global_flags: HashSet::new(),
            commands: HashMap::new(),
        }
    }

    pub fn parse(prefix: impl Into<String>, content: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_yaml::from_str(content)?;
        Self::new(prefix, file)
    }

    pub fn load(prefix: impl Into<String>, path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::parse(prefix, &content)?;
        info!(
            path = %path.display(),
            commands = catalog.len(),
            "command catalog loaded"
        );
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn has_prefix(&self, signature: &str) -> bool {
        let mut tokens = signature.split_whitespace();
        tokens.next() == Some(self.prefix.as_str()) && tokens.next().is_some()
    }
}

impl CommandCatalog for StaticCommandCatalog {
    fn validate(&self, signature: &str, flags: &[String]) -> ValidationOutcome {
        if !self.has_prefix(signature) {
            return ValidationOutcome::NotACommand;
        }
        let Some(entry) = self.commands.get(&normalize_signature(signature)) else {
            return ValidationOutcome::UnknownSignature;
        };
        let all_known = flags.iter().all(|flag| {
            let flag = flag.split_once('=').map_or(flag.as_str(), |(name, _)| name);
            entry.flags.contains(flag) || self.global_flags.contains(flag)
        });
        if all_known {
            ValidationOutcome::Valid(entry.source)
        } else {
            ValidationOutcome::InvalidParameters
        }
    }
}

fn split_aliases(parameters: &[String]) -> HashSet<String> {
    parameters
        .iter()
        .flat_map(|p| p.split_whitespace())
        .map(str::to_string)
        .collect()
}

fn normalize_signature(signature: &str) -> String {
    signature.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
global_parameters: ["--debug", "--output -o", "--query"]
commands:
  - signature: az vm create
    source: core
    parameters: ["--name -n", "--resource-group -g", "--image", "--generate-ssh-keys", "--license-type"]
  - signature: az  containerapp up
    source: extension
    parameters: ["--name -n", "--source"]
"#;

    fn catalog() -> StaticCommandCatalog {
        StaticCommandCatalog::parse("az", CATALOG).expect("catalog")
    }

    fn flags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_valid_core_and_extension() {
        let catalog = catalog();
        assert_eq!(
            catalog.validate("az vm create", &flags(&["-n", "--image", "-o"])),
            ValidationOutcome::Valid(CommandSource::Core)
        );
        assert_eq!(
            catalog.validate("az containerapp up", &flags(&["--source=."])),
            ValidationOutcome::Valid(CommandSource::Extension)
        );
    }

    #[test]
    fn test_unknown_flag_is_invalid_parameters() {
        assert_eq!(
            catalog().validate("az vm create", &flags(&["--name", "--licence"])),
            ValidationOutcome::InvalidParameters
        );
    }

    #[test]
    fn test_unknown_signature_and_foreign_commands() {
        let catalog = catalog();
        assert_eq!(
            catalog.validate("az vm frobnicate", &[]),
            ValidationOutcome::UnknownSignature
        );
        assert_eq!(
            catalog.validate("kubectl apply", &[]),
            ValidationOutcome::NotACommand
        );
        assert_eq!(catalog.validate("az", &[]), ValidationOutcome::NotACommand);
        assert_eq!(
            catalog.validate("azure vm create", &[]),
            ValidationOutcome::NotACommand
        );
    }

    #[test]
    fn test_duplicate_signature_is_rejected() {
        let content = "commands:\n  - signature: az group create\n  - signature: az group  create\n";
        let err = StaticCommandCatalog::parse("az", content).err().expect("error");
        assert!(matches!(err, CatalogError::Duplicate(sig) if sig == "az group create"));
    }

    #[test]
    fn test_json_catalog_is_accepted() {
        let content = r#"{"commands":[{"signature":"az group list","parameters":["--tag"]}]}"#;
        let catalog = StaticCommandCatalog::parse("az", content).expect("catalog");
        assert_eq!(
            catalog.validate("az group list", &flags(&["--tag"])),
            ValidationOutcome::Valid(CommandSource::Core)
        );
    }
}
