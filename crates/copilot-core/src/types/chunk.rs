//! Command documentation fragments retrieved from the knowledge index.

use serde::{Deserialize, Serialize};

/// A documented parameter. `name` may hold several whitespace-separated aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "desc", alias = "description", default)]
    pub description: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.name.split_whitespace()
    }
}

/// Parsed documentation for one command signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub command: String,
    #[serde(default)]
    pub summary: String,
    #[serde(
        rename = "required parameters",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub required_parameters: Vec<Parameter>,
    #[serde(
        rename = "optional parameters",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub optional_parameters: Vec<Parameter>,
    /// Relevance score; not part of the rendered context.
    #[serde(skip)]
    pub score: f64,
}

impl KnowledgeChunk {
    pub fn new(command: impl Into<String>, summary: impl Into<String>, score: f64) -> Self {
        Self {
            command: command.into(),
            summary: summary.into(),
            required_parameters: Vec::new(),
            optional_parameters: Vec::new(),
            score,
        }
    }

    pub fn with_required(mut self, params: Vec<Parameter>) -> Self {
        self.required_parameters = params;
        self
    }

    pub fn with_optional(mut self, params: Vec<Parameter>) -> Self {
        self.optional_parameters = params;
        self
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.required_parameters
            .iter()
            .chain(self.optional_parameters.iter())
    }

    /// Compact single-line JSON used in the augmented question.
    pub fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.command.clone())
    }
}
