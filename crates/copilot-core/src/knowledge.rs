//! Seams to the external embedding, knowledge index and scenario search
//! services.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Scenario;

/// Embedding, index or search failures. Always recovered by the caller.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("http error: {0}")]
    Http(String),
    #[error("response error: {0}")]
    Response(String),
    #[error("empty embedding returned")]
    EmptyEmbedding,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

/// Text embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError>;
}

#[async_trait]
impl Embedder for Arc<dyn Embedder> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError> {
        (**self).embed(text).await
    }
}

/// A raw index hit before section parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChunk {
    /// Command signature the documentation belongs to.
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

/// Vector index over command documentation.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// `filter_command` restricts hits to one exact signature.
    async fn query(
        &self,
        vector: &[f32],
        filter_command: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<RawChunk>, KnowledgeError>;
}

#[async_trait]
impl KnowledgeIndex for Arc<dyn KnowledgeIndex> {
    async fn query(
        &self,
        vector: &[f32],
        filter_command: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<RawChunk>, KnowledgeError> {
        (**self).query(vector, filter_command, top_k).await
    }
}

/// A vetted scenario returned by search, with its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub scenario: Scenario,
    pub score: f64,
}

/// Search over vetted scenarios.
#[async_trait]
pub trait ScenarioSearch: Send + Sync {
    async fn search(&self, question: &str, top_num: usize) -> Result<Vec<SearchHit>, KnowledgeError>;
}

#[async_trait]
impl ScenarioSearch for Arc<dyn ScenarioSearch> {
    async fn search(&self, question: &str, top_num: usize) -> Result<Vec<SearchHit>, KnowledgeError> {
        (**self).search(question, top_num).await
    }
}

/// Search backend that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScenarioSearch;

#[async_trait]
impl ScenarioSearch for NoopScenarioSearch {
    async fn search(&self, _question: &str, _top_num: usize) -> Result<Vec<SearchHit>, KnowledgeError> {
        Ok(Vec::new())
    }
}
