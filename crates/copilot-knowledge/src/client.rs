use std::sync::Arc;

use tracing::debug;

use copilot_core::chunks::{merge_chunks, top_chunks};
use copilot_core::knowledge::{Embedder, KnowledgeError, KnowledgeIndex};
use copilot_core::types::KnowledgeChunk;

use crate::index::parse_chunk;

/// Embeds a text and retrieves parsed documentation chunks for it.
#[derive(Clone)]
pub struct KnowledgeClient {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn KnowledgeIndex>,
    top_k: usize,
}

impl KnowledgeClient {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn KnowledgeIndex>, top_k: usize) -> Self {
        Self {
            embedder,
            index,
            top_k: top_k.max(1),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Chunks nearest to `text`, optionally restricted to one signature.
    pub async fn retrieve(
        &self,
        text: &str,
        filter_command: Option<&str>,
    ) -> Result<Vec<KnowledgeChunk>, KnowledgeError> {
        let vector = self.embedder.embed(text).await?;
        let raw = self.index.query(&vector, filter_command, self.top_k).await?;
        let chunks: Vec<KnowledgeChunk> = raw.iter().map(parse_chunk).collect();
        debug!(
            filter = filter_command.unwrap_or_default(),
            chunks = chunks.len(),
            "chunks retrieved"
        );
        Ok(chunks)
    }

    /// Highest-scoring merged chunk documenting exactly `signature`.
    pub async fn retrieve_best_for_signature(
        &self,
        text: &str,
        signature: &str,
    ) -> Result<Option<KnowledgeChunk>, KnowledgeError> {
        let chunks = self.retrieve(text, Some(signature)).await?;
        let matching: Vec<KnowledgeChunk> = chunks
            .into_iter()
            .filter(|chunk| chunk.command == signature)
            .collect();
        Ok(top_chunks(merge_chunks(matching), 1).into_iter().next())
    }
}
