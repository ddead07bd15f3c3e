//! Token counting with the `cl100k_base` BPE used by the chat models.

use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tiktoken_rs::CoreBPE;
use tracing::warn;

use copilot_core::assembler::{HeuristicTokenCounter, TokenCounter};

#[derive(Debug, Error)]
#[error("failed to load cl100k_base encoding: {0}")]
pub struct TokenizerError(String);

/// Exact token counts for `cl100k_base` models.
#[derive(Clone)]
pub struct Cl100kTokenCounter {
    bpe: Arc<CoreBPE>,
}

impl Cl100kTokenCounter {
    pub fn new() -> Result<Self, TokenizerError> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| TokenizerError(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenCounter for Cl100kTokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Shared default counter. Falls back to the heuristic when the encoding
/// cannot be loaded.
pub fn default_token_counter() -> Arc<dyn TokenCounter> {
    static COUNTER: OnceLock<Arc<dyn TokenCounter>> = OnceLock::new();
    COUNTER
        .get_or_init(|| match Cl100kTokenCounter::new() {
            Ok(counter) => Arc::new(counter),
            Err(err) => {
                warn!(error = %err, "using heuristic token counter");
                Arc::new(HeuristicTokenCounter)
            }
        })
        .clone()
}
