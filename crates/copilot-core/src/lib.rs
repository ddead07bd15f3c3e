//! # Copilot Core
//!
//! Data model and deterministic logic of the scenario copilot.
//!
//! This crate contains:
//! - Question, history, task, chunk and scenario types
//! - Command validation against a signature catalog
//! - Chunk filtering, merging and command trimming
//! - Token-budgeted question assembly
//! - Tolerant parsing of model output
//! - Rule-based scenario correction
//!
//! It performs no I/O. Backends are reached through the traits in
//! [`knowledge`] and [`command`].

pub mod assembler;
pub mod chunks;
pub mod command;
pub mod correction;
pub mod knowledge;
pub mod parser;
pub mod similarity;
pub mod types;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::assembler::{
        count_message_tokens, Assembly, ContextAssembler, HeuristicTokenCounter, TokenBudget,
        TokenCounter,
    };
    pub use crate::chunks::{merge_chunks, top_chunks, trim_command_and_chunk, ChunkFilter};
    pub use crate::command::{
        parse_command_info, CommandCatalog, CommandInfo, CommandSource, CommandValidator,
        ValidationOutcome,
    };
    pub use crate::correction::{CorrectionAction, CorrectionEngine, CorrectionRule};
    pub use crate::knowledge::{
        Embedder, KnowledgeError, KnowledgeIndex, NoopScenarioSearch, RawChunk, ScenarioSearch,
        SearchHit,
    };
    pub use crate::parser::{parse_scenario, parse_string_array, ParseError};
    pub use crate::similarity::KeywordMatcher;
    pub use crate::types::{
        AtomicTask, CommandEntry, EntryTarget, HistoryMessage, KnowledgeChunk, Parameter, Role,
        Scenario, TaskContext,
    };
}

// Re-export key types at crate root
pub use assembler::{ContextAssembler, TokenCounter};
pub use command::{CommandCatalog, CommandSource, CommandValidator, ValidationOutcome};
pub use correction::CorrectionEngine;
pub use knowledge::{Embedder, KnowledgeError, KnowledgeIndex, ScenarioSearch};
pub use parser::ParseError;
pub use types::{
    AtomicTask, CommandEntry, HistoryMessage, KnowledgeChunk, Parameter, Role, Scenario,
    TaskContext,
};
