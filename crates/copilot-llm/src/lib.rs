//! Generative backend access: chat clients, prompt templates and the
//! generation invoker.

pub mod factory;
pub mod invoker;
pub mod llm;
pub mod prompts;
pub mod tokens;

pub use factory::{build_client, LlmBuildError};
pub use invoker::{
    Generation, GenerationInvoker, GenerationParams, GenerationTask, UsageRecord,
};
pub use llm::{
    ChatDialect, ChatMessage, ChatRequest, ChatResponse, HttpLlmClient, HttpLlmClientConfig,
    LlmClient, LlmError, MockLlmClient, TokenUsage,
};
pub use prompts::{PromptSet, PromptTemplate};
pub use tokens::{default_token_counter, Cl100kTokenCounter, TokenizerError};
