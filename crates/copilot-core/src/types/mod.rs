//! Request-local data model.

mod chunk;
mod message;
mod scenario;
mod task;

pub use chunk::{KnowledgeChunk, Parameter};
pub use message::{HistoryMessage, Role};
pub use scenario::{CommandEntry, EntryTarget, Scenario};
pub use task::{AtomicTask, TaskContext, TASK_SEPARATOR};
