//! Request orchestration: task splitting, per-task grounding, budgeted
//! augmentation, generation and correction.

pub mod bootstrap;
pub mod pipeline;
pub mod splitter;
pub mod task_context;
pub mod usage;

pub use bootstrap::{
    build_correction_engine, build_pipeline, init_tracing_if_needed, BootstrapError, CopilotApp,
};
pub use pipeline::{
    ParseServiceTypeError, Pipeline, PipelineError, PipelineOutput, PipelineRequest,
    PipelineSettings, ServiceType,
};
pub use splitter::{SplitOutcome, TaskSplitter};
pub use task_context::{Cancelled, TaskContextBuilder};
pub use usage::{AugmentationStats, ModelUsage, UsageReport};
