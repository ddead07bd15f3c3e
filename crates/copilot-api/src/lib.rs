//! Caller-facing surface: request validation, stable error codes and the
//! response envelope.

pub mod dto;
pub mod error;
pub mod service;

pub use dto::{CopilotRequest, ErrorBody, ResponseEnvelope, DEFAULT_TOP_NUM, MAX_TOP_NUM};
pub use error::{ApiError, ErrorCode};
pub use service::{CopilotService, MALFORMED_BODY_DETAIL};
