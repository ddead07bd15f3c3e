use serde::{Deserialize, Serialize};
use thiserror::Error;

use copilot_runtime::PipelineError;

/// Stable error codes returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidParameter,
    GenerationTimeout,
    GenerationThrottled,
    GenerationFailed,
    MalformedGenerationResult,
    Cancelled,
}

impl ErrorCode {
    /// HTTP-style status reported in the envelope.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidParameter => 400,
            Self::Cancelled => 499,
            _ => 500,
        }
    }

    /// Fixed text shown to callers. Internal error details are only logged.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidParameter => "Illegal parameter",
            Self::GenerationTimeout => "The generation service timed out",
            Self::GenerationThrottled => "The generation service is busy, please retry later",
            Self::GenerationFailed => "The generation service failed",
            Self::MalformedGenerationResult => "The generation service returned an invalid result",
            Self::Cancelled => "The request was cancelled",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidParameter(_) => ErrorCode::InvalidParameter,
            Self::Pipeline(PipelineError::Generation(err)) => match err {
                copilot_llm::LlmError::Timeout(_) => ErrorCode::GenerationTimeout,
                copilot_llm::LlmError::Throttled(_) => ErrorCode::GenerationThrottled,
                _ => ErrorCode::GenerationFailed,
            },
            Self::Pipeline(PipelineError::Malformed(_)) => ErrorCode::MalformedGenerationResult,
            Self::Pipeline(PipelineError::Cancelled) => ErrorCode::Cancelled,
        }
    }

    /// Parameter errors carry a caller-actionable message; everything else
    /// is reduced to the public message of its code.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidParameter(detail) => format!("Illegal parameter: {}", detail),
            other => other.code().public_message().to_string(),
        }
    }
}
