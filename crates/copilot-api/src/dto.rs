use serde::{Deserialize, Serialize};

use copilot_core::types::{HistoryMessage, Scenario};
use copilot_runtime::{PipelineRequest, ServiceType};

use crate::error::{ApiError, ErrorCode};

pub const DEFAULT_TOP_NUM: usize = 5;
pub const MAX_TOP_NUM: usize = 50;

/// Caller request as received on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopilotRequest {
    pub question: String,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    #[serde(default = "default_top_num")]
    pub top_num: usize,
    #[serde(default, alias = "type")]
    pub service_type: Option<String>,
}

fn default_top_num() -> usize {
    DEFAULT_TOP_NUM
}

impl CopilotRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            history: Vec::new(),
            top_num: DEFAULT_TOP_NUM,
            service_type: None,
        }
    }

    /// Check every field and convert into a pipeline request.
    pub fn validate(&self) -> Result<PipelineRequest, ApiError> {
        let question = self.question.trim();
        if question.is_empty() {
            return Err(ApiError::InvalidParameter(
                "please pass in the parameter \"question\"".to_string(),
            ));
        }
        if !(1..=MAX_TOP_NUM).contains(&self.top_num) {
            return Err(ApiError::InvalidParameter(format!(
                "the parameter \"top_num\" must be within [1, {}]",
                MAX_TOP_NUM
            )));
        }

        let mut request = PipelineRequest::new(question)
            .with_history(self.history.clone())
            .with_top_num(self.top_num);
        if let Some(raw) = self.service_type.as_deref().filter(|v| !v.trim().is_empty()) {
            let service_type: ServiceType = raw.parse().map_err(|_| {
                ApiError::InvalidParameter(format!(
                    "the parameter \"type\" must be one of generation, knowledgeSearch, mix, got '{}'",
                    raw
                ))
            })?;
            request = request.with_service_type(service_type);
        }
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// Response shape shared by success and failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub data: Vec<Scenario>,
    pub error: Option<ErrorBody>,
    pub status: u16,
    pub api_version: String,
}

impl ResponseEnvelope {
    pub fn ok(data: Vec<Scenario>, api_version: impl Into<String>) -> Self {
        Self {
            data,
            error: None,
            status: 200,
            api_version: api_version.into(),
        }
    }

    /// Failures always carry an empty data set.
    pub fn failure(error: &ApiError, api_version: impl Into<String>) -> Self {
        let code = error.code();
        Self {
            data: Vec::new(),
            error: Some(ErrorBody {
                code,
                message: error.public_message(),
            }),
            status: code.status(),
            api_version: api_version.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
