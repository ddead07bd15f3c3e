use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use copilot_runtime::{CopilotApp, Pipeline};

use crate::dto::{CopilotRequest, ResponseEnvelope};
use crate::error::ApiError;

/// Public detail for bodies that are not a valid request document.
pub const MALFORMED_BODY_DETAIL: &str = "malformed request body";

/// Caller-facing entry point: validates requests, runs the pipeline and
/// wraps every outcome in a [`ResponseEnvelope`].
#[derive(Clone)]
pub struct CopilotService {
    pipeline: Pipeline,
    api_version: String,
}

impl CopilotService {
    pub fn new(pipeline: Pipeline, api_version: impl Into<String>) -> Self {
        Self {
            pipeline,
            api_version: api_version.into(),
        }
    }

    pub fn from_app(app: CopilotApp) -> Self {
        let api_version = app.config.app.api_version.clone();
        Self::new(app.pipeline, api_version)
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub async fn handle(&self, request: CopilotRequest) -> ResponseEnvelope {
        self.handle_with_cancel(request, &CancellationToken::new())
            .await
    }

    pub async fn handle_with_cancel(
        &self,
        request: CopilotRequest,
        cancel: &CancellationToken,
    ) -> ResponseEnvelope {
        match self.serve(&request, cancel).await {
            Ok(envelope) => envelope,
            Err(err) => self.failure(err),
        }
    }

    /// Same as [`CopilotService::handle`] for a raw JSON body.
    pub async fn handle_json(&self, body: &str) -> ResponseEnvelope {
        match serde_json::from_str::<CopilotRequest>(body) {
            Ok(request) => self.handle(request).await,
            Err(err) => {
                warn!(error = %err, "request body rejected");
                self.failure(ApiError::InvalidParameter(
                    MALFORMED_BODY_DETAIL.to_string(),
                ))
            }
        }
    }

    async fn serve(
        &self,
        request: &CopilotRequest,
        cancel: &CancellationToken,
    ) -> Result<ResponseEnvelope, ApiError> {
        let pipeline_request = request.validate()?;
        let output = self.pipeline.run(&pipeline_request, cancel).await?;
        info!(
            request_id = %output.request_id,
            service_type = output.service_type.as_str(),
            scenarios = output.scenarios.len(),
            total_tokens = output.usage.total_tokens(),
            "response status 200"
        );
        Ok(ResponseEnvelope::ok(output.scenarios, &self.api_version))
    }

    fn failure(&self, err: ApiError) -> ResponseEnvelope {
        let code = err.code();
        if code.status() < 500 {
            warn!(status = code.status(), code = ?code, error = %err, "request rejected");
        } else {
            error!(status = code.status(), code = ?code, error = %err, "request failed");
        }
        ResponseEnvelope::failure(&err, &self.api_version)
    }
}
