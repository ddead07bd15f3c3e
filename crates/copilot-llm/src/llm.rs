use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use copilot_core::types::{HistoryMessage, Role};

pub(crate) const MAX_PROMPT_LOG_CHARS: usize = 4_000;
pub(crate) const MAX_LLM_OUTPUT_LOG_CHARS: usize = 8_000;

/// Chat message sent to the generative backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

impl From<&HistoryMessage> for ChatMessage {
    fn from(message: &HistoryMessage) -> Self {
        Self::new(message.role, message.content.clone())
    }
}

/// One chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub stop: Option<Vec<String>>,
}

/// Token usage reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Backend reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    /// `None` when the backend did not report usage.
    pub usage: Option<TokenUsage>,
}

/// Generative backend errors. None of them is retried here.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("generation timed out: {0}")]
    Timeout(String),
    #[error("generation throttled: {0}")]
    Throttled(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("response error: {0}")]
    Response(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// LLM client trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

#[async_trait]
impl LlmClient for Arc<dyn LlmClient> {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        (**self).chat(request).await
    }
}

/// Scripted client for tests and offline runs.
///
/// Replies are served in order; the last one repeats once the queue is
/// drained. Every request is recorded.
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: String,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockLlmClient {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: response.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Serve `responses` in order, then keep repeating the last one.
    pub fn with_sequence<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue: VecDeque<Result<String, LlmError>> =
            responses.into_iter().map(|r| Ok(r.into())).collect();
        let fallback = queue
            .back()
            .and_then(|r| r.as_ref().ok().cloned())
            .unwrap_or_default();
        Self {
            replies: Mutex::new(queue),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue an error for the next call.
    pub fn push_error(&self, error: LlmError) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(error));
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| LlmError::Response("mock reply queue poisoned".to_string()))?
            .pop_front();
        let content = match next {
            Some(reply) => reply?,
            None => self.fallback.clone(),
        };
        Ok(ChatResponse {
            content,
            usage: None,
        })
    }
}

/// Wire dialect of an OpenAI-compatible backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatDialect {
    /// `endpoint` is the full chat completions URL, bearer auth.
    OpenAi,
    /// `endpoint` is the resource base URL, the model names a deployment,
    /// `api-key` header auth.
    AzureOpenAi,
}

/// HTTP client config (OpenAI-compatible)
#[derive(Debug, Clone)]
pub struct HttpLlmClientConfig {
    pub dialect: ChatDialect,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_version: Option<String>,
    pub timeout_secs: u64,
    pub extra_headers: HeaderMap,
}

impl Default for HttpLlmClientConfig {
    fn default() -> Self {
        Self {
            dialect: ChatDialect::OpenAi,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            api_version: None,
            timeout_secs: 60,
            extra_headers: HeaderMap::new(),
        }
    }
}

/// HTTP LLM client using an OpenAI-compatible API
pub struct HttpLlmClient {
    client: reqwest::Client,
    config: HttpLlmClientConfig,
}

impl HttpLlmClient {
    pub fn new(config: HttpLlmClientConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url_for(&self, model: &str) -> String {
        match self.config.dialect {
            ChatDialect::OpenAi => self.config.endpoint.clone(),
            ChatDialect::AzureOpenAi => {
                let base = self.config.endpoint.trim_end_matches('/');
                let mut url = format!("{}/openai/deployments/{}/chat/completions", base, model);
                if let Some(version) = &self.config.api_version {
                    url.push_str("?api-version=");
                    url.push_str(version);
                }
                url
            }
        }
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = self.config.extra_headers.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.config.api_key {
            match self.config.dialect {
                ChatDialect::OpenAi => {
                    let value = format!("Bearer {}", key);
                    headers.insert(
                        AUTHORIZATION,
                        HeaderValue::from_str(&value).map_err(|e| LlmError::Http(e.to_string()))?,
                    );
                }
                ChatDialect::AzureOpenAi => {
                    headers.insert(
                        HeaderName::from_static("api-key"),
                        HeaderValue::from_str(key).map_err(|e| LlmError::Http(e.to_string()))?,
                    );
                }
            }
        }
        Ok(headers)
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

fn classify_status(status: StatusCode, body: String) -> LlmError {
    let detail = format!("HTTP {}: {}", status, body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::Throttled(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => LlmError::Timeout(detail),
        _ => LlmError::Response(detail),
    }
}

fn classify_transport(error: reqwest::Error) -> LlmError {
    if error.is_timeout() {
        LlmError::Timeout(error.to_string())
    } else {
        LlmError::Http(error.to_string())
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = self.url_for(&request.model);
        let body = WireRequest {
            model: match self.config.dialect {
                ChatDialect::OpenAi => Some(request.model.as_str()),
                ChatDialect::AzureOpenAi => None,
            },
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
            stop: request.stop.as_deref(),
        };
        debug!(
            url = %url,
            model = %request.model,
            message_count = request.messages.len(),
            "chat request sending"
        );

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, "chat request rejected");
            return Err(classify_status(status, text));
        }

        let text = response.text().await.map_err(classify_transport)?;
        let parsed: WireResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::Serialization(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| LlmError::Response("Missing choices".to_string()))?;
        info!(
            model = %request.model,
            content_len = content.len(),
            total_tokens = parsed.usage.map(|u| u.total_tokens).unwrap_or_default(),
            "chat response received"
        );
        Ok(ChatResponse {
            content,
            usage: parsed.usage,
        })
    }
}

pub(crate) fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}
