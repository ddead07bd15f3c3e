//! Documentation index client and the section parser for its records.
//!
//! A record's `content` is markdown with `### Summary`,
//! `### Required Parameters` and `### Optional Parameters` sections.
//! Parameters inside a section are blocks beginning with `--`, separated by
//! a blank line; the first line of a block is the alias list and the rest
//! is the description.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use copilot_core::knowledge::{KnowledgeError, KnowledgeIndex, RawChunk};
use copilot_core::types::{KnowledgeChunk, Parameter};

static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^###[ \t]+([^\n]+?)[ \t]*$").expect("valid section regex"));

const SUMMARY: &str = "Summary";
const REQUIRED_PARAMETERS: &str = "Required Parameters";
const OPTIONAL_PARAMETERS: &str = "Optional Parameters";

/// Index client config
#[derive(Debug, Clone)]
pub struct HttpKnowledgeIndexConfig {
    pub endpoint: String,
    pub access_token: Option<String>,
    pub depot: String,
    pub score_threshold: Option<f64>,
    pub timeout_secs: u64,
}

/// Vector index over CLI reference documentation.
pub struct HttpKnowledgeIndexClient {
    client: reqwest::Client,
    config: HttpKnowledgeIndexConfig,
}

impl HttpKnowledgeIndexClient {
    pub fn new(config: HttpKnowledgeIndexConfig) -> Result<Self, KnowledgeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KnowledgeError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        match self.config.score_threshold {
            Some(threshold) => format!("{}?scoreThreshold={}", self.config.endpoint, threshold),
            None => self.config.endpoint.clone(),
        }
    }

    fn filter(&self, filter_command: Option<&str>) -> String {
        let depot = format!("depotName eq '{}'", odata_literal(&self.config.depot));
        match filter_command {
            Some(signature) => format!(
                "({}) and (title eq '{}')",
                depot,
                odata_literal(signature)
            ),
            None => depot,
        }
    }

    fn headers(&self) -> Result<HeaderMap, KnowledgeError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.config.access_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(token).map_err(|e| KnowledgeError::Http(e.to_string()))?,
            );
        }
        Ok(headers)
    }
}

#[derive(Debug, Serialize)]
struct IndexQuery<'a> {
    filter: String,
    vector: VectorQuery<'a>,
}

#[derive(Debug, Serialize)]
struct VectorQuery<'a> {
    values: &'a [f32],
    top: usize,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(default)]
    items: Vec<RawChunk>,
}

#[async_trait]
impl KnowledgeIndex for HttpKnowledgeIndexClient {
    async fn query(
        &self,
        vector: &[f32],
        filter_command: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<RawChunk>, KnowledgeError> {
        let body = IndexQuery {
            filter: self.filter(filter_command),
            vector: VectorQuery {
                values: vector,
                top: top_k,
            },
        };
        debug!(filter = %body.filter, top_k, "index query sending");

        let response = self
            .client
            .post(self.url())
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| KnowledgeError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(status = %status, "index query rejected");
            return Err(KnowledgeError::Response(format!("HTTP {}: {}", status, text)));
        }

        let parsed: IndexResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::Serialization(e.to_string()))?;
        debug!(items = parsed.items.len(), "index query answered");
        Ok(parsed.items)
    }
}

/// Quote doubling for an OData string literal.
fn odata_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Convert a raw index record into a structured chunk.
pub fn parse_chunk(raw: &RawChunk) -> KnowledgeChunk {
    let summary = section(&raw.content, SUMMARY).unwrap_or_default().trim();
    KnowledgeChunk::new(raw.title.trim(), summary, raw.score)
        .with_required(parse_parameters(section(&raw.content, REQUIRED_PARAMETERS)))
        .with_optional(parse_parameters(section(&raw.content, OPTIONAL_PARAMETERS)))
}

/// Body of the section titled `title`, up to the next section header.
fn section<'a>(content: &'a str, title: &str) -> Option<&'a str> {
    let mut headers = SECTION_HEADER.captures_iter(content).peekable();
    while let Some(caps) = headers.next() {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if name.as_str() != title {
            continue;
        }
        let end = headers
            .peek()
            .and_then(|next| next.get(0))
            .map_or(content.len(), |m| m.start());
        return Some(&content[whole.end()..end]);
    }
    None
}

fn parse_parameters(body: Option<&str>) -> Vec<Parameter> {
    let Some(body) = body else {
        return Vec::new();
    };
    let body = body.trim();
    let Some(start) = body.find("--") else {
        return Vec::new();
    };
    body[start..]
        .split("\n\n--")
        .enumerate()
        .filter_map(|(idx, block)| {
            let block = if idx == 0 {
                block.to_string()
            } else {
                format!("--{}", block)
            };
            let (name, description) = block.split_once('\n').unwrap_or((block.as_str(), ""));
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(Parameter::new(name, description.trim()))
        })
        .collect()
}
