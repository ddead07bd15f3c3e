//! Tolerant parsing of generative backend output.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::Scenario;

const APOLOGY_MARKERS: &[&str] = &["sorry", "apolog"];

/// Output parsing errors
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed generation result: {0}")]
    MalformedGenerationResult(String),
}

/// True when the reply reads like a refusal instead of structured data.
pub fn is_apology(text: &str) -> bool {
    let trimmed = text.trim_start();
    let starts_with_letter = trimmed.chars().next().is_some_and(char::is_alphabetic);
    if !starts_with_letter {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    APOLOGY_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Parse model output into `T`.
///
/// Empty output and apologies yield `Ok(None)`. Fenced code blocks are
/// unwrapped, and single-quoted pseudo JSON (no double quotes at all) is
/// retried with the quote characters swapped.
pub fn parse_generation_output<T: DeserializeOwned>(raw: &str) -> Result<Option<T>, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if is_apology(trimmed) {
        info!(preview = %preview(trimmed), "generation returned an apology");
        return Ok(None);
    }

    let body = extract_json_fence(trimmed).unwrap_or_else(|| trimmed.to_string());
    let first_error = match serde_json::from_str::<T>(&body) {
        Ok(value) => return Ok(Some(value)),
        Err(err) => err,
    };

    if body.contains('\'') && !body.contains('"') {
        let swapped = body.replace('\'', "\"");
        match serde_json::from_str::<T>(&swapped) {
            Ok(value) => {
                debug!("parsed after quote swap");
                return Ok(Some(value));
            }
            Err(err) => {
                warn!(error = %err, preview = %preview(&body), "quote swap did not repair output");
                return Err(ParseError::MalformedGenerationResult(err.to_string()));
            }
        }
    }

    warn!(error = %first_error, preview = %preview(&body), "generation output is not valid json");
    Err(ParseError::MalformedGenerationResult(
        first_error.to_string(),
    ))
}

/// Parse a generated scenario object.
pub fn parse_scenario(raw: &str) -> Result<Option<Scenario>, ParseError> {
    parse_generation_output::<Scenario>(raw)
}

/// Parse a JSON array and keep only its string items.
pub fn parse_string_array(raw: &str) -> Result<Option<Vec<String>>, ParseError> {
    let Some(value) = parse_generation_output::<Value>(raw)? else {
        return Ok(None);
    };
    match value {
        Value::Array(items) => Ok(Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(text) => Some(text),
                    _ => None,
                })
                .collect(),
        )),
        other => Err(ParseError::MalformedGenerationResult(format!(
            "expected a json array, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn extract_json_fence(raw: &str) -> Option<String> {
    let start = raw.find("```")?;
    let after_start = &raw[start + 3..];
    let after_lang = match after_start.find('\n') {
        Some(pos) => &after_start[pos + 1..],
        None => return None,
    };
    let end = after_lang.rfind("```")?;
    let candidate = after_lang[..end].trim();
    if candidate.starts_with('{') || candidate.starts_with('[') {
        Some(candidate.to_string())
    } else {
        None
    }
}

fn preview(text: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 200;
    let mut out: String = text.chars().take(MAX_PREVIEW_CHARS).collect();
    if text.chars().count() > MAX_PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}
