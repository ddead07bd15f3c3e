//! Chunk narrowing, deduplication and command trimming.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::command::parse_command_info;
use crate::similarity::KeywordMatcher;
use crate::types::{KnowledgeChunk, Parameter};

/// Keyword-similarity filtering of retrieved chunks against a command.
#[derive(Debug, Clone)]
pub struct ChunkFilter {
    matcher: KeywordMatcher,
    command_prefix: String,
}

impl ChunkFilter {
    pub fn new(matcher: KeywordMatcher, command_prefix: impl Into<String>) -> Self {
        Self {
            matcher,
            command_prefix: command_prefix.into(),
        }
    }

    pub fn matcher(&self) -> KeywordMatcher {
        self.matcher
    }

    /// Keep chunks whose signature prefixes `command`; else chunks whose
    /// signature resembles the command's; else everything. Kept chunks have
    /// their optional parameters narrowed to those related to the command's
    /// flags. Never returns an empty list for non-empty input.
    pub fn filter_by_keyword_similarity(
        &self,
        chunks: Vec<KnowledgeChunk>,
        command: &str,
    ) -> Vec<KnowledgeChunk> {
        if chunks.is_empty() {
            return chunks;
        }
        let info = parse_command_info(command);

        let prefixed: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| is_signature_prefix(&chunk.command, command))
            .map(|(idx, _)| idx)
            .collect();
        let selected = if !prefixed.is_empty() {
            debug!(kept = prefixed.len(), "chunks kept by signature prefix");
            prefixed
        } else {
            let wanted = self.strip_prefix(&info.signature);
            let similar: Vec<usize> = chunks
                .iter()
                .enumerate()
                .filter(|(_, chunk)| {
                    self.matcher
                        .is_similar(wanted, self.strip_prefix(&chunk.command))
                })
                .map(|(idx, _)| idx)
                .collect();
            if similar.is_empty() {
                debug!(total = chunks.len(), "no similar chunk, keeping all");
                (0..chunks.len()).collect()
            } else {
                debug!(kept = similar.len(), "chunks kept by signature similarity");
                similar
            }
        };

        let keep: HashSet<usize> = selected.into_iter().collect();
        chunks
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| keep.contains(idx))
            .map(|(_, chunk)| self.narrow_optional_parameters(chunk, &info.flags))
            .collect()
    }

    fn narrow_optional_parameters(
        &self,
        mut chunk: KnowledgeChunk,
        flags: &[String],
    ) -> KnowledgeChunk {
        chunk
            .optional_parameters
            .retain(|param| self.matcher.any_alias_matches(param.aliases(), flags));
        chunk
    }

    fn strip_prefix<'a>(&self, signature: &'a str) -> &'a str {
        signature
            .strip_prefix(self.command_prefix.as_str())
            .filter(|rest| rest.starts_with(char::is_whitespace))
            .map(str::trim_start)
            .unwrap_or(signature)
    }
}

/// `signature` is `command` itself or its leading whole words.
fn is_signature_prefix(signature: &str, command: &str) -> bool {
    if signature.is_empty() {
        return false;
    }
    command
        .strip_prefix(signature)
        .map(|rest| rest.is_empty() || rest.starts_with(' '))
        .unwrap_or(false)
}

/// Group chunks by exact signature in first-seen order, union their
/// parameter lists by name and keep the highest score.
pub fn merge_chunks(chunks: Vec<KnowledgeChunk>) -> Vec<KnowledgeChunk> {
    let mut merged: Vec<KnowledgeChunk> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for chunk in chunks {
        match positions.get(&chunk.command) {
            Some(&idx) => {
                let existing = &mut merged[idx];
                union_parameters(&mut existing.required_parameters, chunk.required_parameters);
                union_parameters(&mut existing.optional_parameters, chunk.optional_parameters);
                existing.score = existing.score.max(chunk.score);
                if existing.summary.is_empty() {
                    existing.summary = chunk.summary;
                }
            }
            None => {
                positions.insert(chunk.command.clone(), merged.len());
                merged.push(chunk);
            }
        }
    }
    merged
}

fn union_parameters(target: &mut Vec<Parameter>, incoming: Vec<Parameter>) {
    for param in incoming {
        if !target.iter().any(|existing| existing.name == param.name) {
            target.push(param);
        }
    }
}

/// Highest scoring `limit` chunks, best first.
pub fn top_chunks(mut chunks: Vec<KnowledgeChunk>, limit: usize) -> Vec<KnowledgeChunk> {
    chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
    chunks.truncate(limit);
    chunks
}

/// Drop the flags of `command` that do not resemble any documented
/// parameter of `chunk`, then restrict the chunk to parameters the trimmed
/// command does not already use.
pub fn trim_command_and_chunk(
    command: &str,
    chunk: &KnowledgeChunk,
    matcher: KeywordMatcher,
) -> (String, KnowledgeChunk) {
    let info = parse_command_info(command);
    let mut kept_tokens: Vec<&str> = Vec::new();
    let mut kept_flags: HashSet<&str> = HashSet::new();
    let mut keeping = false;
    let mut in_arguments = false;

    for token in command.split_whitespace() {
        if token.starts_with('-') {
            in_arguments = true;
            keeping = chunk
                .parameters()
                .any(|param| param.aliases().any(|alias| matcher.is_similar(alias, token)));
            if keeping {
                kept_flags.insert(token);
                kept_tokens.push(token);
            }
        } else if in_arguments && keeping {
            kept_tokens.push(token);
        }
    }

    let mut trimmed = info.signature.clone();
    for token in &kept_tokens {
        trimmed.push(' ');
        trimmed.push_str(token);
    }

    let unused = |param: &Parameter| !param.aliases().any(|alias| kept_flags.contains(alias));
    let mut restricted = chunk.clone();
    restricted.required_parameters.retain(|p| unused(p));
    restricted.optional_parameters.retain(|p| unused(p));

    debug!(
        signature = %info.signature,
        original_flags = info.flags.len(),
        kept_flags = kept_flags.len(),
        "command trimmed against chunk"
    );
    (trimmed, restricted)
}
