//! Fuzzy keyword matching for grounding command guesses.

use strsim::normalized_levenshtein;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Normalized edit similarity of two strings after lowercasing and sorting
/// their whitespace-separated tokens. Returns a value in `[0, 1]`.
pub fn token_sort_similarity(left: &str, right: &str) -> f64 {
    normalized_levenshtein(&token_sort(left), &token_sort(right))
}

fn token_sort(input: &str) -> String {
    let mut tokens: Vec<String> = input
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Threshold-based similarity predicate shared by chunk filtering and
/// command trimming.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeywordMatcher {
    threshold: f64,
}

impl Default for KeywordMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl KeywordMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_similar(&self, left: &str, right: &str) -> bool {
        token_sort_similarity(left, right) >= self.threshold
    }

    /// Whether any alias of a parameter resembles any of the given flags.
    pub fn any_alias_matches<'a, I>(&self, aliases: I, flags: &[String]) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        aliases
            .into_iter()
            .any(|alias| flags.iter().any(|flag| self.is_similar(alias, flag)))
    }
}
