//! Correction rule grammar.
//!
//! Rules are written as two short strings:
//!
//! ```text
//! match_rule: ('az vm create', '--name', '*')
//! action:     ReplaceSig('az vmss create')
//! ```
//!
//! A match rule is a tuple of three quoted patterns (signature, argument
//! name, argument value) where `*` matches anything. Actions are one of
//! `ReplaceSig(sig)`, `ReplaceArg(name, value)` and `AddArg(name, value)`
//! (long forms `ReplaceSignature`, `ReplaceArgument`, `AddArgument` are
//! accepted too). In `ReplaceArg`, `~` keeps the original text and an empty
//! name removes the argument.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static ACTION_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z]+)\s*\((.*)\)\s*$").expect("valid action regex")
});
static STRING_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"'([^']*)'|"([^"]*)""#).expect("valid literal regex"));

const WILDCARD: &str = "*";
const KEEP: &str = "~";

/// Rule grammar errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleParseError {
    #[error("match rule '{0}' must be a tuple of three quoted strings")]
    InvalidMatchRule(String),
    #[error("action '{0}' is not a call like ReplaceSig('...')")]
    InvalidAction(String),
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("action '{name}' expects {expected} argument(s), got {actual}")]
    ArgumentCount {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("'{0}' is not a quoted string list")]
    InvalidLiteral(String),
}

/// `*` or an exact string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Any,
    Exact(String),
}

impl Pattern {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == value,
        }
    }
}

impl From<String> for Pattern {
    fn from(value: String) -> Self {
        if value == WILDCARD {
            Self::Any
        } else {
            Self::Exact(value)
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str(WILDCARD),
            Self::Exact(value) => f.write_str(value),
        }
    }
}

/// `~` (keep the original) or a replacement string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    Keep,
    Set(String),
}

impl Replacement {
    pub fn resolve<'a>(&'a self, original: &'a str) -> &'a str {
        match self {
            Self::Keep => original,
            Self::Set(value) => value,
        }
    }
}

impl From<String> for Replacement {
    fn from(value: String) -> Self {
        if value == KEEP {
            Self::Keep
        } else {
            Self::Set(value)
        }
    }
}

/// Which command entries and arguments a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRule {
    pub signature: Pattern,
    pub arg_name: Pattern,
    pub arg_value: Pattern,
}

impl MatchRule {
    pub fn new(
        signature: impl Into<String>,
        arg_name: impl Into<String>,
        arg_value: impl Into<String>,
    ) -> Self {
        Self {
            signature: Pattern::from(signature.into()),
            arg_name: Pattern::from(arg_name.into()),
            arg_value: Pattern::from(arg_value.into()),
        }
    }
}

impl FromStr for MatchRule {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RuleParseError::InvalidMatchRule(s.to_string());
        let inner = s
            .trim()
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(invalid)?;
        let mut values = parse_literal_list(inner).map_err(|_| invalid())?;
        if values.len() != 3 {
            return Err(invalid());
        }
        let arg_value = values.remove(2);
        let arg_name = values.remove(1);
        let signature = values.remove(0);
        Ok(Self::new(signature, arg_name, arg_value))
    }
}

/// Closed set of correction actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionAction {
    ReplaceSignature(String),
    ReplaceArgument {
        name: Replacement,
        value: Replacement,
    },
    AddArgument {
        name: String,
        value: String,
    },
}

impl FromStr for CorrectionAction {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = ACTION_CALL
            .captures(s)
            .ok_or_else(|| RuleParseError::InvalidAction(s.to_string()))?;
        let name = &caps[1];
        let args = parse_literal_list(&caps[2])?;
        let expect = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(RuleParseError::ArgumentCount {
                    name: name.to_string(),
                    expected,
                    actual: args.len(),
                })
            }
        };
        match name {
            "ReplaceSig" | "ReplaceSignature" => {
                expect(1)?;
                let mut args = args;
                Ok(Self::ReplaceSignature(args.remove(0)))
            }
            "ReplaceArg" | "ReplaceArgument" => {
                expect(2)?;
                let mut args = args;
                let value = Replacement::from(args.remove(1));
                let name = Replacement::from(args.remove(0));
                Ok(Self::ReplaceArgument { name, value })
            }
            "AddArg" | "AddArgument" => {
                expect(2)?;
                let mut args = args;
                let value = args.remove(1);
                let name = args.remove(0);
                Ok(Self::AddArgument { name, value })
            }
            other => Err(RuleParseError::UnknownAction(other.to_string())),
        }
    }
}

/// A match rule paired with the action it triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionRule {
    pub match_rule: MatchRule,
    pub action: CorrectionAction,
}

impl CorrectionRule {
    pub fn new(match_rule: MatchRule, action: CorrectionAction) -> Self {
        Self { match_rule, action }
    }

    pub fn parse(match_rule: &str, action: &str) -> Result<Self, RuleParseError> {
        Ok(Self::new(match_rule.parse()?, action.parse()?))
    }
}

/// Parse `'a', "b", 'c'` into its string values. A trailing comma is allowed.
fn parse_literal_list(body: &str) -> Result<Vec<String>, RuleParseError> {
    let invalid = || RuleParseError::InvalidLiteral(body.to_string());
    let mut values = Vec::new();
    let mut cursor = 0;
    for caps in STRING_LITERAL.captures_iter(body) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let gap = body[cursor..whole.start()].trim();
        let separated = if values.is_empty() {
            gap.is_empty()
        } else {
            gap == ","
        };
        if !separated {
            return Err(invalid());
        }
        let value = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        values.push(value);
        cursor = whole.end();
    }
    let tail = body[cursor..].trim();
    if !(tail.is_empty() || (tail == "," && !values.is_empty())) {
        return Err(invalid());
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_match_rule_with_wildcards() {
        let rule: MatchRule = "('*', '--image', 'UbuntuLTS')".parse().expect("rule");
        assert_eq!(rule.signature, Pattern::Any);
        assert_eq!(rule.arg_name, Pattern::Exact("--image".to_string()));
        assert_eq!(rule.arg_value, Pattern::Exact("UbuntuLTS".to_string()));
    }

    #[test]
    fn test_parse_actions_in_both_quote_styles() {
        assert_eq!(
            "ReplaceSig('az vmss create')".parse::<CorrectionAction>(),
            Ok(CorrectionAction::ReplaceSignature("az vmss create".to_string()))
        );
        assert_eq!(
            r#"ReplaceArg("~", "Ubuntu2204")"#.parse::<CorrectionAction>(),
            Ok(CorrectionAction::ReplaceArgument {
                name: Replacement::Keep,
                value: Replacement::Set("Ubuntu2204".to_string()),
            })
        );
        assert_eq!(
            "AddArgument('--yes', '')".parse::<CorrectionAction>(),
            Ok(CorrectionAction::AddArgument {
                name: "--yes".to_string(),
                value: String::new(),
            })
        );
    }

    #[test]
    fn test_rejects_code_like_actions() {
        assert!(matches!(
            "__import__('os').system('rm -rf /')".parse::<CorrectionAction>(),
            Err(RuleParseError::InvalidAction(_))
        ));
        assert!(matches!(
            "Exec('ls')".parse::<CorrectionAction>(),
            Err(RuleParseError::UnknownAction(name)) if name == "Exec"
        ));
        assert!(matches!(
            "ReplaceSig(sig)".parse::<CorrectionAction>(),
            Err(RuleParseError::InvalidLiteral(_))
        ));
    }

    #[test]
    fn test_argument_count_checked() {
        assert_eq!(
            "ReplaceArg('-g')".parse::<CorrectionAction>(),
            Err(RuleParseError::ArgumentCount {
                name: "ReplaceArg".to_string(),
                expected: 2,
                actual: 1,
            })
        );
    }

    #[test]
    fn test_match_rule_needs_three_items() {
        assert!("('az vm create', '--name')".parse::<MatchRule>().is_err());
        assert!("'az vm create', '--name', '*'".parse::<MatchRule>().is_err());
        assert!("('a' 'b', 'c')".parse::<MatchRule>().is_err());
    }
}
