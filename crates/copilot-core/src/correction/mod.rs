//! Rule-based post-generation correction.

mod engine;
mod rule;

pub use engine::{CorrectionEngine, RuleMatch};
pub use rule::{CorrectionAction, CorrectionRule, MatchRule, Pattern, Replacement, RuleParseError};
