//! Deterministic post-generation correction of scenario commands.

use tracing::{debug, info};

use super::rule::{CorrectionAction, CorrectionRule, MatchRule, Replacement, RuleParseError};
use crate::types::{CommandEntry, EntryTarget, Scenario};

/// One argument of an entry that satisfied a match rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub arg_index: usize,
    /// The flag plus its value text exactly as it appears in the example.
    pub arg_kv: String,
    /// Byte offset of `arg_kv` in the example.
    pub start: usize,
}

impl RuleMatch {
    fn span(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.arg_kv.len()
    }
}

impl MatchRule {
    /// Arguments of `command` that this rule matches, in argument order.
    pub fn find_matches(
        &self,
        command: &str,
        arguments: &[Option<String>],
        example: &str,
    ) -> Vec<RuleMatch> {
        if !self.signature.matches(command) {
            return Vec::new();
        }
        let mut matches = Vec::new();
        for (arg_index, argument) in arguments.iter().enumerate() {
            let Some(argument) = argument else {
                continue;
            };
            if !self.arg_name.matches(argument) {
                continue;
            }
            let Some(start) = find_flag(example, argument) else {
                continue;
            };
            let end = start + argument.len();
            let rest = &example[end..];
            let raw_value = rest.split(" -").next().unwrap_or_default().trim_end();
            if self.arg_value.matches(raw_value.trim()) {
                matches.push(RuleMatch {
                    arg_index,
                    arg_kv: format!("{}{}", argument, raw_value),
                    start,
                });
            }
        }
        matches
    }
}

/// Position of `flag` in `example` as a whole whitespace-delimited token.
fn find_flag(example: &str, flag: &str) -> Option<usize> {
    if flag.is_empty() {
        return None;
    }
    let mut offset = 0;
    while let Some(found) = example[offset..].find(flag) {
        let start = offset + found;
        let end = start + flag.len();
        let before_ok = example[..start]
            .chars()
            .next_back()
            .map_or(true, char::is_whitespace);
        let after_ok = example[end..]
            .chars()
            .next()
            .map_or(true, char::is_whitespace);
        if before_ok && after_ok {
            return Some(start);
        }
        offset = end;
    }
    None
}

/// Mutable view of a command entry while rules run.
struct Working {
    command: String,
    arguments: Vec<Option<String>>,
    example: String,
}

/// Applies configured correction rules in declaration order.
#[derive(Debug, Clone, Default)]
pub struct CorrectionEngine {
    rules: Vec<CorrectionRule>,
}

impl CorrectionEngine {
    pub fn new(rules: Vec<CorrectionRule>) -> Self {
        Self { rules }
    }

    /// Build from `(match_rule, action)` text pairs, failing on the first
    /// malformed rule.
    pub fn from_specs<'a, I>(specs: I) -> Result<Self, RuleParseError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let rules = specs
            .into_iter()
            .map(|(match_rule, action)| CorrectionRule::parse(match_rule, action))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    pub fn rules(&self) -> &[CorrectionRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Correct every command entry of a scenario. Returns the number of
    /// rule applications.
    pub fn correct_scenario(&self, scenario: &mut Scenario) -> usize {
        if self.rules.is_empty() {
            return 0;
        }
        let applied: usize = scenario
            .command_set
            .iter_mut()
            .map(|entry| self.correct_entry(entry))
            .sum();
        if applied > 0 {
            info!(
                scenario = %scenario.scenario,
                applied,
                "scenario corrected"
            );
        }
        applied
    }

    /// Correct a single entry. Step entries are left untouched.
    pub fn correct_entry(&self, entry: &mut CommandEntry) -> usize {
        let EntryTarget::Command { command, arguments } = &mut entry.target else {
            return 0;
        };
        let mut working = Working {
            command: std::mem::take(command),
            arguments: std::mem::take(arguments).into_iter().map(Some).collect(),
            example: std::mem::take(&mut entry.example),
        };

        let mut applied = 0;
        for rule in &self.rules {
            let matches =
                rule.match_rule
                    .find_matches(&working.command, &working.arguments, &working.example);
            if matches.is_empty() {
                continue;
            }
            debug!(
                rule = ?rule.action,
                matches = matches.len(),
                "correction rule matched"
            );
            applied += apply_action(&rule.action, &matches, &mut working);
        }

        *command = working.command;
        *arguments = working.arguments.into_iter().flatten().collect();
        entry.example = working.example;
        applied
    }
}

fn apply_action(action: &CorrectionAction, matches: &[RuleMatch], working: &mut Working) -> usize {
    match action {
        CorrectionAction::ReplaceSignature(new_signature) => {
            if working.command != *new_signature {
                let old = std::mem::replace(&mut working.command, new_signature.clone());
                working.example = replace_whole_tokens(&working.example, &old, new_signature);
            }
            1
        }
        CorrectionAction::ReplaceArgument { name, value } => {
            // Edit from the end so earlier offsets stay valid.
            let mut ordered: Vec<&RuleMatch> = matches.iter().collect();
            ordered.sort_by(|a, b| b.start.cmp(&a.start));
            for found in ordered {
                replace_argument(working, found, name, value);
            }
            matches.len()
        }
        CorrectionAction::AddArgument { name, value } => {
            let exists = working
                .arguments
                .iter()
                .flatten()
                .any(|argument| argument == name);
            if exists {
                return 0;
            }
            working.arguments.push(Some(name.clone()));
            working.example.push(' ');
            working.example.push_str(name);
            if !value.is_empty() {
                working.example.push(' ');
                working.example.push_str(value);
            }
            1
        }
    }
}

fn replace_argument(
    working: &mut Working,
    found: &RuleMatch,
    name: &Replacement,
    value: &Replacement,
) {
    let Some(Some(original_name)) = working.arguments.get(found.arg_index).cloned() else {
        return;
    };
    let original_value = found
        .arg_kv
        .get(original_name.len()..)
        .unwrap_or_default()
        .trim()
        .to_string();
    let new_name = name.resolve(&original_name).to_string();
    let new_value = value.resolve(&original_value).to_string();

    if new_name.is_empty() {
        working.arguments[found.arg_index] = None;
        remove_span(&mut working.example, found.span());
        return;
    }

    let replacement = if new_value.is_empty() {
        new_name.clone()
    } else {
        format!("{} {}", new_name, new_value)
    };
    if working.example.get(found.span()) == Some(found.arg_kv.as_str()) {
        working.example.replace_range(found.span(), &replacement);
    }
    working.arguments[found.arg_index] = Some(new_name);
}

/// Replace `old` wherever it is not glued to a longer word, so `az vm`
/// leaves `az vmss` alone.
fn replace_whole_tokens(text: &str, old: &str, new: &str) -> String {
    if old.is_empty() {
        return text.to_string();
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '-' || c == '_';
    let mut out = String::with_capacity(text.len());
    let mut offset = 0;
    while let Some(found) = text[offset..].find(old) {
        let start = offset + found;
        let end = start + old.len();
        let before_ok = !text[..start].chars().next_back().is_some_and(is_word);
        let after_ok = !text[end..].chars().next().is_some_and(is_word);
        out.push_str(&text[offset..start]);
        out.push_str(if before_ok && after_ok { new } else { old });
        offset = end;
    }
    out.push_str(&text[offset..]);
    out
}

fn remove_span(example: &mut String, span: std::ops::Range<usize>) {
    if example.get(span.clone()).is_none() {
        return;
    }
    let start = if example[..span.start].ends_with(' ') {
        span.start - 1
    } else {
        span.start
    };
    example.replace_range(start..span.end, "");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> CorrectionEngine {
        CorrectionEngine::from_specs([
            ("('az vm create', '--name', '*')", "ReplaceSig('az vmss create')"),
            ("('*', '--image', 'UbuntuLTS')", r#"ReplaceArg("~", "Ubuntu2204")"#),
            ("('*', '--resource-group', '*')", r#"ReplaceArg("-g", "~")"#),
        ])
        .expect("rules")
    }

    fn vm_entry() -> CommandEntry {
        CommandEntry::command(
            "az vm create",
            vec![
                "--name".to_string(),
                "--resource-group".to_string(),
                "--image".to_string(),
                "--query".to_string(),
            ],
            "az vm create --name MyVm --resource-group MyResourceGroup --image UbuntuLTS --query \"frontendIpConfigurations[0].publicIpAddress.id\"",
            "Show the details of the load balancer",
        )
    }

    fn args(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn test_correct_command_applies_all_rules() {
        let mut entry = vm_entry();
        let applied = engine().correct_entry(&mut entry);
        assert_eq!(applied, 3);
        assert_eq!(entry.command_name(), Some("az vmss create"));
        assert!(!entry.example.contains("UbuntuLTS"));
        assert!(entry.example.contains("--image Ubuntu2204"));
        assert!(!entry.example.contains("--resource-group"));
        assert!(entry.example.contains("-g MyResourceGroup"));
        assert!(!entry.example.contains("az vm create"));
        assert!(entry.example.starts_with("az vmss create --name MyVm"));
        assert_eq!(entry.arguments(), ["--name", "-g", "--image", "--query"]);
    }

    #[test]
    fn test_replace_signature_rewrites_every_occurrence() {
        let engine = CorrectionEngine::from_specs([("('az vm create', '*', '*')", "ReplaceSig('az vmss create')")])
            .expect("rules");
        let mut entry = CommandEntry::command(
            "az vm create",
            vec!["--name".to_string(), "--count".to_string()],
            "az vm create --name a --count 1 && az vm create --name b",
            "",
        );
        engine.correct_entry(&mut entry);
        assert_eq!(entry.command_name(), Some("az vmss create"));
        assert_eq!(
            entry.example,
            "az vmss create --name a --count 1 && az vmss create --name b"
        );
    }

    #[test]
    fn test_replace_signature_leaves_longer_commands_alone() {
        let engine = CorrectionEngine::from_specs([("('az vm', '*', '*')", "ReplaceSig('az compute vm')")])
            .expect("rules");
        let mut entry = CommandEntry::command(
            "az vm",
            vec!["--help".to_string()],
            "az vm --help && az vmss list --help",
            "",
        );
        engine.correct_entry(&mut entry);
        assert_eq!(entry.example, "az compute vm --help && az vmss list --help");
    }

    #[test]
    fn test_rename_edits_matched_flag_not_earlier_prefix() {
        let engine = CorrectionEngine::from_specs([("('*', '--name', '*')", r#"ReplaceArg("-n", "~")"#)])
            .expect("rules");
        let mut entry = CommandEntry::command(
            "az network dns zone create",
            vec!["--name-server".to_string(), "--name".to_string()],
            "az network dns zone create --name-server ns1 --name",
            "",
        );
        assert_eq!(engine.correct_entry(&mut entry), 1);
        assert_eq!(entry.example, "az network dns zone create --name-server ns1 -n");
        assert_eq!(entry.arguments(), ["--name-server", "-n"]);
    }

    #[test]
    fn test_remove_edits_matched_flag_not_earlier_prefix() {
        let engine = CorrectionEngine::from_specs([("('*', '--name', '*')", "ReplaceArg('', '~')")])
            .expect("rules");
        let mut entry = CommandEntry::command(
            "az network dns zone create",
            vec!["--name-server".to_string(), "--name".to_string()],
            "az network dns zone create --name-server ns1 --name contoso.com",
            "",
        );
        engine.correct_entry(&mut entry);
        assert_eq!(entry.example, "az network dns zone create --name-server ns1");
        assert_eq!(entry.arguments(), ["--name-server"]);
    }

    #[test]
    fn test_keep_flag_changes_only_value() {
        let engine =
            CorrectionEngine::from_specs([("('*', '--sku', '*')", "ReplaceArg('~', 'Standard_LRS')")])
                .expect("rules");
        let mut entry = CommandEntry::command(
            "az storage account create",
            vec!["--name".to_string(), "--sku".to_string()],
            "az storage account create --name st1 --sku Basic",
            "",
        );
        engine.correct_entry(&mut entry);
        assert_eq!(entry.example, "az storage account create --name st1 --sku Standard_LRS");
        assert_eq!(entry.arguments(), ["--name", "--sku"]);
    }

    #[test]
    fn test_empty_name_removes_argument() {
        let engine = CorrectionEngine::from_specs([("('*', '--debug', '*')", "ReplaceArg('', '~')")])
            .expect("rules");
        let mut entry = CommandEntry::command(
            "az group list",
            vec!["--debug".to_string(), "--output".to_string()],
            "az group list --debug --output table",
            "",
        );
        engine.correct_entry(&mut entry);
        assert_eq!(entry.arguments(), ["--output"]);
        assert_eq!(entry.example, "az group list --output table");
    }

    #[test]
    fn test_add_argument_appends_once() {
        let engine = CorrectionEngine::from_specs([("('az group delete', '*', '*')", "AddArg('--yes', '')")])
            .expect("rules");
        let mut entry = CommandEntry::command(
            "az group delete",
            vec!["--name".to_string(), "--no-wait".to_string()],
            "az group delete --name rg --no-wait",
            "",
        );
        assert_eq!(engine.correct_entry(&mut entry), 1);
        assert_eq!(entry.example, "az group delete --name rg --no-wait --yes");
        assert_eq!(entry.arguments(), ["--name", "--no-wait", "--yes"]);
        assert_eq!(engine.correct_entry(&mut entry), 0);
    }

    #[test]
    fn test_match_reports_value_with_spacing() {
        let rule = MatchRule::new("*", "--name", "MyVm");
        let found = rule.find_matches(
            "az vm create",
            &args(&["--name", "--resource-group"]),
            "az vm create --name   MyVm --resource-group MyResourceGroup",
        );
        assert_eq!(
            found,
            vec![RuleMatch {
                arg_index: 0,
                arg_kv: "--name   MyVm".to_string(),
                start: 13,
            }]
        );
    }

    #[test]
    fn test_match_respects_signature_and_bare_flags() {
        let example = "az vm create --debug --name MyVm";
        let arguments = args(&["--debug", "--name"]);
        assert!(MatchRule::new("az vmss create", "--name", "MyVm")
            .find_matches("az vm create", &arguments, example)
            .is_empty());
        let found = MatchRule::new("*", "--debug", "*").find_matches("az vm create", &arguments, example);
        assert_eq!(found[0].arg_kv, "--debug");
    }

    #[test]
    fn test_flag_prefix_is_not_a_match() {
        let found = MatchRule::new("*", "--name", "*").find_matches(
            "az network dns zone create",
            &args(&["--name"]),
            "az network dns zone create --name-server ns1 --name contoso.com",
        );
        assert_eq!(found[0].arg_kv, "--name contoso.com");
    }

    #[test]
    fn test_step_entries_are_skipped() {
        let mut scenario = Scenario::new("s", "d").with_entry(CommandEntry::step(
            "az vm create",
            "az vm create --name MyVm",
            "",
        ));
        assert_eq!(engine().correct_scenario(&mut scenario), 0);
        assert!(scenario.command_set[0].is_step());
    }

    #[test]
    fn test_malformed_rule_rejected() {
        let result = CorrectionEngine::from_specs([("('*', '--x')", "ReplaceSig('y')")]);
        assert!(result.is_err());
    }
}
