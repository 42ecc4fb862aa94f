//! The policy engine: rules compiled once, evaluated first-match before
//! every command invocation.

use std::collections::HashSet;

use regex::Regex;

use wizard_core::{OneOrMany, Policies, PolicyLevel, PolicyRule};

#[derive(thiserror::Error, Debug)]
pub enum PolicyBuildError {
    #[error("Policy rule '{rule_id}': invalid commandPattern '{pattern}': {message}")]
    InvalidPattern {
        rule_id: String,
        pattern: String,
        message: String,
    },
}

/// A rule with its selectors pre-compiled: string selectors into sets,
/// `commandPattern` into regexes.
#[derive(Debug)]
struct CompiledRule {
    id: String,
    level: PolicyLevel,
    note: Option<String>,
    flows: Option<HashSet<String>>,
    steps: Option<HashSet<String>>,
    presets: Option<HashSet<String>>,
    commands: Option<HashSet<String>>,
    patterns: Vec<Regex>,
}

fn selector_set(selector: &Option<OneOrMany>) -> Option<HashSet<String>> {
    selector
        .as_ref()
        .map(|values| values.values().into_iter().collect())
}

impl CompiledRule {
    fn compile(rule: &PolicyRule) -> Result<Self, PolicyBuildError> {
        let mut patterns = Vec::new();
        if let Some(raw) = &rule.r#match.command_pattern {
            for pattern in raw.values() {
                let compiled =
                    Regex::new(&pattern).map_err(|err| PolicyBuildError::InvalidPattern {
                        rule_id: rule.id.clone(),
                        pattern: pattern.clone(),
                        message: err.to_string(),
                    })?;
                patterns.push(compiled);
            }
        }
        Ok(Self {
            id: rule.id.clone(),
            level: rule.level,
            note: rule.note.clone(),
            flows: selector_set(&rule.r#match.flow),
            steps: selector_set(&rule.r#match.step),
            presets: selector_set(&rule.r#match.preset),
            commands: selector_set(&rule.r#match.command),
            patterns,
        })
    }

    /// All provided selectors must match; at least one pattern must hit
    /// when patterns were given.
    fn matches(&self, query: &PolicyQuery<'_>) -> bool {
        if let Some(flows) = &self.flows {
            if !flows.contains(query.flow_id) {
                return false;
            }
        }
        if let Some(steps) = &self.steps {
            if !steps.contains(query.step_id) {
                return false;
            }
        }
        if let Some(presets) = &self.presets {
            match query.preset {
                Some(preset) if presets.contains(preset) => {}
                _ => return false,
            }
        }
        if let Some(commands) = &self.commands {
            if !commands.contains(query.command) {
                return false;
            }
        }
        if !self.patterns.is_empty()
            && !self
                .patterns
                .iter()
                .any(|pattern| pattern.is_match(query.command))
        {
            return false;
        }
        true
    }
}

/// What a command is about to do, for rule matching.
#[derive(Debug, Clone, Copy)]
pub struct PolicyQuery<'a> {
    pub flow_id: &'a str,
    pub step_id: &'a str,
    pub command: &'a str,
    pub preset: Option<&'a str>,
}

/// The outcome of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    pub rule_id: Option<String>,
    pub level: PolicyLevel,
    /// `level` downgraded to warn when a block rule was acknowledged.
    pub enforced_level: PolicyLevel,
    pub acknowledged: bool,
    pub note: Option<String>,
}

/// Rules in declaration order plus the per-engine acknowledgement set.
/// The acknowledgement set is scoped to this engine instance (one run).
#[derive(Debug)]
pub struct PolicyEngine {
    default_level: PolicyLevel,
    rules: Vec<CompiledRule>,
    acknowledged: HashSet<String>,
}

impl PolicyEngine {
    pub fn from_config(policies: Option<&Policies>) -> Result<Self, PolicyBuildError> {
        let (default_level, rules) = match policies {
            Some(policies) => (
                policies.default_level,
                policies
                    .rules
                    .iter()
                    .map(CompiledRule::compile)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => (PolicyLevel::Allow, Vec::new()),
        };
        Ok(Self {
            default_level,
            rules,
            acknowledged: HashSet::new(),
        })
    }

    /// First matching rule wins; no match falls back to the default level.
    pub fn evaluate(&self, query: &PolicyQuery<'_>) -> PolicyDecision {
        for rule in &self.rules {
            if !rule.matches(query) {
                continue;
            }
            let acknowledged = self.acknowledged.contains(&rule.id);
            let enforced_level = if rule.level == PolicyLevel::Block && acknowledged {
                PolicyLevel::Warn
            } else {
                rule.level
            };
            return PolicyDecision {
                rule_id: Some(rule.id.clone()),
                level: rule.level,
                enforced_level,
                acknowledged,
                note: rule.note.clone(),
            };
        }
        PolicyDecision {
            rule_id: None,
            level: self.default_level,
            enforced_level: self.default_level,
            acknowledged: false,
            note: None,
        }
    }

    /// Remember a block rule the operator waved through. Subsequent
    /// evaluations of that rule return `enforcedLevel = warn`.
    pub fn acknowledge(&mut self, rule_id: &str) {
        self.acknowledged.insert(rule_id.to_string());
    }

    pub fn is_acknowledged(&self, rule_id: &str) -> bool {
        self.acknowledged.contains(rule_id)
    }
}
