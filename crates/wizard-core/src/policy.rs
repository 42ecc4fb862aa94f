//! Policy rule configuration shapes.

use serde::{Deserialize, Serialize};

/// Policy enforcement level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyLevel {
    #[default]
    Allow,
    Warn,
    Block,
}

impl std::fmt::Display for PolicyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyLevel::Allow => write!(f, "allow"),
            PolicyLevel::Warn => write!(f, "warn"),
            PolicyLevel::Block => write!(f, "block"),
        }
    }
}

/// A selector that accepts one value or a list of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn values(&self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value.clone()],
            OneOrMany::Many(values) => values.clone(),
        }
    }
}

/// The match block of a policy rule. All provided selectors must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_pattern: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<OneOrMany>,
}

/// One policy rule. Rule order is preserved; evaluation is first-match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub id: String,
    pub level: PolicyLevel,
    #[serde(default)]
    pub r#match: PolicyMatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The `policies` config block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policies {
    #[serde(default)]
    pub default_level: PolicyLevel,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}
