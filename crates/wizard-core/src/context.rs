//! The template context: the record every template render and expression
//! evaluation sees. Built fresh per evaluation from the current state.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value, json};

use crate::config::Scenario;
use crate::state::WizardState;

/// An immutable JSON record with dotted-path lookup.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    root: Value,
}

impl TemplateContext {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Resolve a dotted path (`state.answers.name`, `iteration.value`).
    /// Numeric segments index into arrays. Paths that do not resolve at the
    /// top level are retried under `state.` so branch expressions can say
    /// `answers.x` directly.
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        resolve_path(&self.root, path)
            .or_else(|| resolve_path(&self.root, &format!("state.{path}")))
    }
}

fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// JavaScript-flavored truthiness over JSON values.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Normalize a rendered item list: JSON arrays parse as-is, anything else
/// splits into non-empty trimmed lines.
pub fn normalize_item_list(rendered: &str) -> Vec<Value> {
    let trimmed = rendered.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
        return items;
    }
    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| Value::String(line.to_string()))
        .collect()
}

/// Inputs for building a template context.
pub struct TemplateContextArgs<'a> {
    pub state: &'a WizardState,
    pub scenario: &'a Scenario,
    pub step_metadata: Option<&'a Value>,
    pub repo_root: &'a Path,
    pub env: &'a BTreeMap<String, String>,
    pub answers_file_name: Option<&'a str>,
    pub answers_file_base: Option<&'a str>,
}

/// Build the context record described by the engine contract:
/// `{state: {...}, step, env, repoRoot, iteration?}`.
pub fn build_template_context(args: TemplateContextArgs<'_>) -> TemplateContext {
    let repo_root = args.repo_root.to_string_lossy().into_owned();

    let identity_by_id: Map<String, Value> = args
        .state
        .identity
        .as_ref()
        .map(|identity| {
            identity
                .segments
                .iter()
                .map(|segment| {
                    (
                        segment.id.clone(),
                        serde_json::to_value(segment).unwrap_or(Value::Null),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let mut state_record = json!({
        "answers": Value::Object(args.state.answers.clone()),
        "scenario": args.scenario,
        "lastCommand": &args.state.last_command,
        "repoRoot": repo_root.clone(),
        "identity": &args.state.identity,
        "identityById": Value::Object(identity_by_id),
    });
    if let Value::Object(map) = &mut state_record {
        if let Some(name) = args.answers_file_name {
            map.insert("answersFileName".into(), Value::String(name.into()));
        }
        if let Some(base) = args.answers_file_base {
            map.insert("answersFileBase".into(), Value::String(base.into()));
        }
    }

    let env_record: Map<String, Value> = args
        .env
        .iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();

    let mut root = json!({
        "state": state_record,
        "step": args.step_metadata.cloned().unwrap_or(Value::Null),
        "env": Value::Object(env_record),
        "repoRoot": repo_root,
    });
    if let Some(iteration) = &args.state.iteration {
        if let Value::Object(map) = &mut root {
            map.insert(
                "iteration".into(),
                serde_json::to_value(iteration).unwrap_or(Value::Null),
            );
        }
    }

    TemplateContext::new(root)
}
