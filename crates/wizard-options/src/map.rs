//! Normalization of raw provider records into prompt options, optionally
//! through `{value, label, hint, disableWhen}` path expressions.

use serde_json::Value;

use wizard_core::{OptionMapping, PromptOption, is_truthy};

fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn as_label(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Normalize one record. Without a mapping, strings become value+label and
/// objects are probed for conventional fields (`value`/`id`, `label`/`name`,
/// `hint`, `disabled`).
pub fn normalize_record(record: &Value, mapping: Option<&OptionMapping>) -> PromptOption {
    if let Some(mapping) = mapping {
        let value = mapping
            .value
            .as_deref()
            .and_then(|path| lookup(record, path))
            .cloned()
            .unwrap_or_else(|| record.clone());
        let label = mapping
            .label
            .as_deref()
            .and_then(|path| lookup(record, path))
            .map(|value| as_label(value))
            .unwrap_or_else(|| as_label(&value));
        let hint = mapping
            .hint
            .as_deref()
            .and_then(|path| lookup(record, path))
            .map(|value| as_label(value));
        let disabled = mapping
            .disable_when
            .as_deref()
            .and_then(|path| lookup(record, path))
            .is_some_and(is_truthy);
        return PromptOption {
            value,
            label,
            hint,
            disabled,
        };
    }

    match record {
        Value::String(text) => PromptOption {
            value: Value::String(text.clone()),
            label: text.clone(),
            hint: None,
            disabled: false,
        },
        Value::Object(map) => {
            let value = map
                .get("value")
                .or_else(|| map.get("id"))
                .cloned()
                .unwrap_or_else(|| record.clone());
            let label = map
                .get("label")
                .or_else(|| map.get("name"))
                .map(as_label)
                .unwrap_or_else(|| as_label(&value));
            PromptOption {
                value,
                label,
                hint: map.get("hint").map(as_label),
                disabled: map.get("disabled").is_some_and(is_truthy),
            }
        }
        other => PromptOption {
            value: other.clone(),
            label: as_label(other),
            hint: None,
            disabled: false,
        },
    }
}

pub fn normalize_records(records: &[Value], mapping: Option<&OptionMapping>) -> Vec<PromptOption> {
    records
        .iter()
        .map(|record| normalize_record(record, mapping))
        .collect()
}
