//! Prompt step execution: answer source priority, validation, interactive
//! collection, and persistence.

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use wizard_core::{
    AnswerScope, AnswerSource, MessageLevel, PromptMode, PromptOption, PromptRequest, PromptStep,
    PromptValidation, TemplateContext, WizardEvent,
};

use crate::error::ExecutionError;
use crate::executor::{ScenarioExecutor, StepResult};

/// The answers key naming the current project for project-scoped
/// persistence.
pub const PROJECT_ID_KEY: &str = "projectId";

impl ScenarioExecutor {
    pub(crate) async fn run_prompt(
        &mut self,
        flow_id: &str,
        step: &PromptStep,
    ) -> Result<StepResult, ExecutionError> {
        let key = step.answer_key().to_string();
        let ctx = self.ctx(step.common.metadata.as_ref());
        let options = self.resolve_prompt_options(step, &ctx).await?;

        let mut resolved: Option<(Value, AnswerSource)> = None;

        if let Some(value) = self.overrides.remove(&key) {
            resolved = Some((value, AnswerSource::Override));
        } else if self.options.apply_persisted_answers {
            if let Some(store) = &self.answers_store {
                let scope = step
                    .persist
                    .as_ref()
                    .and_then(|persist| persist.scope())
                    .unwrap_or(AnswerScope::Scenario);
                let project_id = self
                    .state
                    .answers
                    .get(PROJECT_ID_KEY)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(value) = store.get(scope, &key, project_id.as_deref()) {
                    resolved = Some((value, AnswerSource::Persisted));
                }
            }
        }

        if resolved.is_none() {
            if let Some(default_value) = &step.default_value {
                let value = self.coerce_default(step, default_value, &ctx);
                resolved = Some((value, AnswerSource::Default));
            }
        }

        // Pre-resolved values that fail validation fall through to an
        // interactive prompt; without one the run fails.
        if let Some((value, _)) = &resolved {
            if let Err(message) = validate_answer(step, value, &options) {
                if self.interactive() {
                    debug!(step = %step.common.id, %message, "pre-resolved answer rejected");
                    resolved = None;
                } else {
                    return Err(ExecutionError::PromptValidation {
                        step: step.common.id.clone(),
                        message,
                    });
                }
            }
        }

        let (value, source) = match resolved {
            Some(resolved) => resolved,
            None => {
                let value = self
                    .collect_interactively(flow_id, step, &options, &ctx)
                    .await?;
                (value, AnswerSource::Interactive)
            }
        };

        self.state.answers.insert(key.clone(), value.clone());
        self.emit(WizardEvent::PromptAnswer {
            flow_id: flow_id.to_string(),
            step_id: step.common.id.clone(),
            key: key.clone(),
            value: value.clone(),
            mode: step.mode,
            source,
            at: Utc::now(),
        });

        if let Some(scope) = step.persist.as_ref().and_then(|persist| persist.scope()) {
            self.persist_answer(step, scope, &key, value)?;
        }

        Ok(StepResult::advance())
    }

    async fn resolve_prompt_options(
        &mut self,
        step: &PromptStep,
        ctx: &TemplateContext,
    ) -> Result<Vec<PromptOption>, ExecutionError> {
        let mut options = Vec::new();
        if let Some(static_options) = &step.options {
            for option in static_options {
                let mut normalized = option.normalize();
                normalized.label = self.render(&normalized.label, ctx);
                if let Value::String(text) = &normalized.value {
                    normalized.value = Value::String(self.render(text, ctx));
                }
                options.push(normalized);
            }
        }
        if let Some(dynamic) = &step.dynamic {
            if self.options.collect && dynamic.requires_command_execution() {
                return Err(ExecutionError::CollectDynamicCommand(step.common.id.clone()));
            }
            match self.options_resolver.resolve_options(dynamic).await {
                Ok(resolved) => options.extend(resolved),
                Err(err) => self.note(
                    MessageLevel::Warning,
                    &format!(
                        "Option provider for prompt '{}' failed: {err}",
                        step.common.id
                    ),
                ),
            }
        }
        Ok(options)
    }

    /// Rendered default, with multiselect's string-that-is-a-JSON-array
    /// affordance.
    fn coerce_default(
        &mut self,
        step: &PromptStep,
        default_value: &Value,
        ctx: &TemplateContext,
    ) -> Value {
        let rendered = match default_value {
            Value::String(text) => Value::String(self.render(text, ctx)),
            other => other.clone(),
        };
        if step.mode == PromptMode::Multiselect {
            if let Value::String(text) = &rendered {
                if let Ok(parsed @ Value::Array(_)) = serde_json::from_str::<Value>(text) {
                    return parsed;
                }
            }
        }
        rendered
    }

    async fn collect_interactively(
        &mut self,
        flow_id: &str,
        step: &PromptStep,
        options: &[PromptOption],
        ctx: &TemplateContext,
    ) -> Result<Value, ExecutionError> {
        let message = self.render(&step.prompt, ctx);
        loop {
            let request = PromptRequest {
                flow_id: flow_id.to_string(),
                step_id: step.common.id.clone(),
                mode: step.mode,
                message: message.clone(),
                options: options.to_vec(),
                default_value: step.default_value.clone(),
                required: step.required,
                show_selection_order: step.show_selection_order,
            };
            // Cancellation during a normal prompt propagates to the
            // caller (unlike failure-recovery prompts).
            let raw = self.deps.prompt.prompt(request).await.map_err(|err| match err {
                wizard_core::PromptError::Cancelled => ExecutionError::PromptCancelled,
                other => ExecutionError::Prompt(other),
            })?;
            let value = coerce_answer(step.mode, raw);

            match validate_answer(step, &value, options) {
                Ok(()) => return Ok(value),
                Err(message) => {
                    if self.interactive() {
                        self.note(
                            MessageLevel::Warning,
                            &format!("Invalid answer for '{}': {message}", step.common.id),
                        );
                        continue;
                    }
                    return Err(ExecutionError::PromptValidation {
                        step: step.common.id.clone(),
                        message,
                    });
                }
            }
        }
    }

    fn persist_answer(
        &mut self,
        step: &PromptStep,
        scope: AnswerScope,
        key: &str,
        value: Value,
    ) -> Result<(), ExecutionError> {
        let project_id = self
            .state
            .answers
            .get(PROJECT_ID_KEY)
            .and_then(Value::as_str)
            .map(str::to_string);
        if scope == AnswerScope::Project && project_id.is_none() {
            self.note(
                MessageLevel::Warning,
                &format!(
                    "Prompt '{}' asks for project-scoped persistence without a current project",
                    step.common.id
                ),
            );
            return Ok(());
        }
        if let Some(store) = &mut self.answers_store {
            store.set(scope, key, project_id.as_deref(), value);
            self.emit(WizardEvent::PromptPersistence {
                scenario_id: self.scenario.id.clone(),
                scope,
                key: key.to_string(),
                project_id,
                at: Utc::now(),
            });
        }
        Ok(())
    }
}

/// Coerce a raw driver value into the shape the mode expects.
fn coerce_answer(mode: PromptMode, raw: Value) -> Value {
    match (mode, raw) {
        (PromptMode::Confirm, Value::String(text)) => {
            let normalized = text.trim().to_ascii_lowercase();
            Value::Bool(matches!(normalized.as_str(), "y" | "yes" | "true" | "1"))
        }
        (PromptMode::Multiselect, Value::String(text)) => {
            match serde_json::from_str::<Value>(&text) {
                Ok(parsed @ Value::Array(_)) => parsed,
                _ => Value::Array(vec![Value::String(text)]),
            }
        }
        (_, raw) => raw,
    }
}

fn is_empty_answer(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(text) => Some(text.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

/// Validation: required, min/max length, regex, option membership.
fn validate_answer(
    step: &PromptStep,
    value: &Value,
    options: &[PromptOption],
) -> Result<(), String> {
    if step.required && is_empty_answer(value) {
        return Err("a value is required".to_string());
    }

    if let Some(validation) = &step.validation {
        validate_rules(validation, value)?;
    }

    if matches!(step.mode, PromptMode::Select | PromptMode::Multiselect) && !options.is_empty() {
        let member = |candidate: &Value| options.iter().any(|option| &option.value == candidate);
        match (step.mode, value) {
            (PromptMode::Multiselect, Value::Array(items)) => {
                for item in items {
                    if !member(item) {
                        return Err(format!("'{item}' is not one of the offered options"));
                    }
                }
            }
            (PromptMode::Select, candidate) => {
                if !is_empty_answer(candidate) && !member(candidate) {
                    return Err(format!("'{candidate}' is not one of the offered options"));
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn validate_rules(validation: &PromptValidation, value: &Value) -> Result<(), String> {
    let fail = |fallback: String| validation.message.clone().unwrap_or(fallback);

    if let Some(min) = validation.min_length {
        if length_of(value).is_some_and(|length| length < min) {
            return Err(fail(format!("must have at least {min} characters or items")));
        }
    }
    if let Some(max) = validation.max_length {
        if length_of(value).is_some_and(|length| length > max) {
            return Err(fail(format!("must have at most {max} characters or items")));
        }
    }
    if let Some(pattern) = &validation.regex {
        let compiled = regex::Regex::new(pattern)
            .map_err(|err| format!("invalid validation regex '{pattern}': {err}"))?;
        if let Value::String(text) = value {
            if !compiled.is_match(text) {
                return Err(fail(format!("must match {pattern}")));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(value: serde_json::Value) -> PromptStep {
        serde_json::from_value(value).unwrap()
    }

    fn options(values: &[&str]) -> Vec<PromptOption> {
        values
            .iter()
            .map(|value| PromptOption {
                value: json!(value),
                label: value.to_string(),
                hint: None,
                disabled: false,
            })
            .collect()
    }

    #[test]
    fn test_required_rejects_empty() {
        let step = step(json!({"id": "name", "mode": "input", "prompt": "?", "required": true}));
        assert!(validate_answer(&step, &json!(""), &[]).is_err());
        assert!(validate_answer(&step, &Value::Null, &[]).is_err());
        assert!(validate_answer(&step, &json!("x"), &[]).is_ok());
    }

    #[test]
    fn test_length_rules_apply_to_strings_and_arrays() {
        let step = step(json!({
            "id": "name", "mode": "input", "prompt": "?",
            "validation": {"minLength": 2, "maxLength": 3}
        }));
        assert!(validate_answer(&step, &json!("a"), &[]).is_err());
        assert!(validate_answer(&step, &json!("ab"), &[]).is_ok());
        assert!(validate_answer(&step, &json!("abcd"), &[]).is_err());
        assert!(validate_answer(&step, &json!(["a"]), &[]).is_err());
        assert!(validate_answer(&step, &json!(["a", "b", "c"]), &[]).is_ok());
    }

    #[test]
    fn test_regex_rule_with_custom_message() {
        let step = step(json!({
            "id": "version", "mode": "input", "prompt": "?",
            "validation": {"regex": "^v\\d+", "message": "versions look like v1"}
        }));
        let err = validate_answer(&step, &json!("one"), &[]).unwrap_err();
        assert_eq!(err, "versions look like v1");
        assert!(validate_answer(&step, &json!("v42"), &[]).is_ok());
    }

    #[test]
    fn test_select_membership() {
        let step = step(json!({"id": "env", "mode": "select", "prompt": "?"}));
        let options = options(&["dev", "prod"]);
        assert!(validate_answer(&step, &json!("dev"), &options).is_ok());
        assert!(validate_answer(&step, &json!("staging"), &options).is_err());
    }

    #[test]
    fn test_multiselect_membership() {
        let step = step(json!({"id": "envs", "mode": "multiselect", "prompt": "?"}));
        let options = options(&["dev", "prod"]);
        assert!(validate_answer(&step, &json!(["dev", "prod"]), &options).is_ok());
        assert!(validate_answer(&step, &json!(["dev", "staging"]), &options).is_err());
    }

    #[test]
    fn test_coerce_confirm_strings() {
        assert_eq!(coerce_answer(PromptMode::Confirm, json!("yes")), json!(true));
        assert_eq!(coerce_answer(PromptMode::Confirm, json!("no")), json!(false));
        assert_eq!(coerce_answer(PromptMode::Confirm, json!(true)), json!(true));
    }

    #[test]
    fn test_coerce_multiselect_json_string() {
        assert_eq!(
            coerce_answer(PromptMode::Multiselect, json!("[\"a\",\"b\"]")),
            json!(["a", "b"])
        );
        assert_eq!(
            coerce_answer(PromptMode::Multiselect, json!("plain")),
            json!(["plain"])
        );
    }
}
