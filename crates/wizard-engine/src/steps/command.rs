//! Command step execution: preset/env resolution, policy gating,
//! dispatch through the runner, stdout capture, and the failure
//! recovery ladder.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::debug;

use wizard_core::{
    AutoStrategy, CommandError, CommandExecutionRecord, CommandRequest, CommandStep,
    DryRunStrategy, ErrorShape, MessageLevel, NextTarget, ParseJsonOnError, PolicyLevel,
    PromptMode, PromptOption, PromptRequest, ResolvedCommand, RetryRecord, RunStatus, SkipRecord,
    StoreWhen, WizardEvent, resolve_command,
};
use wizard_policy::{PolicyDecision, PolicyQuery, resolve_preset};
use wizard_state::redact_value_paths;

use crate::error::ExecutionError;
use crate::executor::{ScenarioExecutor, StepResult};
use crate::timings::{scan_integration_timings, workflow_metadata};

const SKIP_CHOICE: &str = "__skip__";
const REPLAY_CHOICE: &str = "__replay__";
const ABORT_CHOICE: &str = "__abort__";

impl ScenarioExecutor {
    pub(crate) async fn run_command_step(
        &mut self,
        flow_id: &str,
        step: &CommandStep,
    ) -> Result<StepResult, ExecutionError> {
        if self.options.collect && !step.collect_safe {
            return Err(ExecutionError::CollectUnsafeCommand(step.common.id.clone()));
        }

        let mut step_failed = false;

        for descriptor in &step.commands {
            let preset_name = descriptor
                .preset
                .as_deref()
                .or(step.defaults.as_ref().and_then(|defaults| defaults.preset.as_deref()));
            let preset = match preset_name {
                Some(name) => Some(
                    resolve_preset(&self.config, name)
                        .map_err(|_| ExecutionError::UnknownPreset(name.to_string()))?
                        .preset,
                ),
                None => None,
            };
            let resolved = resolve_command(
                descriptor,
                step.defaults.as_ref(),
                preset_name,
                preset.as_ref(),
            );

            let ctx = self.ctx(step.common.metadata.as_ref());
            let command_text = self.render(&resolved.run, &ctx);
            let cwd_text = resolved
                .knobs
                .cwd
                .clone()
                .map(|cwd| self.render(&cwd, &ctx));
            let env: BTreeMap<String, String> = resolved
                .env
                .iter()
                .map(|(key, value)| (key.clone(), self.render(value, &ctx)))
                .collect();

            let proceed = self
                .enforce_policy(flow_id, &step.common.id, &command_text, resolved.preset.as_deref())
                .await?;

            let record = if !proceed {
                self.blocked_record(flow_id, step, &resolved, &command_text, &cwd_text)
            } else {
                self.dispatch(flow_id, step, &resolved, &command_text, &cwd_text, env)
                    .await
            };

            if let Some(warn_after_ms) = resolved.knobs.warn_after_ms {
                if record.duration_ms >= warn_after_ms {
                    self.note(
                        MessageLevel::Warning,
                        &format!(
                            "'{command_text}' ran for {}ms (warn threshold {warn_after_ms}ms)",
                            record.duration_ms
                        ),
                    );
                }
            }

            self.state.record_command(record.clone());
            self.emit(WizardEvent::CommandResult {
                flow_id: flow_id.to_string(),
                step_id: step.common.id.clone(),
                command: record.command.clone(),
                name: record.name.clone(),
                success: record.success,
                exit_code: record.exit_code,
                duration_ms: record.duration_ms,
                timed_out: record.timed_out,
                stdout: record.stdout.clone(),
                stderr: record.stderr.clone(),
                at: Utc::now(),
            });

            self.capture_integration_timings(flow_id, step, &record);

            let stored = self.store_command_stdout(&resolved, &record);
            let mut failed = !record.success;
            if let Err(parse_error) = stored {
                self.note(MessageLevel::Error, &parse_error);
                failed = true;
            }

            if !failed {
                continue;
            }

            if !step_failed {
                self.state.failed_steps += 1;
                step_failed = true;
            }

            let continue_allowed =
                resolved.knobs.continue_on_fail.unwrap_or(false) || step.continue_on_error;
            if continue_allowed {
                self.note(
                    MessageLevel::Warning,
                    &format!("'{command_text}' failed; continuing per configuration"),
                );
                continue;
            }

            return self.handle_command_failure(flow_id, step, &record).await;
        }

        let status = if step_failed {
            RunStatus::Warning
        } else {
            RunStatus::Success
        };
        let next = if step_failed {
            None
        } else {
            if let Some(summary) = &step.summary {
                let ctx = self.ctx(step.common.metadata.as_ref());
                let text = self.render(summary, &ctx);
                self.note(MessageLevel::Success, &text);
            }
            step.on_success.as_ref().map(|transition| transition.next.clone())
        };
        Ok(StepResult { next, status })
    }

    async fn dispatch(
        &mut self,
        flow_id: &str,
        step: &CommandStep,
        resolved: &ResolvedCommand,
        command_text: &str,
        cwd_text: &Option<String>,
        env: BTreeMap<String, String>,
    ) -> CommandExecutionRecord {
        let started_at = Utc::now();

        let dry_skip = self.options.dry_run
            && resolved.knobs.dry_run_strategy.unwrap_or_default() == DryRunStrategy::Skip;
        if dry_skip {
            self.note(
                MessageLevel::Info,
                &format!("[dry-run] skipping '{command_text}'"),
            );
            return CommandExecutionRecord {
                flow_id: flow_id.to_string(),
                step_id: step.common.id.clone(),
                command: command_text.to_string(),
                name: resolved.name.clone(),
                cwd: cwd_text.clone(),
                success: true,
                exit_code: Some(0),
                duration_ms: 0,
                started_at,
                ended_at: Some(started_at),
                stdout: None,
                stderr: None,
                timed_out: false,
                error: None,
            };
        }

        let request = CommandRequest {
            command: command_text.to_string(),
            cwd: Some(match cwd_text {
                Some(cwd) => self.options.repo_root.join(cwd),
                None => self.options.repo_root.clone(),
            }),
            env,
            shell: resolved.knobs.shell.clone(),
            timeout_ms: resolved.knobs.timeout_ms,
            capture_stdout: resolved.knobs.capture_stdout.unwrap_or(true),
            quiet: resolved.knobs.quiet.unwrap_or(false),
        };

        debug!(command = %command_text, "dispatching command");
        match self.deps.runner.run(&request).await {
            Ok(outcome) => {
                if outcome.timed_out {
                    self.note(
                        MessageLevel::Warning,
                        &format!(
                            "'{command_text}' timed out after {}ms",
                            resolved.knobs.timeout_ms.unwrap_or(outcome.duration_ms)
                        ),
                    );
                }
                CommandExecutionRecord {
                    flow_id: flow_id.to_string(),
                    step_id: step.common.id.clone(),
                    command: command_text.to_string(),
                    name: resolved.name.clone(),
                    cwd: cwd_text.clone(),
                    success: outcome.success,
                    exit_code: outcome.exit_code,
                    duration_ms: outcome.duration_ms,
                    started_at,
                    ended_at: Some(Utc::now()),
                    stdout: Some(outcome.stdout),
                    stderr: Some(outcome.stderr),
                    timed_out: outcome.timed_out,
                    error: if outcome.success {
                        None
                    } else {
                        Some(ErrorShape::new(
                            "CommandError",
                            match outcome.exit_code {
                                Some(code) => format!("exit code {code}"),
                                None if outcome.timed_out => "timed out".to_string(),
                                None => "terminated without exit code".to_string(),
                            },
                        ))
                    },
                }
            }
            Err(err) => {
                let message = match &err {
                    CommandError::Spawn { message, .. } => message.clone(),
                    CommandError::Io(message) => message.clone(),
                };
                CommandExecutionRecord {
                    flow_id: flow_id.to_string(),
                    step_id: step.common.id.clone(),
                    command: command_text.to_string(),
                    name: resolved.name.clone(),
                    cwd: cwd_text.clone(),
                    success: false,
                    exit_code: None,
                    duration_ms: 0,
                    started_at,
                    ended_at: Some(Utc::now()),
                    stdout: None,
                    stderr: None,
                    timed_out: false,
                    error: Some(ErrorShape::new("SpawnError", message)),
                }
            }
        }
    }

    fn blocked_record(
        &self,
        flow_id: &str,
        step: &CommandStep,
        resolved: &ResolvedCommand,
        command_text: &str,
        cwd_text: &Option<String>,
    ) -> CommandExecutionRecord {
        let now = Utc::now();
        CommandExecutionRecord {
            flow_id: flow_id.to_string(),
            step_id: step.common.id.clone(),
            command: command_text.to_string(),
            name: resolved.name.clone(),
            cwd: cwd_text.clone(),
            success: false,
            exit_code: None,
            duration_ms: 0,
            started_at: now,
            ended_at: Some(now),
            stdout: None,
            stderr: None,
            timed_out: false,
            error: Some(ErrorShape::new("PolicyError", "blocked by policy")),
        }
    }

    /// Evaluate policy for a command. Returns whether to proceed; a block
    /// in a non-interactive context is fatal.
    async fn enforce_policy(
        &mut self,
        flow_id: &str,
        step_id: &str,
        command: &str,
        preset: Option<&str>,
    ) -> Result<bool, ExecutionError> {
        let decision = self.policy.evaluate(&PolicyQuery {
            flow_id,
            step_id,
            command,
            preset,
        });
        self.record_policy_decision(flow_id, step_id, command, &decision);

        match decision.enforced_level {
            PolicyLevel::Allow => Ok(true),
            PolicyLevel::Warn => {
                let note = decision.note.clone().unwrap_or_default();
                self.note(
                    MessageLevel::Warning,
                    &format!("Policy warning for '{command}': {note}"),
                );
                Ok(true)
            }
            PolicyLevel::Block => {
                if !self.interactive() {
                    return Err(ExecutionError::PolicyBlocked {
                        rule_id: decision.rule_id.unwrap_or_else(|| "default".to_string()),
                        command: command.to_string(),
                    });
                }

                let confirmed = self.confirm_blocked_command(flow_id, step_id, command).await;
                if !confirmed {
                    self.note(
                        MessageLevel::Warning,
                        &format!("'{command}' not run: blocked by policy"),
                    );
                    return Ok(false);
                }
                if let Some(rule_id) = &decision.rule_id {
                    self.policy.acknowledge(rule_id);
                }
                // Re-evaluate so the acknowledged (downgraded) decision
                // lands in the record and the event stream.
                let downgraded = self.policy.evaluate(&PolicyQuery {
                    flow_id,
                    step_id,
                    command,
                    preset,
                });
                self.record_policy_decision(flow_id, step_id, command, &downgraded);
                Ok(true)
            }
        }
    }

    async fn confirm_blocked_command(
        &mut self,
        flow_id: &str,
        step_id: &str,
        command: &str,
    ) -> bool {
        let request = PromptRequest {
            flow_id: flow_id.to_string(),
            step_id: step_id.to_string(),
            mode: PromptMode::Confirm,
            message: format!("'{command}' is blocked by policy. Continue anyway?"),
            options: Vec::new(),
            default_value: Some(Value::Bool(false)),
            required: true,
            show_selection_order: false,
        };
        match self.deps.prompt.prompt(request).await {
            Ok(Value::Bool(answer)) => answer,
            Ok(Value::String(text)) => {
                matches!(text.trim().to_ascii_lowercase().as_str(), "y" | "yes" | "true")
            }
            _ => false,
        }
    }

    fn record_policy_decision(
        &mut self,
        flow_id: &str,
        step_id: &str,
        command: &str,
        decision: &PolicyDecision,
    ) {
        let at = Utc::now();
        self.state.policy_decisions.push(wizard_core::PolicyDecisionRecord {
            flow_id: flow_id.to_string(),
            step_id: step_id.to_string(),
            command: command.to_string(),
            rule_id: decision.rule_id.clone(),
            level: decision.level,
            enforced_level: decision.enforced_level,
            acknowledged: decision.acknowledged,
            note: decision.note.clone(),
            at,
        });
        self.emit(WizardEvent::PolicyDecision {
            flow_id: flow_id.to_string(),
            step_id: step_id.to_string(),
            command: command.to_string(),
            rule_id: decision.rule_id.clone(),
            level: decision.level,
            enforced_level: decision.enforced_level,
            acknowledged: decision.acknowledged,
            note: decision.note.clone(),
            at,
        });
    }

    fn capture_integration_timings(
        &mut self,
        flow_id: &str,
        step: &CommandStep,
        record: &CommandExecutionRecord,
    ) {
        let Some(stdout) = &record.stdout else {
            return;
        };
        let tasks = scan_integration_timings(stdout);
        if tasks.is_empty() {
            return;
        }
        let workflow = workflow_metadata(step.common.metadata.as_ref());
        self.state
            .integration_timings
            .push(wizard_core::IntegrationTimingEntry {
                flow_id: flow_id.to_string(),
                step_id: step.common.id.clone(),
                workflow_id: workflow.as_ref().map(|workflow| workflow.id.clone()),
                workflow_label: workflow.and_then(|workflow| workflow.label),
                command: record.command.clone(),
                metadata: tasks,
            });
    }

    /// Store captured stdout into answers per `storeStdoutAs`, with
    /// optional JSON parsing and dotted-path redaction. An `Err` means a
    /// `parseJson.onError = fail` violation.
    fn store_command_stdout(
        &mut self,
        resolved: &ResolvedCommand,
        record: &CommandExecutionRecord,
    ) -> Result<(), String> {
        let Some(key) = resolved.knobs.store_stdout_as.clone() else {
            return Ok(());
        };
        let store_when = resolved.knobs.store_when.unwrap_or(StoreWhen::Success);
        if !store_when.permits(record.success) {
            return Ok(());
        }

        let stdout = record.stdout.clone().unwrap_or_default();
        let trimmed = stdout.trim_end();
        let mut value = Value::String(trimmed.to_string());

        if let Some(parse_spec) = &resolved.knobs.parse_json {
            if parse_spec.is_enabled() {
                match serde_json::from_str::<Value>(trimmed.trim()) {
                    Ok(parsed) => value = parsed,
                    Err(err) => match parse_spec.on_error() {
                        ParseJsonOnError::Warn => {
                            self.note(
                                MessageLevel::Warning,
                                &format!("stdout of '{}' is not JSON: {err}", record.command),
                            );
                        }
                        ParseJsonOnError::Fail => {
                            return Err(format!(
                                "stdout of '{}' is not JSON: {err}",
                                record.command
                            ));
                        }
                    },
                }
            }
        }

        if !resolved.knobs.redact_keys.is_empty() {
            redact_value_paths(&mut value, &resolved.knobs.redact_keys);
        }

        self.state.answers.insert(key, value);
        Ok(())
    }

    /// The failure ladder: auto recovery, recommendation, answer-driven
    /// policy, non-interactive default, interactive menu.
    async fn handle_command_failure(
        &mut self,
        flow_id: &str,
        step: &CommandStep,
        record: &CommandExecutionRecord,
    ) -> Result<StepResult, ExecutionError> {
        let on_error = step.on_error.clone().unwrap_or_default();
        let step_id = step.common.id.clone();

        // 1. Automatic handling within the attempt budget.
        if let Some(auto) = &on_error.auto {
            let attempts = self.state.auto_attempts(flow_id, &step_id);
            if attempts < auto.limit {
                let attempt = self.state.next_auto_attempt(flow_id, &step_id);
                let next = match auto.strategy {
                    AutoStrategy::Retry => NextTarget::Repeat,
                    AutoStrategy::Default => on_error
                        .default_next
                        .as_ref()
                        .map(|transition| transition.next.clone())
                        .unwrap_or(NextTarget::Exit),
                    AutoStrategy::Transition => match auto.target.as_deref() {
                        Some("retry") => NextTarget::Repeat,
                        Some("exit") | None => NextTarget::Exit,
                        Some(target) => NextTarget::from_name(target),
                    },
                    AutoStrategy::Exit => NextTarget::Exit,
                };
                if next == NextTarget::Repeat {
                    self.state.retries.push(RetryRecord {
                        flow_id: flow_id.to_string(),
                        step_id: step_id.clone(),
                        attempt,
                        at: Utc::now(),
                    });
                }
                self.note(
                    MessageLevel::Info,
                    &format!(
                        "auto recovery for '{step_id}' (attempt {attempt}/{}) -> {next}",
                        auto.limit
                    ),
                );
                return Ok(StepResult {
                    next: Some(next),
                    status: RunStatus::Failure,
                });
            }
        }

        // 2. Surface the recommendation.
        if let Some(recommendation) = &on_error.recommendation {
            if let Some(text) = &recommendation.text {
                self.note(MessageLevel::Error, text);
            }
            for command in &recommendation.commands {
                self.note(MessageLevel::Info, &format!("try: {command}"));
            }
            for link in &recommendation.links {
                self.note(MessageLevel::Info, &format!("see: {link}"));
            }
        }

        // 3. Answer-driven policy resolution.
        if let Some(policy) = &on_error.policy {
            let value = answers_path(&self.state.answers, &policy.key);
            let mapped = value
                .and_then(Value::as_str)
                .and_then(|text| policy.map.get(text))
                .cloned()
                .or_else(|| policy.default.clone());
            match mapped {
                Some(next) => {
                    self.record_failure_transition(flow_id, &step_id, &next, "recovery policy");
                    return Ok(StepResult {
                        next: Some(next),
                        status: RunStatus::Failure,
                    });
                }
                None => {
                    if policy.required && !self.interactive() {
                        return Err(ExecutionError::Internal(format!(
                            "recovery policy '{}' has no mapping for the stored answer",
                            policy.key
                        )));
                    }
                }
            }
        }

        // 4. Non-interactive: take the default transition.
        if !self.interactive() {
            let next = on_error
                .default_next
                .as_ref()
                .map(|transition| transition.next.clone())
                .unwrap_or(NextTarget::Exit);
            if next != NextTarget::Exit {
                self.state.skipped_steps.push(SkipRecord {
                    flow_id: flow_id.to_string(),
                    step_id: step_id.clone(),
                    reason: "command failed; non-interactive default transition".to_string(),
                    at: Utc::now(),
                });
            }
            return Ok(StepResult {
                next: Some(next),
                status: RunStatus::Failure,
            });
        }

        // 5. Interactive menu: configured actions plus fixed shortcuts.
        let mut choices: Vec<PromptOption> = on_error
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| PromptOption {
                value: Value::String(format!("action:{index}")),
                label: action.label.clone(),
                hint: action.description.clone(),
                disabled: false,
            })
            .collect();
        choices.push(choice(SKIP_CHOICE, "Skip this step (Ctrl+S)"));
        choices.push(choice(REPLAY_CHOICE, "Replay last command (Ctrl+R)"));
        choices.push(choice(ABORT_CHOICE, "Safe abort (Ctrl+X)"));

        let request = PromptRequest {
            flow_id: flow_id.to_string(),
            step_id: step_id.clone(),
            mode: PromptMode::Select,
            message: format!("'{}' failed. How should the run continue?", record.command),
            options: choices,
            default_value: None,
            required: true,
            show_selection_order: false,
        };

        let selection = match self.deps.prompt.prompt(request).await {
            Ok(value) => value,
            // Cancellation during failure recovery means exit, not abort.
            Err(wizard_core::PromptError::Cancelled) => Value::String(ABORT_CHOICE.to_string()),
            Err(err) => return Err(ExecutionError::Prompt(err)),
        };
        let selection = selection.as_str().unwrap_or(ABORT_CHOICE).to_string();

        let next = match selection.as_str() {
            SKIP_CHOICE => {
                self.emit_shortcut(flow_id, &step_id, "skip");
                self.state.skipped_steps.push(SkipRecord {
                    flow_id: flow_id.to_string(),
                    step_id: step_id.clone(),
                    reason: "skipped by operator after failure".to_string(),
                    at: Utc::now(),
                });
                step.on_success
                    .as_ref()
                    .map(|transition| transition.next.clone())
            }
            REPLAY_CHOICE => {
                self.emit_shortcut(flow_id, &step_id, "replay");
                Some(NextTarget::Repeat)
            }
            ABORT_CHOICE => {
                self.emit_shortcut(flow_id, &step_id, "safe-abort");
                Some(NextTarget::Exit)
            }
            other => match other
                .strip_prefix("action:")
                .and_then(|index| index.parse::<usize>().ok())
                .and_then(|index| on_error.actions.get(index))
            {
                Some(action) => Some(action.next.clone()),
                None => Some(NextTarget::Exit),
            },
        };

        Ok(StepResult {
            next,
            status: RunStatus::Failure,
        })
    }

    fn record_failure_transition(
        &mut self,
        flow_id: &str,
        step_id: &str,
        next: &NextTarget,
        source: &str,
    ) {
        match next {
            NextTarget::Repeat => self.state.retries.push(RetryRecord {
                flow_id: flow_id.to_string(),
                step_id: step_id.to_string(),
                attempt: self.state.auto_attempts(flow_id, step_id) + 1,
                at: Utc::now(),
            }),
            NextTarget::Exit => {}
            NextTarget::Step(_) => self.state.skipped_steps.push(SkipRecord {
                flow_id: flow_id.to_string(),
                step_id: step_id.to_string(),
                reason: format!("command failed; transition via {source}"),
                at: Utc::now(),
            }),
        }
    }

    fn emit_shortcut(&mut self, flow_id: &str, step_id: &str, shortcut: &str) {
        self.emit(WizardEvent::ShortcutTrigger {
            flow_id: flow_id.to_string(),
            step_id: step_id.to_string(),
            shortcut: shortcut.to_string(),
            at: Utc::now(),
        });
    }
}

fn choice(value: &str, label: &str) -> PromptOption {
    PromptOption {
        value: Value::String(value.to_string()),
        label: label.to_string(),
        hint: None,
        disabled: false,
    }
}

/// Dotted-path lookup into the answers map.
pub(crate) fn answers_path<'a>(answers: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = answers.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_answers_path_lookup() {
        let mut answers = Map::new();
        answers.insert("recovery".into(), json!({"choice": "skip", "list": [1, 2]}));
        assert_eq!(answers_path(&answers, "recovery.choice"), Some(&json!("skip")));
        assert_eq!(answers_path(&answers, "recovery.list.1"), Some(&json!(2)));
        assert_eq!(answers_path(&answers, "recovery.missing"), None);
        assert_eq!(answers_path(&answers, "absent"), None);
    }
}
