//! The git worktree guard: make sure a scenario starts from a clean (or
//! deliberately handled) working tree.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use wizard_core::{MessageLevel, PromptMode, PromptOption, PromptRequest, WorktreeGuardStep};
use wizard_process::{
    PushResult, branch_remote, commit_all, create_branch, current_branch, push,
    push_set_upstream, remotes, stage_all, stash_all, worktree_status,
};

use crate::error::ExecutionError;
use crate::executor::{ScenarioExecutor, StepResult};

/// The answers key a guard stores its chosen strategy under when the step
/// does not name one.
pub const DEFAULT_STRATEGY_KEY: &str = "worktreeStrategy";
const COMMIT_MESSAGE_KEY: &str = "commitMessage";
const BRANCH_NAME_KEY: &str = "branchName";
const REPOS_MANIFEST: &str = "workspace.repos.json";

impl ScenarioExecutor {
    pub(crate) async fn run_worktree_guard(
        &mut self,
        step: &WorktreeGuardStep,
    ) -> Result<StepResult, ExecutionError> {
        let cwd = step
            .cwd
            .as_ref()
            .map(|cwd| self.options.repo_root.join(cwd))
            .unwrap_or_else(|| self.options.repo_root.clone());

        let status = worktree_status(&cwd).map_err(|err| ExecutionError::GuardFailed {
            step: step.common.id.clone(),
            message: err.to_string(),
        })?;

        if status.clean {
            let ctx = self.ctx(step.common.metadata.as_ref());
            let message = step
                .clean_message
                .as_ref()
                .map(|message| self.render(message, &ctx))
                .unwrap_or_else(|| "Working tree is clean.".to_string());
            self.note(MessageLevel::Success, &message);
            return Ok(StepResult::advance());
        }

        let ctx = self.ctx(step.common.metadata.as_ref());
        let dirty_message = step
            .dirty_message
            .as_ref()
            .map(|message| self.render(message, &ctx))
            .unwrap_or_else(|| {
                format!(
                    "Working tree has {} uncommitted change(s).",
                    status.entries.len()
                )
            });
        self.note(MessageLevel::Warning, &dirty_message);

        let strategy = self.resolve_strategy(step).await?;
        debug!(strategy = %strategy, "worktree guard strategy chosen");

        match strategy.as_str() {
            "proceed" => {
                self.note(
                    MessageLevel::Warning,
                    "Proceeding with a dirty working tree.",
                );
            }
            "stash" => {
                let message = self
                    .guard_text_answer(step, COMMIT_MESSAGE_KEY, step.commit_message_prompt.as_deref(), "Stash message?")
                    .await?;
                stash_all(&cwd, &message).map_err(|err| ExecutionError::GuardFailed {
                    step: step.common.id.clone(),
                    message: err.to_string(),
                })?;
                self.note(MessageLevel::Success, "Changes stashed (including untracked).");
            }
            "commit-push" | "branch" => {
                let message = self
                    .guard_text_answer(step, COMMIT_MESSAGE_KEY, step.commit_message_prompt.as_deref(), "Commit message?")
                    .await?;
                if strategy == "branch" {
                    let branch_name = self
                        .guard_text_answer(step, BRANCH_NAME_KEY, step.branch_name_prompt.as_deref(), "Branch name?")
                        .await?;
                    create_branch(&cwd, &branch_name).map_err(|err| {
                        ExecutionError::GuardFailed {
                            step: step.common.id.clone(),
                            message: err.to_string(),
                        }
                    })?;
                }
                self.commit_and_push(&step.common.id, &cwd, &message)?;
                self.commit_nested_repos(&step.common.id, &message)?;
            }
            other => {
                return Err(ExecutionError::GuardFailed {
                    step: step.common.id.clone(),
                    message: format!("unknown strategy '{other}'"),
                });
            }
        }

        Ok(StepResult::advance())
    }

    /// Pick the recovery strategy: stored answer or override first, then
    /// a synthesized prompt limited to the enabled strategies.
    async fn resolve_strategy(
        &mut self,
        step: &WorktreeGuardStep,
    ) -> Result<String, ExecutionError> {
        let enabled = step.enabled_strategies();
        if enabled.is_empty() {
            return Err(ExecutionError::GuardNoStrategy(step.common.id.clone()));
        }

        let key = step
            .store_strategy_as
            .as_deref()
            .unwrap_or(DEFAULT_STRATEGY_KEY)
            .to_string();

        let stored = self
            .overrides
            .remove(&key)
            .or_else(|| self.state.answers.get(&key).cloned())
            .and_then(|value| value.as_str().map(str::to_string));
        if let Some(candidate) = stored {
            if enabled.contains(&candidate.as_str()) {
                self.state
                    .answers
                    .insert(key, Value::String(candidate.clone()));
                return Ok(candidate);
            }
            self.note(
                MessageLevel::Warning,
                &format!("Stored strategy '{candidate}' is not enabled for this guard"),
            );
        }

        if !self.interactive() {
            return Err(ExecutionError::GuardNoStrategy(step.common.id.clone()));
        }

        let ctx = self.ctx(step.common.metadata.as_ref());
        let message = step
            .prompt
            .as_ref()
            .map(|prompt| self.render(prompt, &ctx))
            .unwrap_or_else(|| "The working tree is dirty. How should it be handled?".to_string());

        let options: Vec<PromptOption> = enabled
            .iter()
            .map(|strategy| PromptOption {
                value: Value::String((*strategy).to_string()),
                label: strategy_label(strategy).to_string(),
                hint: None,
                disabled: false,
            })
            .collect();

        let request = PromptRequest {
            flow_id: String::new(),
            step_id: step.common.id.clone(),
            mode: PromptMode::Select,
            message,
            options,
            default_value: None,
            required: true,
            show_selection_order: false,
        };
        let selection = self.deps.prompt.prompt(request).await.map_err(|err| match err {
            wizard_core::PromptError::Cancelled => ExecutionError::PromptCancelled,
            other => ExecutionError::Prompt(other),
        })?;
        let strategy = selection
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExecutionError::GuardNoStrategy(step.common.id.clone()))?;

        self.state
            .answers
            .insert(key, Value::String(strategy.clone()));
        Ok(strategy)
    }

    /// A string answer for the guard's nested prompts: stored answers
    /// win, otherwise ask.
    async fn guard_text_answer(
        &mut self,
        step: &WorktreeGuardStep,
        key: &str,
        prompt_template: Option<&str>,
        fallback_prompt: &str,
    ) -> Result<String, ExecutionError> {
        if let Some(stored) = self
            .overrides
            .remove(key)
            .or_else(|| self.state.answers.get(key).cloned())
            .and_then(|value| value.as_str().map(str::to_string))
        {
            return Ok(stored);
        }

        if !self.interactive() {
            return Err(ExecutionError::GuardFailed {
                step: step.common.id.clone(),
                message: format!("'{key}' is required but no answer is available"),
            });
        }

        let ctx = self.ctx(step.common.metadata.as_ref());
        let message = prompt_template
            .map(|template| self.render(template, &ctx))
            .unwrap_or_else(|| fallback_prompt.to_string());
        let request = PromptRequest {
            flow_id: String::new(),
            step_id: step.common.id.clone(),
            mode: PromptMode::Input,
            message,
            options: Vec::new(),
            default_value: None,
            required: true,
            show_selection_order: false,
        };
        let answer = self.deps.prompt.prompt(request).await.map_err(|err| match err {
            wizard_core::PromptError::Cancelled => ExecutionError::PromptCancelled,
            other => ExecutionError::Prompt(other),
        })?;
        let text = answer
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| answer.to_string());
        self.state
            .answers
            .insert(key.to_string(), Value::String(text.clone()));
        Ok(text)
    }

    /// Stage, commit, and push; a missing upstream falls back to
    /// `git push --set-upstream <remote> <branch>`.
    fn commit_and_push(
        &mut self,
        step_id: &str,
        cwd: &Path,
        message: &str,
    ) -> Result<(), ExecutionError> {
        let guard_error = |message: String| ExecutionError::GuardFailed {
            step: step_id.to_string(),
            message,
        };

        stage_all(cwd).map_err(|err| guard_error(err.to_string()))?;
        commit_all(cwd, message).map_err(|err| guard_error(err.to_string()))?;
        self.note(MessageLevel::Success, &format!("Committed: {message}"));

        match push(cwd).map_err(|err| guard_error(err.to_string()))? {
            PushResult::Pushed => {
                self.note(MessageLevel::Success, "Pushed to upstream.");
            }
            PushResult::NoUpstream => {
                let branch =
                    current_branch(cwd).map_err(|err| guard_error(err.to_string()))?;
                let remote = branch_remote(cwd, &branch)
                    .or_else(|| remotes(cwd).ok().and_then(|remotes| remotes.into_iter().next()))
                    .unwrap_or_else(|| "origin".to_string());
                push_set_upstream(cwd, &remote, &branch)
                    .map_err(|err| guard_error(err.to_string()))?;
                self.note(
                    MessageLevel::Success,
                    &format!("Pushed with new upstream {remote}/{branch}."),
                );
            }
        }
        Ok(())
    }

    /// Commit and push every dirty nested repository listed in
    /// `workspace.repos.json`, reusing the same commit message.
    fn commit_nested_repos(&mut self, step_id: &str, message: &str) -> Result<(), ExecutionError> {
        let manifest_path = self.options.repo_root.join(REPOS_MANIFEST);
        let Ok(raw) = std::fs::read_to_string(&manifest_path) else {
            return Ok(());
        };
        let Ok(parsed) = serde_json::from_str::<Value>(&raw) else {
            self.note(
                MessageLevel::Warning,
                &format!("Unparseable {REPOS_MANIFEST}; skipping nested repos"),
            );
            return Ok(());
        };

        for path in manifest_repo_paths(&parsed) {
            let repo_dir = self.options.repo_root.join(&path);
            let status = match worktree_status(&repo_dir) {
                Ok(status) => status,
                Err(err) => {
                    self.note(
                        MessageLevel::Warning,
                        &format!("Nested repo '{path}' unavailable: {err}"),
                    );
                    continue;
                }
            };
            if status.clean {
                continue;
            }
            self.commit_and_push(step_id, &repo_dir, message)?;
            self.note(
                MessageLevel::Success,
                &format!("Nested repo '{path}' committed and pushed."),
            );
        }
        Ok(())
    }
}

fn strategy_label(strategy: &str) -> &'static str {
    match strategy {
        "commit-push" => "Commit and push the changes",
        "stash" => "Stash the changes",
        "branch" => "Create a branch, then commit and push",
        "proceed" => "Proceed anyway",
        _ => "Unknown strategy",
    }
}

/// Accepts `{"repos": [{"path": "..."}]}`, `{"repos": ["..."]}`, or a
/// bare array of either shape.
fn manifest_repo_paths(manifest: &Value) -> Vec<String> {
    let list = manifest
        .get("repos")
        .and_then(Value::as_array)
        .or_else(|| manifest.as_array());
    let Some(list) = list else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|entry| match entry {
            Value::String(path) => Some(path.clone()),
            Value::Object(map) => map
                .get("path")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}
