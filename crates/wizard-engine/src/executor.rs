//! The step-level state machine. One executor instance owns one run:
//! config in, events out, state mutated in place, checkpoint after every
//! step boundary.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use wizard_core::{
    AnswerStore, CommandRunner, ComputeRegistry, Config, ExpressionEvaluator, Flow, FlowRun,
    Identity, IdentitySegment, MessageLevel, NextTarget, PluginRegistry, PromptDriver, RunPhase,
    RunStatus, Scenario, Step, TemplateContext, TemplateContextArgs, TemplateRenderer,
    WizardEvent, WizardState, build_template_context,
};
use wizard_options::OptionsResolver;
use wizard_policy::PolicyEngine;
use wizard_state::{
    AnalyticsWriter, CheckpointOptions, CheckpointStatus, CheckpointStore, TelemetryFanout,
    generate_run_id,
};

use crate::error::{ExecutionError, WizardExecutionError};

/// External collaborators, injected by the caller.
pub struct EngineDeps {
    pub prompt: Arc<dyn PromptDriver>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub runner: Arc<dyn CommandRunner>,
    pub plugins: Arc<PluginRegistry>,
    pub compute: Arc<ComputeRegistry>,
}

/// Per-run knobs.
pub struct ExecuteOptions {
    pub repo_root: std::path::PathBuf,
    pub run_id: Option<String>,
    /// Hydrate state from the checkpoint named by `run_id`.
    pub resume: bool,
    pub dry_run: bool,
    /// Read-only answer gathering: unsafe commands and command option
    /// providers are rejected, post-run hooks are skipped.
    pub collect: bool,
    /// Force non-interactive behavior even with an interactive driver.
    pub non_interactive: bool,
    pub apply_persisted_answers: bool,
    pub overrides: Map<String, Value>,
    /// None disables checkpointing entirely.
    pub checkpoints: Option<CheckpointOptions>,
    pub write_reports: bool,
}

impl ExecuteOptions {
    pub fn new(repo_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            run_id: None,
            resume: false,
            dry_run: false,
            collect: false,
            non_interactive: false,
            apply_persisted_answers: true,
            overrides: Map::new(),
            checkpoints: Some(CheckpointOptions::default()),
            write_reports: true,
        }
    }
}

/// What a step handler reports back to the loop.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub next: Option<NextTarget>,
    pub status: RunStatus,
}

impl StepResult {
    pub fn advance() -> Self {
        Self {
            next: None,
            status: RunStatus::Success,
        }
    }

    pub fn with_next(next: Option<NextTarget>) -> Self {
        Self {
            next,
            status: RunStatus::Success,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowOutcome {
    Completed,
    ExitedEarly,
}

pub struct ScenarioExecutor {
    pub(crate) config: Arc<Config>,
    pub(crate) scenario: Scenario,
    pub(crate) deps: EngineDeps,
    pub(crate) options: ExecuteOptions,
    pub(crate) state: WizardState,
    pub(crate) env: BTreeMap<String, String>,
    pub(crate) policy: PolicyEngine,
    pub(crate) options_resolver: OptionsResolver,
    pub(crate) answers_store: Option<Box<dyn AnswerStore>>,
    pub(crate) sinks: TelemetryFanout,
    pub(crate) checkpoints: Option<CheckpointStore>,
    pub(crate) overrides: Map<String, Value>,
    pub(crate) resumed: bool,
}

impl ScenarioExecutor {
    /// Build an executor for one scenario. With `options.resume`, the
    /// checkpoint named by `options.run_id` hydrates the state.
    pub fn new(
        config: Arc<Config>,
        scenario_id: &str,
        deps: EngineDeps,
        mut options: ExecuteOptions,
        answers_store: Option<Box<dyn AnswerStore>>,
        sinks: TelemetryFanout,
    ) -> Result<Self, ExecutionError> {
        let scenario = config
            .scenario(scenario_id)
            .ok_or_else(|| ExecutionError::UnknownScenario(scenario_id.to_string()))?
            .clone();

        let policy = PolicyEngine::from_config(config.policies.as_ref())
            .map_err(|err| ExecutionError::Internal(err.to_string()))?;

        let checkpoints = options
            .checkpoints
            .clone()
            .map(|checkpoint_options| CheckpointStore::new(&options.repo_root, checkpoint_options));

        let (state, resumed) = if options.resume {
            let run_id = options
                .run_id
                .clone()
                .ok_or_else(|| ExecutionError::Checkpoint("resume requires a runId".into()))?;
            let store = checkpoints
                .as_ref()
                .ok_or_else(|| ExecutionError::Checkpoint("resume requires checkpointing".into()))?;
            let checkpoint = store
                .load(&run_id)
                .map_err(|err| ExecutionError::Checkpoint(err.to_string()))?;
            if checkpoint.state.scenario_id != scenario.id {
                return Err(ExecutionError::Checkpoint(format!(
                    "run '{run_id}' belongs to scenario '{}'",
                    checkpoint.state.scenario_id
                )));
            }
            (checkpoint.state, true)
        } else {
            let mut state = WizardState::new(&scenario.id, &scenario.label);
            state.run_id = Some(
                options
                    .run_id
                    .clone()
                    .unwrap_or_else(|| generate_run_id(&scenario.id, Utc::now())),
            );
            (state, false)
        };
        options.run_id = state.run_id.clone();

        // Command option providers only get a runner outside collect.
        let resolver_runner: Option<Arc<dyn CommandRunner>> = if options.collect {
            None
        } else {
            Some(deps.runner.clone())
        };
        let options_resolver = OptionsResolver::new(&options.repo_root, resolver_runner);

        let overrides = options.overrides.clone();
        Ok(Self {
            config,
            scenario,
            deps,
            options,
            state,
            env: std::env::vars().collect(),
            policy,
            options_resolver,
            answers_store,
            sinks,
            checkpoints,
            overrides,
            resumed,
        })
    }

    pub fn interactive(&self) -> bool {
        self.deps.prompt.is_interactive() && !self.options.non_interactive
    }

    pub(crate) fn emit(&mut self, event: WizardEvent) {
        self.sinks.emit(&event);
    }

    pub(crate) fn note(&mut self, level: MessageLevel, message: &str) {
        self.sinks.note(level, message);
    }

    pub(crate) fn ctx(&self, step_metadata: Option<&Value>) -> TemplateContext {
        let file_name = self
            .answers_store
            .as_ref()
            .and_then(|store| store.file_name());
        let file_base = file_name
            .as_deref()
            .map(|name| name.trim_end_matches(".json").to_string());
        build_template_context(TemplateContextArgs {
            state: &self.state,
            scenario: &self.scenario,
            step_metadata,
            repo_root: &self.options.repo_root,
            env: &self.env,
            answers_file_name: file_name.as_deref(),
            answers_file_base: file_base.as_deref(),
        })
    }

    /// Render a template, downgrading failures to a warning note.
    pub(crate) fn render(&mut self, template: &str, ctx: &TemplateContext) -> String {
        match self.deps.renderer.render(template, ctx) {
            Ok(rendered) => rendered,
            Err(err) => {
                self.note(
                    MessageLevel::Warning,
                    &format!("Template render failed: {err}"),
                );
                template.to_string()
            }
        }
    }

    /// Render every string leaf of a value tree.
    pub(crate) fn render_value(&mut self, value: &Value, ctx: &TemplateContext) -> Value {
        match value {
            Value::String(text) => Value::String(self.render(text, ctx)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render_value(item, ctx))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), self.render_value(item, ctx)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Run the scenario to completion. On failure the partial state is
    /// wrapped into the error after a final failed checkpoint.
    pub async fn execute(mut self) -> Result<WizardState, WizardExecutionError> {
        match self.run().await {
            Ok(()) => {
                if let Err(err) = self.sinks.close() {
                    warn!(error = %err, "sink close failed");
                }
                Ok(self.state)
            }
            Err(source) => {
                self.state.ended_at = Some(Utc::now());
                let duration_ms = (Utc::now() - self.state.started_at)
                    .num_milliseconds()
                    .max(0) as u64;
                self.emit(WizardEvent::ScenarioComplete {
                    scenario_id: self.state.scenario_id.clone(),
                    status: RunStatus::Failure,
                    completed_steps: self.state.completed_steps,
                    failed_steps: self.state.failed_steps,
                    exited_early: self.state.exited_early,
                    duration_ms,
                    at: Utc::now(),
                });
                if let Some(store) = &mut self.checkpoints {
                    if let Err(err) =
                        store.finalize(&self.state, CheckpointStatus::Failed, self.options.dry_run)
                    {
                        warn!(error = %err, "failed to write terminal checkpoint");
                    }
                }
                if let Err(err) = self.sinks.close() {
                    warn!(error = %err, "sink close failed");
                }
                Err(WizardExecutionError::new(source, self.state))
            }
        }
    }

    async fn run(&mut self) -> Result<(), ExecutionError> {
        if !self.resumed {
            self.materialize_identity();
            self.emit(WizardEvent::ScenarioStart {
                scenario_id: self.scenario.id.clone(),
                label: self.scenario.label.clone(),
                run_id: self.state.run_id.clone(),
                dry_run: self.options.dry_run,
                at: Utc::now(),
            });
        } else {
            debug!(
                run_id = self.state.run_id.as_deref().unwrap_or(""),
                flow_cursor = self.state.flow_cursor,
                step_cursor = self.state.step_cursor,
                "resuming from checkpoint"
            );
        }

        let sequence: Vec<String> = self
            .scenario
            .flow_sequence()
            .into_iter()
            .map(str::to_string)
            .collect();

        if self.state.phase == RunPhase::Scenario {
            while self.state.flow_cursor < sequence.len() {
                let flow_id = sequence[self.state.flow_cursor].clone();
                let outcome = self.run_flow(&flow_id, true).await?;
                if outcome == FlowOutcome::ExitedEarly {
                    self.state.exited_early = true;
                    break;
                }
                self.state.flow_cursor += 1;
                self.state.step_cursor = 0;
            }
            self.state.phase = RunPhase::PostRun;
            self.state.post_run_cursor = 0;
        }

        if self.state.phase == RunPhase::PostRun && !self.options.collect {
            let succeeded = self.state.is_successful();
            let hooks = self.scenario.post_run.clone();
            while self.state.post_run_cursor < hooks.len() {
                let hook = &hooks[self.state.post_run_cursor];
                if hook.when.applies(succeeded) {
                    self.state.step_cursor = 0;
                    self.run_flow(&hook.flow, false).await?;
                }
                self.state.post_run_cursor += 1;
            }
        }

        self.state.phase = RunPhase::Complete;
        let ended_at = Utc::now();
        self.state.ended_at = Some(ended_at);

        let status = if self.state.failed_steps > 0 {
            RunStatus::Warning
        } else {
            RunStatus::Success
        };
        let duration_ms = (ended_at - self.state.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self.emit(WizardEvent::ScenarioComplete {
            scenario_id: self.state.scenario_id.clone(),
            status,
            completed_steps: self.state.completed_steps,
            failed_steps: self.state.failed_steps,
            exited_early: self.state.exited_early,
            duration_ms,
            at: Utc::now(),
        });

        if let Some(store) = &mut self.answers_store {
            if let Err(err) = store.save() {
                warn!(error = %err, "failed to save persisted answers");
            }
        }

        if let Some(store) = &mut self.checkpoints {
            store
                .finalize(&self.state, CheckpointStatus::Completed, self.options.dry_run)
                .map_err(|err| ExecutionError::Checkpoint(err.to_string()))?;
        }

        if self.options.write_reports
            && !self.options.dry_run
            && !self.options.collect
            && self.state.is_successful()
        {
            let writer = AnalyticsWriter::new(&self.options.repo_root);
            if let Err(err) = writer.write_reports(&self.state) {
                warn!(error = %err, "failed to write analytics reports");
            }
        }

        Ok(())
    }

    /// Render the scenario identity into state at run start.
    fn materialize_identity(&mut self) {
        let Some(identity) = self.scenario.identity.clone() else {
            return;
        };
        let ctx = self.ctx(None);
        let segments: Vec<IdentitySegment> = identity
            .segments
            .iter()
            .map(|segment| {
                let value = segment
                    .value
                    .as_ref()
                    .map(|value| self.deps.renderer.render(value, &ctx).unwrap_or_default())
                    .unwrap_or_default();
                IdentitySegment {
                    id: segment.id.clone(),
                    value,
                    label: segment.label.clone(),
                    details: None,
                    source: segment.source.clone(),
                }
            })
            .collect();
        let slug = identity
            .slug
            .as_ref()
            .map(|slug| self.deps.renderer.render(slug, &ctx).unwrap_or_default())
            .filter(|slug| !slug.is_empty())
            .unwrap_or_else(|| {
                segments
                    .iter()
                    .map(|segment| segment.value.as_str())
                    .filter(|value| !value.is_empty())
                    .collect::<Vec<_>>()
                    .join("-")
            });
        self.state.identity = Some(Identity { slug, segments });
    }

    /// Run one flow. `track_cursor` is true only for the top-level
    /// scenario flows; nested group/iterate flows leave the cursors
    /// untouched.
    pub(crate) fn run_flow<'a>(
        &'a mut self,
        flow_id: &'a str,
        track_cursor: bool,
    ) -> Pin<Box<dyn Future<Output = Result<FlowOutcome, ExecutionError>> + Send + 'a>> {
        Box::pin(async move {
            let flow: Flow = self
                .config
                .flow(flow_id)
                .ok_or_else(|| ExecutionError::UnknownFlow(flow_id.to_string()))?
                .clone();

            let flow_started = Utc::now();
            let mut index = if track_cursor {
                self.state.step_cursor
            } else {
                0
            };
            let mut exited = false;

            while index < flow.steps.len() {
                let step = &flow.steps[index];
                if track_cursor {
                    self.state.step_cursor = index;
                }

                self.emit(WizardEvent::StepStart {
                    flow_id: flow.id.clone(),
                    step_id: step.id().to_string(),
                    step_type: step.type_name().to_string(),
                    at: Utc::now(),
                });

                let step_started = Instant::now();
                let result = self.run_step(&flow, step).await?;
                let duration_ms = step_started.elapsed().as_millis() as u64;

                let repeating = matches!(result.next, Some(NextTarget::Repeat));
                if !repeating {
                    self.state.completed_steps += 1;
                }

                self.emit(WizardEvent::StepComplete {
                    flow_id: flow.id.clone(),
                    step_id: step.id().to_string(),
                    status: result.status,
                    next: result.next.as_ref().map(|next| next.as_str().to_string()),
                    duration_ms,
                    at: Utc::now(),
                });

                let next_index = match &result.next {
                    None => index + 1,
                    Some(NextTarget::Exit) => {
                        exited = true;
                        index + 1
                    }
                    Some(NextTarget::Repeat) => index,
                    Some(NextTarget::Step(target)) => flow.step_index(target).ok_or_else(|| {
                        ExecutionError::UnknownStepTarget {
                            flow: flow.id.clone(),
                            step: step.id().to_string(),
                            target: target.clone(),
                        }
                    })?,
                };

                if track_cursor {
                    self.state.step_cursor = next_index;
                }
                self.checkpoint_step()?;

                if exited {
                    break;
                }
                index = next_index;
            }

            let flow_ended = Utc::now();
            self.state.flow_runs.push(FlowRun {
                flow_id: flow.id.clone(),
                started_at: flow_started,
                ended_at: flow_ended,
                duration_ms: (flow_ended - flow_started).num_milliseconds().max(0) as u64,
                exited_early: exited,
            });

            Ok(if exited {
                FlowOutcome::ExitedEarly
            } else {
                FlowOutcome::Completed
            })
        })
    }

    /// Flush a checkpoint and any dirty persisted answers at a step
    /// boundary.
    fn checkpoint_step(&mut self) -> Result<(), ExecutionError> {
        if let Some(store) = &mut self.answers_store {
            if let Err(err) = store.save() {
                warn!(error = %err, "failed to save persisted answers");
            }
        }
        if let Some(store) = &mut self.checkpoints {
            store
                .record_step(&self.state, self.options.dry_run)
                .map_err(|err| ExecutionError::Checkpoint(err.to_string()))?;
        }
        Ok(())
    }

    async fn run_step(&mut self, flow: &Flow, step: &Step) -> Result<StepResult, ExecutionError> {
        match step {
            Step::Prompt(prompt) => self.run_prompt(&flow.id, prompt).await,
            Step::Command(command) => self.run_command_step(&flow.id, command).await,
            Step::Message(message) => self.run_message(message),
            Step::Branch(branch) => self.run_branch(&flow.id, branch),
            Step::Group(group) => self.run_group(group).await,
            Step::Iterate(iterate) => self.run_iterate(iterate).await,
            Step::Compute(compute) => self.run_compute(compute).await,
            Step::GitWorktreeGuard(guard) => self.run_worktree_guard(guard).await,
            Step::Plugin(plugin) => self.run_plugin(&flow.id, plugin).await,
        }
    }
}
