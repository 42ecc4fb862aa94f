//! The plan compiler: a dry, side-effect-free traversal of a scenario.
//!
//! The compiler simulates just enough of the executor (synthetic command
//! history, answer resolution, symbolic branch evaluation, compute
//! merging) that downstream steps see the state they would at runtime.
//! It never spawns commands, never prompts, never writes files. Runtime
//! impossibilities become warnings, not errors.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::debug;

use wizard_core::{
    AnswerScope, AnswerSource, AnswerStore, CommandExecutionRecord, ComputeRegistry, Config,
    DynamicSource, ExpressionEvaluator, IterateSource, IterateStep, PluginInvocation,
    PluginRegistry, PromptStep, Scenario, Step, TemplateContext, TemplateContextArgs,
    TemplateRenderer, WizardState, WorktreeGuardStep, build_template_context, is_truthy,
    normalize_item_list, resolve_command,
};
use wizard_options::OptionsResolver;
use wizard_policy::resolve_preset;

use crate::plan::{
    BranchPlan, CommandPlan, CommandStepPlan, ComputePlan, FlowPlan, GroupPlan, GuardPlan,
    IteratePlan, MessagePlan, PlanEvent, PlanPreferences, PluginPlan, PromptPlan, ScenarioPlan,
    StepPlan, TargetMode,
};

/// The default answers key a guard stores its chosen strategy under.
pub const DEFAULT_STRATEGY_KEY: &str = "worktreeStrategy";

/// The answers key naming the current project for project-scoped
/// persistence.
pub const PROJECT_ID_KEY: &str = "projectId";

#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    #[error("Unknown scenario '{0}'")]
    UnknownScenario(String),
}

/// External collaborators the compiler may consult. Everything is
/// optional except rendering and evaluation.
pub struct PlanDeps<'a> {
    pub renderer: &'a dyn TemplateRenderer,
    pub evaluator: &'a dyn ExpressionEvaluator,
    pub options: &'a OptionsResolver,
    pub answers: Option<&'a dyn AnswerStore>,
    pub compute: Option<&'a ComputeRegistry>,
    pub plugins: Option<&'a PluginRegistry>,
}

#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub scenario_id: String,
    pub overrides: Map<String, Value>,
    pub repo_root: PathBuf,
    pub target_mode: TargetMode,
    pub preferences: PlanPreferences,
    pub apply_persisted_answers: bool,
}

impl PlanRequest {
    pub fn new(scenario_id: impl Into<String>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            overrides: Map::new(),
            repo_root: repo_root.into(),
            target_mode: TargetMode::DryRun,
            preferences: PlanPreferences::default(),
            apply_persisted_answers: true,
        }
    }
}

/// Compile a scenario into a fully materialized plan.
pub async fn compile_plan(
    config: &Config,
    request: &PlanRequest,
    deps: &PlanDeps<'_>,
) -> Result<ScenarioPlan, PlanError> {
    let scenario = config
        .scenario(&request.scenario_id)
        .ok_or_else(|| PlanError::UnknownScenario(request.scenario_id.clone()))?;

    let mut compiler = Compiler {
        config,
        scenario,
        deps,
        request,
        env: std::env::vars().collect(),
        state: WizardState::new(&scenario.id, &scenario.label),
        consumed: Vec::new(),
        pending: 0,
        warnings: Vec::new(),
        events: Vec::new(),
    };

    compiler.events.push(PlanEvent::Meta {
        scenario_id: scenario.id.clone(),
        label: scenario.label.clone(),
        target_mode: request.target_mode,
        at: Utc::now(),
    });

    let mut flows = Vec::new();
    for flow_id in scenario.flow_sequence() {
        if config.flow(flow_id).is_none() {
            compiler
                .warnings
                .push(format!("Scenario references unknown flow '{flow_id}'"));
            continue;
        }
        flows.push(compiler.plan_flow(flow_id.to_string()).await);
    }
    debug!(scenario = %scenario.id, flows = flows.len(), "plan compiled");

    Ok(ScenarioPlan {
        scenario_id: scenario.id.clone(),
        label: scenario.label.clone(),
        target_mode: request.target_mode,
        preferences: request.preferences,
        overrides_consumed: compiler.consumed,
        pending_prompt_count: compiler.pending,
        flows,
        warnings: compiler.warnings,
        events: compiler.events,
    })
}

struct Compiler<'a> {
    config: &'a Config,
    scenario: &'a Scenario,
    deps: &'a PlanDeps<'a>,
    request: &'a PlanRequest,
    env: BTreeMap<String, String>,
    state: WizardState,
    consumed: Vec<String>,
    pending: u32,
    warnings: Vec<String>,
    events: Vec<PlanEvent>,
}

impl<'a> Compiler<'a> {
    fn ctx(&self, step_metadata: Option<&Value>) -> TemplateContext {
        build_template_context(TemplateContextArgs {
            state: &self.state,
            scenario: self.scenario,
            step_metadata,
            repo_root: &self.request.repo_root,
            env: &self.env,
            answers_file_name: None,
            answers_file_base: None,
        })
    }

    fn render(&mut self, template: &str, ctx: &TemplateContext) -> String {
        match self.deps.renderer.render(template, ctx) {
            Ok(rendered) => rendered,
            Err(err) => {
                self.warnings
                    .push(format!("Template render failed: {err}"));
                template.to_string()
            }
        }
    }

    fn evaluate(&mut self, expression: &str, ctx: &TemplateContext) -> Value {
        match self.deps.evaluator.evaluate(expression, ctx) {
            Ok(value) => value,
            Err(err) => {
                self.warnings
                    .push(format!("Expression evaluation failed: {err}"));
                Value::Null
            }
        }
    }

    /// Render every string leaf in a value tree.
    fn render_value(&mut self, value: &Value, ctx: &TemplateContext) -> Value {
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

    fn plan_flow(
        &mut self,
        flow_id: String,
    ) -> Pin<Box<dyn Future<Output = FlowPlan> + Send + '_>> {
        Box::pin(async move {
            self.events.push(PlanEvent::Flow {
                flow_id: flow_id.clone(),
                at: Utc::now(),
            });

            let Some(flow) = self.config.flow(&flow_id).cloned() else {
                self.warnings
                    .push(format!("Unknown flow '{flow_id}' cannot be planned"));
                return FlowPlan {
                    flow_id,
                    label: None,
                    steps: Vec::new(),
                };
            };

            let mut steps = Vec::new();
            for step in &flow.steps {
                self.events.push(PlanEvent::Step {
                    flow_id: flow.id.clone(),
                    step_id: step.id().to_string(),
                    step_type: step.type_name().to_string(),
                    at: Utc::now(),
                });
                steps.push(self.plan_step(&flow.id, step).await);
            }

            FlowPlan {
                flow_id: flow.id.clone(),
                label: flow.label.clone(),
                steps,
            }
        })
    }

    async fn plan_step(&mut self, flow_id: &str, step: &Step) -> StepPlan {
        match step {
            Step::Prompt(prompt) => StepPlan::Prompt(self.plan_prompt(prompt).await),
            Step::Command(command) => {
                StepPlan::Command(self.plan_command(flow_id, command))
            }
            Step::Message(message) => {
                let ctx = self.ctx(message.common.metadata.as_ref());
                StepPlan::Message(MessagePlan {
                    step_id: message.common.id.clone(),
                    level: message.level,
                    text: self.render(&message.text, &ctx),
                })
            }
            Step::Branch(branch) => {
                let ctx = self.ctx(branch.common.metadata.as_ref());
                let mut selected = None;
                let mut clause_index = None;
                for (index, clause) in branch.branches.iter().enumerate() {
                    let rendered = self.render(&clause.when, &ctx);
                    if is_truthy(&self.evaluate(&rendered, &ctx)) {
                        selected = Some(clause.next.as_str().to_string());
                        clause_index = Some(index);
                        break;
                    }
                }
                let used_default = selected.is_none() && branch.default_next.is_some();
                if selected.is_none() {
                    if let Some(default_next) = &branch.default_next {
                        selected = Some(default_next.next.as_str().to_string());
                    } else {
                        self.warnings.push(format!(
                            "Branch '{}' selects no target with the current answers",
                            branch.common.id
                        ));
                    }
                }
                StepPlan::Branch(BranchPlan {
                    step_id: branch.common.id.clone(),
                    selected,
                    clause_index,
                    used_default,
                })
            }
            Step::Group(group) => {
                let flow = self.plan_flow(group.flow.clone()).await;
                StepPlan::Group(GroupPlan {
                    step_id: group.common.id.clone(),
                    flow,
                })
            }
            Step::Iterate(iterate) => StepPlan::Iterate(self.plan_iterate(iterate).await),
            Step::Compute(compute) => {
                let ctx = self.ctx(compute.common.metadata.as_ref());
                let mut stored_keys = Vec::new();
                if let Some(values) = &compute.values {
                    for (key, value) in values {
                        let rendered = self.render_value(value, &ctx);
                        self.state.answers.insert(key.clone(), rendered);
                        stored_keys.push(key.clone());
                    }
                }
                if let Some(handler_name) = &compute.handler {
                    stored_keys
                        .extend(self.plan_compute_handler(handler_name, compute, &ctx).await);
                }
                StepPlan::Compute(ComputePlan {
                    step_id: compute.common.id.clone(),
                    stored_keys,
                })
            }
            Step::GitWorktreeGuard(guard) => StepPlan::Guard(self.plan_guard(guard)),
            Step::Plugin(plugin) => {
                let invocation = PluginInvocation {
                    flow_id: flow_id.to_string(),
                    step: plugin.clone(),
                    answers: self.state.answers.clone(),
                    repo_root: self.request.repo_root.clone(),
                    dry_run: true,
                };
                let preview = self
                    .deps
                    .plugins
                    .and_then(|registry| registry.handler(&plugin.step_type))
                    .and_then(|handler| handler.plan(&invocation));
                StepPlan::Plugin(PluginPlan {
                    step_id: plugin.common.id.clone(),
                    step_type: plugin.step_type.clone(),
                    preview,
                })
            }
        }
    }

    fn plan_command(
        &mut self,
        flow_id: &str,
        step: &wizard_core::CommandStep,
    ) -> CommandStepPlan {
        let mut commands = Vec::new();
        for descriptor in &step.commands {
            let preset_name = descriptor
                .preset
                .as_deref()
                .or(step.defaults.as_ref().and_then(|defaults| defaults.preset.as_deref()));
            let preset = match preset_name {
                Some(name) => match resolve_preset(self.config, name) {
                    Ok(resolved) => Some(resolved.preset),
                    Err(err) => {
                        self.warnings.push(err.to_string());
                        None
                    }
                },
                None => None,
            };

            let resolved = resolve_command(
                descriptor,
                step.defaults.as_ref(),
                preset_name,
                preset.as_ref(),
            );

            let ctx = self.ctx(step.common.metadata.as_ref());
            let command = self.render(&resolved.run, &ctx);
            let cwd = resolved
                .knobs
                .cwd
                .clone()
                .map(|cwd| self.render(&cwd, &ctx));

            if matches!(
                resolved.knobs.dry_run_strategy,
                Some(wizard_core::DryRunStrategy::Execute)
            ) {
                self.warnings.push(format!(
                    "live execution requested inside plan for '{command}'; refusing"
                ));
            }

            self.events.push(PlanEvent::Command {
                flow_id: flow_id.to_string(),
                step_id: step.common.id.clone(),
                command: command.clone(),
                at: Utc::now(),
            });

            // A synthetic success so downstream branches can reference
            // `lastCommand`.
            let now = Utc::now();
            self.state.record_command(CommandExecutionRecord {
                flow_id: flow_id.to_string(),
                step_id: step.common.id.clone(),
                command: command.clone(),
                name: resolved.name.clone(),
                cwd: cwd.clone(),
                success: true,
                exit_code: Some(0),
                duration_ms: 0,
                started_at: now,
                ended_at: Some(now),
                stdout: None,
                stderr: None,
                timed_out: false,
                error: None,
            });

            commands.push(CommandPlan {
                command,
                name: resolved.name.clone(),
                cwd,
                preset: resolved.preset.clone(),
                env_diff: resolved.env_diff.clone(),
                timeout_ms: resolved.knobs.timeout_ms,
            });
        }
        CommandStepPlan {
            step_id: step.common.id.clone(),
            commands,
        }
    }

    async fn plan_prompt(&mut self, step: &PromptStep) -> PromptPlan {
        let key = step.answer_key().to_string();
        let ctx = self.ctx(step.common.metadata.as_ref());

        let mut source = None;
        let mut value = None;

        if let Some(override_value) = self.request.overrides.get(&key) {
            source = Some(AnswerSource::Override);
            value = Some(override_value.clone());
            self.consumed.push(key.clone());
        } else if self.request.apply_persisted_answers {
            if let Some(store) = self.deps.answers {
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
                if let Some(persisted) = store.get(scope, &key, project_id.as_deref()) {
                    source = Some(AnswerSource::Persisted);
                    value = Some(persisted);
                }
            }
        }

        if value.is_none() {
            if let Some(default_value) = &step.default_value {
                let rendered = match default_value {
                    Value::String(text) => Value::String(self.render(text, &ctx)),
                    other => other.clone(),
                };
                source = Some(AnswerSource::Default);
                value = Some(rendered);
            }
        }

        let pending = value.is_none();
        if pending {
            self.pending += 1;
            self.warnings.push(format!(
                "Prompt '{}' has no answer source at plan time",
                step.common.id
            ));
        } else if let Some(resolved) = &value {
            self.state.answers.insert(key.clone(), resolved.clone());
        }

        let mut options = Vec::new();
        let mut options_preview_only = false;
        if let Some(static_options) = &step.options {
            for option in static_options {
                let mut normalized = option.normalize();
                normalized.label = self.render(&normalized.label, &ctx);
                if let Value::String(text) = &normalized.value {
                    normalized.value = Value::String(self.render(text, &ctx));
                }
                options.push(normalized);
            }
        }
        if let Some(dynamic) = &step.dynamic {
            if dynamic.requires_command_execution() {
                options_preview_only = true;
            } else {
                match self.deps.options.resolve_options(dynamic).await {
                    Ok(resolved) => options.extend(resolved),
                    Err(err) => self.warnings.push(format!(
                        "Option provider for prompt '{}' failed: {err}",
                        step.common.id
                    )),
                }
            }
        }

        PromptPlan {
            step_id: step.common.id.clone(),
            key,
            source,
            value,
            pending,
            options,
            options_preview_only,
        }
    }

    async fn plan_iterate(&mut self, step: &IterateStep) -> IteratePlan {
        let ctx = self.ctx(step.common.metadata.as_ref());
        let mut count = None;
        let mut note = None;

        if let Some(items) = &step.items {
            match items {
                Value::Array(values) => count = Some(values.len()),
                Value::String(template) => {
                    let rendered = self.render(template, &ctx);
                    count = Some(normalize_item_list(&rendered).len());
                }
                _ => note = Some("items must be an array or template string".to_string()),
            }
        } else if let Some(over) = &step.over {
            count = self
                .state
                .answers
                .get(over)
                .and_then(Value::as_array)
                .map(Vec::len);
            if count.is_none() {
                note = Some(format!("answers.{over} holds no array at plan time"));
            }
        } else if let Some(source) = &step.source {
            match source {
                IterateSource::Answers { key } => {
                    count = self
                        .state
                        .answers
                        .get(key)
                        .and_then(Value::as_array)
                        .map(Vec::len);
                    if count.is_none() {
                        note = Some(format!("answers.{key} holds no array at plan time"));
                    }
                }
                IterateSource::Json { path, pointer } => {
                    let dynamic = DynamicSource::Json {
                        path: path.clone(),
                        pointer: pointer.clone(),
                        map: None,
                        cache: None,
                    };
                    match self.deps.options.resolve_records(&dynamic).await {
                        Ok(records) => count = Some(records.len()),
                        Err(err) => {
                            self.warnings
                                .push(format!("Iterate '{}': {err}", step.common.id));
                            note = Some("item source unavailable".to_string());
                        }
                    }
                }
                IterateSource::Dynamic { dynamic } => {
                    if dynamic.requires_command_execution() {
                        note = Some(
                            "item count requires command execution; unknown at plan time"
                                .to_string(),
                        );
                    } else {
                        match self.deps.options.resolve_records(dynamic).await {
                            Ok(records) => count = Some(records.len()),
                            Err(err) => {
                                self.warnings
                                    .push(format!("Iterate '{}': {err}", step.common.id));
                                note = Some("item source unavailable".to_string());
                            }
                        }
                    }
                }
            }
        } else {
            note = Some("no item source declared".to_string());
        }

        IteratePlan {
            step_id: step.common.id.clone(),
            flow_id: step.flow.clone(),
            count,
            note,
        }
    }

    async fn plan_compute_handler(
        &mut self,
        handler_name: &str,
        compute: &wizard_core::ComputeStep,
        ctx: &TemplateContext,
    ) -> Vec<String> {
        let Some(registry) = self.deps.compute else {
            self.warnings.push(format!(
                "Compute handler '{handler_name}' cannot be previewed without a registry"
            ));
            return Vec::new();
        };
        let Some(handler) = registry.handler(handler_name) else {
            self.warnings
                .push(format!("Compute handler '{handler_name}' is not registered"));
            return Vec::new();
        };

        let params = compute
            .params
            .as_ref()
            .map(|params| self.render_value(params, ctx))
            .unwrap_or(Value::Null);
        match handler.compute(params).await {
            Ok(result) => {
                // Schema validation guarantees storeAs for handler computes.
                if let Some(store_as) = &compute.store_as {
                    self.state.answers.insert(store_as.clone(), result);
                    vec![store_as.clone()]
                } else {
                    Vec::new()
                }
            }
            Err(err) => {
                self.warnings
                    .push(format!("Compute handler '{handler_name}' failed: {err}"));
                Vec::new()
            }
        }
    }

    fn plan_guard(&mut self, guard: &WorktreeGuardStep) -> GuardPlan {
        let ctx = self.ctx(guard.common.metadata.as_ref());
        let cwd = guard
            .cwd
            .as_ref()
            .map(|cwd| self.request.repo_root.join(cwd))
            .unwrap_or_else(|| self.request.repo_root.clone());

        match wizard_process::worktree_status(&cwd) {
            Ok(status) if status.clean => {
                let message = guard
                    .clean_message
                    .as_ref()
                    .map(|message| self.render(message, &ctx));
                GuardPlan {
                    step_id: guard.common.id.clone(),
                    clean: Some(true),
                    strategy: None,
                    pending: false,
                    message,
                }
            }
            Ok(_) => {
                let strategy_key = guard
                    .store_strategy_as
                    .as_deref()
                    .unwrap_or(DEFAULT_STRATEGY_KEY);
                let strategy = self
                    .request
                    .overrides
                    .get(strategy_key)
                    .or_else(|| self.state.answers.get(strategy_key))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let pending = strategy.is_none();
                if pending {
                    self.pending += 1;
                }
                let message = guard
                    .dirty_message
                    .as_ref()
                    .map(|message| self.render(message, &ctx));
                GuardPlan {
                    step_id: guard.common.id.clone(),
                    clean: Some(false),
                    strategy,
                    pending,
                    message,
                }
            }
            Err(err) => {
                self.warnings.push(format!(
                    "Worktree probe failed for guard '{}': {err}",
                    guard.common.id
                ));
                GuardPlan {
                    step_id: guard.common.id.clone(),
                    clean: None,
                    strategy: None,
                    pending: false,
                    message: None,
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "compiler_tests.rs"]
mod tests;
