//! The programmatic surface: load a config, describe it, plan a
//! scenario, execute one, and work with checkpoints. There is no CLI in
//! this crate; frontends sit on top of these calls.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use wizard_config::{
    ComposeError, ComposeOptions, ComposeOutcome, LintIssue, compose, lint_config,
};
use wizard_core::{AnswerStore, Config, LogSink, WizardState};
use wizard_plan::{PlanDeps, PlanError, PlanRequest, ScenarioPlan, compile_plan};
use wizard_state::{
    Checkpoint, CheckpointMetadata, CheckpointOptions, CheckpointStatus, CheckpointStore,
    FileAnswerStore, NdjsonFileSink, TelemetryFanout,
};

use crate::error::{ExecutionError, WizardExecutionError};
use crate::executor::{EngineDeps, ExecuteOptions, ScenarioExecutor};

/// Compose the canonical config for a workspace.
pub fn load_config(options: &ComposeOptions) -> Result<ComposeOutcome, ComposeError> {
    compose(options)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummary {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub flows: Vec<String>,
    pub post_run_hooks: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub id: String,
    pub step_type: String,
}

/// A structural description of a composed config plus its lint report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Description {
    pub name: String,
    pub version: String,
    pub scenarios: Vec<ScenarioSummary>,
    pub flows: Vec<FlowSummary>,
    pub presets: Vec<String>,
    pub lint: Vec<LintIssue>,
}

pub fn describe(config: &Config) -> Description {
    Description {
        name: config.meta.name.clone(),
        version: config.meta.version.clone(),
        scenarios: config
            .scenarios
            .iter()
            .map(|scenario| ScenarioSummary {
                id: scenario.id.clone(),
                label: scenario.label.clone(),
                description: scenario.description.clone(),
                tags: scenario.tags.clone(),
                flows: scenario
                    .flow_sequence()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                post_run_hooks: scenario.post_run.len(),
            })
            .collect(),
        flows: config
            .flows
            .values()
            .map(|flow| FlowSummary {
                id: flow.id.clone(),
                label: flow.label.clone(),
                steps: flow
                    .steps
                    .iter()
                    .map(|step| StepSummary {
                        id: step.id().to_string(),
                        step_type: step.type_name().to_string(),
                    })
                    .collect(),
            })
            .collect(),
        presets: config.command_presets.keys().cloned().collect(),
        lint: lint_config(config),
    }
}

/// A compiled plan plus its rendered forms.
#[derive(Debug)]
pub struct PlanOutput {
    pub plan: ScenarioPlan,
    pub pretty: String,
    pub ndjson: String,
    pub json: String,
}

pub async fn plan_scenario(
    config: &Config,
    request: &PlanRequest,
    deps: &PlanDeps<'_>,
) -> Result<PlanOutput, PlanError> {
    let plan = compile_plan(config, request, deps).await?;
    Ok(PlanOutput {
        pretty: wizard_plan::to_pretty(&plan),
        ndjson: wizard_plan::to_ndjson(&plan),
        json: wizard_plan::to_json(&plan),
        plan,
    })
}

/// Everything a run needs, bundled.
pub struct ExecutionContext {
    pub config: Arc<Config>,
    pub scenario_id: String,
    pub deps: EngineDeps,
    pub options: ExecuteOptions,
    /// Extra sinks beyond the NDJSON event log.
    pub sinks: Vec<Box<dyn LogSink>>,
    /// Defaults to the file-backed store under `.dev-wizard/answers/`.
    pub answers_store: Option<Box<dyn AnswerStore>>,
    /// When set, an NDJSON sink is attached at this path.
    pub event_log: Option<std::path::PathBuf>,
}

/// Run a scenario to completion and return the frozen state.
pub async fn execute_scenario(
    context: ExecutionContext,
) -> Result<WizardState, WizardExecutionError> {
    let ExecutionContext {
        config,
        scenario_id,
        deps,
        options,
        sinks,
        answers_store,
        event_log,
    } = context;

    let mut fanout = TelemetryFanout::new();
    for sink in sinks {
        fanout.push(sink);
    }
    if let Some(path) = event_log {
        fanout.push(Box::new(NdjsonFileSink::create(&path)));
    }

    let answers_store = answers_store.or_else(|| {
        Some(Box::new(FileAnswerStore::open(&options.repo_root, &scenario_id)) as Box<dyn AnswerStore>)
    });

    let executor = ScenarioExecutor::new(config, &scenario_id, deps, options, answers_store, fanout)
        .map_err(|err| {
            let scenario_id = scenario_id.clone();
            WizardExecutionError::new(err, WizardState::new(scenario_id.clone(), scenario_id))
        })?;
    executor.execute().await
}

/// Write a checkpoint for a state outside a running executor.
pub fn create_checkpoint(
    repo_root: &Path,
    state: &WizardState,
    status: CheckpointStatus,
    dry_run: bool,
) -> Result<(), ExecutionError> {
    let store = CheckpointStore::new(repo_root, CheckpointOptions::default());
    store
        .write(state, status, dry_run)
        .map_err(|err| ExecutionError::Checkpoint(err.to_string()))
}

pub fn load_checkpoint(repo_root: &Path, run_id: &str) -> Result<Checkpoint, ExecutionError> {
    let store = CheckpointStore::new(repo_root, CheckpointOptions::default());
    store
        .load(run_id)
        .map_err(|err| ExecutionError::Checkpoint(err.to_string()))
}

pub fn list_checkpoints(
    repo_root: &Path,
    scenario_id: Option<&str>,
) -> Result<Vec<CheckpointMetadata>, ExecutionError> {
    let store = CheckpointStore::new(repo_root, CheckpointOptions::default());
    store
        .list(scenario_id)
        .map_err(|err| ExecutionError::Checkpoint(err.to_string()))
}
