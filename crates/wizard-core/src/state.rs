//! `WizardState`: the mutable run record owned by a single executing
//! scenario. Created at scenario start (or hydrated from a checkpoint),
//! mutated only by the executor, frozen on completion.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::policy::PolicyLevel;

/// Serialized error shape. Anything beyond name/message/stack is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorShape {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorShape {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }
}

/// One executed command, appended to `history` in start order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandExecutionRecord {
    pub flow_id: String,
    pub step_id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

/// Identity materialized for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub slug: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<IdentitySegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySegment {
    pub id: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// One `[integration][timing]` payload scraped from command stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingRun {
    pub profile: String,
    pub duration_ms: u64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingTask {
    pub task: String,
    pub runs: Vec<TimingRun>,
}

/// Aggregated integration timings attached to one command step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationTimingEntry {
    pub flow_id: String,
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_label: Option<String>,
    pub command: String,
    pub metadata: Vec<TimingTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRun {
    pub flow_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub exited_early: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRecord {
    pub flow_id: String,
    pub step_id: String,
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipRecord {
    pub flow_id: String,
    pub step_id: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A policy evaluation outcome recorded into state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecisionRecord {
    pub flow_id: String,
    pub step_id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub level: PolicyLevel,
    pub enforced_level: PolicyLevel,
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

/// The current iterate frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationState {
    pub index: usize,
    pub total: usize,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Run phase driven by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    #[default]
    Scenario,
    PostRun,
    Complete,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Scenario => write!(f, "scenario"),
            RunPhase::PostRun => write!(f, "post-run"),
            RunPhase::Complete => write!(f, "complete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardState {
    pub scenario_id: String,
    pub scenario_label: String,

    #[serde(default)]
    pub answers: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,

    #[serde(default)]
    pub history: Vec<CommandExecutionRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_command: Option<CommandExecutionRecord>,

    #[serde(default)]
    pub completed_steps: u32,

    #[serde(default)]
    pub failed_steps: u32,

    #[serde(default)]
    pub integration_timings: Vec<IntegrationTimingEntry>,

    #[serde(default)]
    pub flow_runs: Vec<FlowRun>,

    #[serde(default)]
    pub retries: Vec<RetryRecord>,

    #[serde(default)]
    pub skipped_steps: Vec<SkipRecord>,

    #[serde(default)]
    pub policy_decisions: Vec<PolicyDecisionRecord>,

    /// Auto-recovery attempts per `"flow:step"` key.
    #[serde(default)]
    pub auto_action_counts: HashMap<String, u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<IterationState>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub exited_early: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    #[serde(default)]
    pub flow_cursor: usize,

    #[serde(default)]
    pub step_cursor: usize,

    #[serde(default)]
    pub phase: RunPhase,

    #[serde(default)]
    pub post_run_cursor: usize,
}

impl WizardState {
    pub fn new(scenario_id: impl Into<String>, scenario_label: impl Into<String>) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            scenario_label: scenario_label.into(),
            answers: Map::new(),
            identity: None,
            history: Vec::new(),
            last_command: None,
            completed_steps: 0,
            failed_steps: 0,
            integration_timings: Vec::new(),
            flow_runs: Vec::new(),
            retries: Vec::new(),
            skipped_steps: Vec::new(),
            policy_decisions: Vec::new(),
            auto_action_counts: HashMap::new(),
            iteration: None,
            started_at: Utc::now(),
            ended_at: None,
            exited_early: false,
            run_id: None,
            flow_cursor: 0,
            step_cursor: 0,
            phase: RunPhase::Scenario,
            post_run_cursor: 0,
        }
    }

    /// Record a command execution: appends to history and replaces
    /// `lastCommand`.
    pub fn record_command(&mut self, record: CommandExecutionRecord) {
        self.last_command = Some(record.clone());
        self.history.push(record);
    }

    /// Bump and return the auto-recovery attempt count for a step.
    pub fn next_auto_attempt(&mut self, flow_id: &str, step_id: &str) -> u32 {
        let key = format!("{flow_id}:{step_id}");
        let count = self.auto_action_counts.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    pub fn auto_attempts(&self, flow_id: &str, step_id: &str) -> u32 {
        self.auto_action_counts
            .get(&format!("{flow_id}:{step_id}"))
            .copied()
            .unwrap_or(0)
    }

    /// Whether the run has seen no failed steps so far.
    pub fn is_successful(&self) -> bool {
        self.failed_steps == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> CommandExecutionRecord {
        CommandExecutionRecord {
            flow_id: "build".into(),
            step_id: "compile".into(),
            command: "cargo build".into(),
            name: None,
            cwd: None,
            success: true,
            exit_code: Some(0),
            duration_ms: 1200,
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            stdout: None,
            stderr: None,
            timed_out: false,
            error: None,
        }
    }

    #[test]
    fn test_record_command_updates_history_and_last() {
        let mut state = WizardState::new("release", "Cut a release");
        state.record_command(sample_record());
        assert_eq!(state.history.len(), 1);
        assert_eq!(
            state.last_command.as_ref().unwrap().command,
            "cargo build"
        );
    }

    #[test]
    fn test_auto_attempt_counter_increments_per_step() {
        let mut state = WizardState::new("release", "Cut a release");
        assert_eq!(state.auto_attempts("build", "compile"), 0);
        assert_eq!(state.next_auto_attempt("build", "compile"), 1);
        assert_eq!(state.next_auto_attempt("build", "compile"), 2);
        assert_eq!(state.next_auto_attempt("build", "lint"), 1);
        assert_eq!(state.auto_attempts("build", "compile"), 2);
    }

    #[test]
    fn test_state_json_round_trip() {
        let mut state = WizardState::new("release", "Cut a release");
        state.answers.insert("name".into(), Value::String("demo".into()));
        state.record_command(sample_record());
        state.policy_decisions.push(PolicyDecisionRecord {
            flow_id: "build".into(),
            step_id: "compile".into(),
            command: "cargo build".into(),
            rule_id: None,
            level: PolicyLevel::Allow,
            enforced_level: PolicyLevel::Allow,
            acknowledged: false,
            note: None,
            at: Utc::now(),
        });
        state.run_id = Some("20260801-101500-release".into());

        let encoded = serde_json::to_string_pretty(&state).unwrap();
        let decoded: WizardState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_state_serializes_camel_case_cursors() {
        let state = WizardState::new("release", "Cut a release");
        let value = serde_json::to_value(&state).unwrap();
        assert!(value.get("flowCursor").is_some());
        assert!(value.get("stepCursor").is_some());
        assert!(value.get("postRunCursor").is_some());
        assert_eq!(value.get("phase").unwrap(), "scenario");
    }

    #[test]
    fn test_run_phase_display() {
        assert_eq!(RunPhase::Scenario.to_string(), "scenario");
        assert_eq!(RunPhase::PostRun.to_string(), "post-run");
        assert_eq!(RunPhase::Complete.to_string(), "complete");
    }

    #[test]
    fn test_error_shape_round_trip() {
        let shape = ErrorShape {
            name: "CommandError".into(),
            message: "exit code 1".into(),
            stack: Some("at run (engine)".into()),
        };
        let encoded = serde_json::to_string(&shape).unwrap();
        let decoded: ErrorShape = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, shape);
    }
}
