//! The structured event vocabulary emitted by the executor and fanned out
//! to log sinks. The serialized shapes are the stable wire contract for
//! downstream consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::PolicyLevel;
use crate::step::{AnswerScope, MessageLevel, PromptMode};

/// Terminal status of a scenario, step, or command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Warning,
    Failure,
}

/// Where a prompt answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerSource {
    Override,
    Persisted,
    Default,
    Interactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WizardEvent {
    #[serde(rename = "scenario.start", rename_all = "camelCase")]
    ScenarioStart {
        scenario_id: String,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        dry_run: bool,
        at: DateTime<Utc>,
    },

    #[serde(rename = "scenario.complete", rename_all = "camelCase")]
    ScenarioComplete {
        scenario_id: String,
        status: RunStatus,
        completed_steps: u32,
        failed_steps: u32,
        exited_early: bool,
        duration_ms: u64,
        at: DateTime<Utc>,
    },

    #[serde(rename = "step.start", rename_all = "camelCase")]
    StepStart {
        flow_id: String,
        step_id: String,
        step_type: String,
        at: DateTime<Utc>,
    },

    #[serde(rename = "step.complete", rename_all = "camelCase")]
    StepComplete {
        flow_id: String,
        step_id: String,
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<String>,
        duration_ms: u64,
        at: DateTime<Utc>,
    },

    #[serde(rename = "prompt.answer", rename_all = "camelCase")]
    PromptAnswer {
        flow_id: String,
        step_id: String,
        key: String,
        value: Value,
        mode: PromptMode,
        source: AnswerSource,
        at: DateTime<Utc>,
    },

    #[serde(rename = "prompt.persistence", rename_all = "camelCase")]
    PromptPersistence {
        scenario_id: String,
        scope: AnswerScope,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
        at: DateTime<Utc>,
    },

    #[serde(rename = "branch.decision", rename_all = "camelCase")]
    BranchDecision {
        flow_id: String,
        step_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clause_index: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        when: Option<String>,
        next: String,
        used_default: bool,
        at: DateTime<Utc>,
    },

    #[serde(rename = "command.result", rename_all = "camelCase")]
    CommandResult {
        flow_id: String,
        step_id: String,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        timed_out: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
        at: DateTime<Utc>,
    },

    #[serde(rename = "policy.decision", rename_all = "camelCase")]
    PolicyDecision {
        flow_id: String,
        step_id: String,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rule_id: Option<String>,
        level: PolicyLevel,
        enforced_level: PolicyLevel,
        acknowledged: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        at: DateTime<Utc>,
    },

    #[serde(rename = "shortcut.trigger", rename_all = "camelCase")]
    ShortcutTrigger {
        flow_id: String,
        step_id: String,
        shortcut: String,
        at: DateTime<Utc>,
    },
}

impl WizardEvent {
    /// The wire discriminator, for sinks that filter by kind.
    pub fn kind(&self) -> &'static str {
        match self {
            WizardEvent::ScenarioStart { .. } => "scenario.start",
            WizardEvent::ScenarioComplete { .. } => "scenario.complete",
            WizardEvent::StepStart { .. } => "step.start",
            WizardEvent::StepComplete { .. } => "step.complete",
            WizardEvent::PromptAnswer { .. } => "prompt.answer",
            WizardEvent::PromptPersistence { .. } => "prompt.persistence",
            WizardEvent::BranchDecision { .. } => "branch.decision",
            WizardEvent::CommandResult { .. } => "command.result",
            WizardEvent::PolicyDecision { .. } => "policy.decision",
            WizardEvent::ShortcutTrigger { .. } => "shortcut.trigger",
        }
    }
}

/// A sink for the engine's event stream. Implementations must tolerate
/// being called once per event in emission order; `close` flushes.
pub trait LogSink: Send {
    fn emit(&mut self, event: &WizardEvent);

    /// Out-of-band human-facing note (recommendations, warnings).
    fn note(&mut self, level: MessageLevel, message: &str);

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A sink that collects everything in memory. Used by tests and by the
/// facade to hand the caller the full event stream.
#[derive(Debug, Default)]
pub struct CollectorSink {
    pub events: Vec<WizardEvent>,
    pub notes: Vec<(MessageLevel, String)>,
}

impl LogSink for CollectorSink {
    fn emit(&mut self, event: &WizardEvent) {
        self.events.push(event.clone());
    }

    fn note(&mut self, level: MessageLevel, message: &str) {
        self.notes.push((level, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tag_shape() {
        let event = WizardEvent::StepStart {
            flow_id: "build".into(),
            step_id: "compile".into(),
            step_type: "command".into(),
            at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value.get("type").unwrap(), "step.start");
        assert_eq!(value.get("flowId").unwrap(), "build");
        assert_eq!(value.get("stepId").unwrap(), "compile");
    }

    #[test]
    fn test_event_round_trip() {
        let event = WizardEvent::CommandResult {
            flow_id: "build".into(),
            step_id: "compile".into(),
            command: "cargo build".into(),
            name: None,
            success: true,
            exit_code: Some(0),
            duration_ms: 950,
            timed_out: false,
            stdout: Some("ok".into()),
            stderr: None,
            at: Utc::now(),
        };
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: WizardEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_kind_matches_wire_tag() {
        let event = WizardEvent::PolicyDecision {
            flow_id: "f".into(),
            step_id: "s".into(),
            command: "rm -rf target".into(),
            rule_id: Some("destructive".into()),
            level: PolicyLevel::Block,
            enforced_level: PolicyLevel::Warn,
            acknowledged: true,
            note: None,
            at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value.get("type").unwrap(), event.kind());
    }

    #[test]
    fn test_collector_sink_records_in_order() {
        let mut sink = CollectorSink::default();
        sink.emit(&WizardEvent::StepStart {
            flow_id: "f".into(),
            step_id: "a".into(),
            step_type: "message".into(),
            at: Utc::now(),
        });
        sink.note(MessageLevel::Warning, "heads up");
        assert_eq!(sink.events.len(), 1);
        assert_eq!(sink.notes[0].0, MessageLevel::Warning);
    }
}
