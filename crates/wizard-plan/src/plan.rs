//! The materialized plan model: what a scenario will do, resolved without
//! side effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use wizard_core::{AnswerSource, EnvDiffEntry, MessageLevel, PromptOption};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetMode {
    #[default]
    DryRun,
    Live,
}

/// Expansion preferences; all default to false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPreferences {
    #[serde(default)]
    pub expand_env: bool,
    #[serde(default)]
    pub expand_templates: bool,
    #[serde(default)]
    pub expand_branches: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioPlan {
    pub scenario_id: String,
    pub label: String,
    pub target_mode: TargetMode,
    pub preferences: PlanPreferences,
    /// Override keys actually consumed by a prompt during compilation.
    pub overrides_consumed: Vec<String>,
    pub pending_prompt_count: u32,
    pub flows: Vec<FlowPlan>,
    pub warnings: Vec<String>,
    pub events: Vec<PlanEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowPlan {
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub steps: Vec<StepPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StepPlan {
    Prompt(PromptPlan),
    Command(CommandStepPlan),
    Message(MessagePlan),
    Branch(BranchPlan),
    Group(GroupPlan),
    Iterate(IteratePlan),
    Compute(ComputePlan),
    Guard(GuardPlan),
    Plugin(PluginPlan),
}

impl StepPlan {
    pub fn step_id(&self) -> &str {
        match self {
            StepPlan::Prompt(plan) => &plan.step_id,
            StepPlan::Command(plan) => &plan.step_id,
            StepPlan::Message(plan) => &plan.step_id,
            StepPlan::Branch(plan) => &plan.step_id,
            StepPlan::Group(plan) => &plan.step_id,
            StepPlan::Iterate(plan) => &plan.step_id,
            StepPlan::Compute(plan) => &plan.step_id,
            StepPlan::Guard(plan) => &plan.step_id,
            StepPlan::Plugin(plan) => &plan.step_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptPlan {
    pub step_id: String,
    /// The answers key the prompt writes.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<AnswerSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<PromptOption>,
    /// Set when a command provider backs the options; the list above is
    /// not resolved at plan time.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub options_preview_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStepPlan {
    pub step_id: String,
    pub commands: Vec<CommandPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPlan {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_diff: Vec<EnvDiffEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePlan {
    pub step_id: String,
    pub level: MessageLevel,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchPlan {
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clause_index: Option<usize>,
    pub used_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPlan {
    pub step_id: String,
    pub flow: FlowPlan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IteratePlan {
    pub step_id: String,
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputePlan {
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stored_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardPlan {
    pub step_id: String,
    /// None when the probe could not run (not a git repo, git missing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginPlan {
    pub step_id: String,
    pub step_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Value>,
}

/// The ordered event stream paralleling the plan structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlanEvent {
    #[serde(rename = "plan.meta", rename_all = "camelCase")]
    Meta {
        scenario_id: String,
        label: String,
        target_mode: TargetMode,
        at: DateTime<Utc>,
    },
    #[serde(rename = "plan.flow", rename_all = "camelCase")]
    Flow {
        flow_id: String,
        at: DateTime<Utc>,
    },
    #[serde(rename = "plan.step", rename_all = "camelCase")]
    Step {
        flow_id: String,
        step_id: String,
        step_type: String,
        at: DateTime<Utc>,
    },
    #[serde(rename = "plan.command", rename_all = "camelCase")]
    Command {
        flow_id: String,
        step_id: String,
        command: String,
        at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_event_wire_tags() {
        let event = PlanEvent::Step {
            flow_id: "build".into(),
            step_id: "compile".into(),
            step_type: "command".into(),
            at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value.get("type").unwrap(), "plan.step");
        assert_eq!(value.get("flowId").unwrap(), "build");
    }

    #[test]
    fn test_target_mode_defaults_to_dry_run() {
        assert_eq!(TargetMode::default(), TargetMode::DryRun);
        let parsed: TargetMode = serde_json::from_str(r#""dry-run""#).unwrap();
        assert_eq!(parsed, TargetMode::DryRun);
    }

    #[test]
    fn test_preferences_default_false() {
        let preferences: PlanPreferences = serde_json::from_str("{}").unwrap();
        assert!(!preferences.expand_env);
        assert!(!preferences.expand_templates);
        assert!(!preferences.expand_branches);
    }

    #[test]
    fn test_step_plan_tagging() {
        let plan = StepPlan::Message(MessagePlan {
            step_id: "hello".into(),
            level: MessageLevel::Info,
            text: "hi".into(),
        });
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value.get("kind").unwrap(), "message");
        assert_eq!(plan.step_id(), "hello");
    }
}
