//! Side-effect-free plan compilation for scenarios.

pub mod compiler;
pub mod format;
pub mod plan;

pub use compiler::{
    DEFAULT_STRATEGY_KEY, PROJECT_ID_KEY, PlanDeps, PlanError, PlanRequest, compile_plan,
};
pub use format::{to_json, to_ndjson, to_pretty};
pub use plan::{
    BranchPlan, CommandPlan, CommandStepPlan, ComputePlan, FlowPlan, GroupPlan, GuardPlan,
    IteratePlan, MessagePlan, PlanEvent, PlanPreferences, PluginPlan, PromptPlan, ScenarioPlan,
    StepPlan, TargetMode,
};
