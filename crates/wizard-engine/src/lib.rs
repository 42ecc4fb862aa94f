//! The execution engine: a step-level state machine over composed
//! configs, plus the programmatic facade.

pub mod api;
pub mod error;
pub mod executor;
pub mod steps;
pub mod timings;

pub use api::{
    Description, ExecutionContext, PlanOutput, describe, execute_scenario, list_checkpoints,
    load_checkpoint, load_config, plan_scenario,
};
pub use error::{ExecutionError, WizardExecutionError};
pub use executor::{EngineDeps, ExecuteOptions, ScenarioExecutor, StepResult};
pub use steps::{DEFAULT_STRATEGY_KEY, PROJECT_ID_KEY};


#[cfg(test)]
#[path = "executor_tests_recovery.rs"]
mod executor_tests_recovery;
