//! Engine error surface. `ExecutionError` is the internal cause;
//! `WizardExecutionError` is what callers see: the cause plus the
//! partial state captured at the moment of failure.

use wizard_core::{PromptError, WizardState};

#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("Unknown scenario '{0}'")]
    UnknownScenario(String),

    #[error("Unknown flow '{0}'")]
    UnknownFlow(String),

    #[error("Step '{step}' in flow '{flow}' jumps to unknown step '{target}'")]
    UnknownStepTarget {
        flow: String,
        step: String,
        target: String,
    },

    #[error("Unknown command preset '{0}'")]
    UnknownPreset(String),

    #[error("Command '{command}' blocked by policy rule '{rule_id}'")]
    PolicyBlocked { rule_id: String, command: String },

    #[error("Prompt cancelled")]
    PromptCancelled,

    #[error("Prompt driver failed: {0}")]
    Prompt(#[from] PromptError),

    #[error("Prompt '{step}' failed validation: {message}")]
    PromptValidation { step: String, message: String },

    #[error("Command step '{0}' is not collect-safe")]
    CollectUnsafeCommand(String),

    #[error("Dynamic command options are forbidden in the collect phase (step '{0}')")]
    CollectDynamicCommand(String),

    #[error("Compute handler '{0}' is not registered")]
    ComputeHandlerMissing(String),

    #[error("Compute step '{0}' produced a non-object result with no storeAs")]
    ComputeResultNotObject(String),

    #[error("Compute handler '{handler}' failed: {message}")]
    ComputeFailed { handler: String, message: String },

    #[error("No plugin handler registered for step type '{0}'")]
    UnknownPluginType(String),

    #[error("Plugin step '{step}' failed: {message}")]
    PluginFailed { step: String, message: String },

    #[error("Worktree guard '{step}' failed: {message}")]
    GuardFailed { step: String, message: String },

    #[error("Dirty worktree and no recovery strategy available (step '{0}')")]
    GuardNoStrategy(String),

    #[error("Checkpoint failure: {0}")]
    Checkpoint(String),

    #[error("{0}")]
    Internal(String),
}

/// The terminal error: the cause plus the state at failure time, so
/// callers can inspect or persist what happened up to that point.
#[derive(Debug)]
pub struct WizardExecutionError {
    pub source: ExecutionError,
    pub state: Box<WizardState>,
}

impl WizardExecutionError {
    pub fn new(source: ExecutionError, state: WizardState) -> Self {
        Self {
            source,
            state: Box::new(state),
        }
    }
}

impl std::fmt::Display for WizardExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Scenario '{}' failed: {}",
            self.state.scenario_id, self.source
        )
    }
}

impl std::error::Error for WizardExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
