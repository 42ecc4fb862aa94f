//! Error types shared across the collaborator traits.

/// Template rendering failure.
#[derive(thiserror::Error, Debug)]
pub enum TemplateError {
    #[error("Template syntax error: {0}")]
    Syntax(String),

    #[error("Template render failed: {0}")]
    Render(String),
}

/// Expression evaluation failure.
#[derive(thiserror::Error, Debug)]
pub enum EvalError {
    #[error("Expression syntax error in '{expression}': {message}")]
    Syntax { expression: String, message: String },

    #[error("Expression evaluation failed: {0}")]
    Eval(String),
}

/// Prompt driver failure.
#[derive(thiserror::Error, Debug)]
pub enum PromptError {
    /// The user cancelled the prompt (Ctrl+C or driver-level abort).
    #[error("Prompt cancelled")]
    Cancelled,

    /// Prompting is impossible in the current context (no TTY, driver closed).
    #[error("Prompt unavailable: {0}")]
    Unavailable(String),

    #[error("Prompt driver failed: {0}")]
    Driver(String),
}

/// Command runner failure. Non-zero exits and timeouts are NOT errors here;
/// they come back as a `CommandOutcome`. This covers spawn/IO breakage only.
#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("Failed to spawn command '{command}': {message}")]
    Spawn { command: String, message: String },

    #[error("Command IO failed: {0}")]
    Io(String),
}

/// Plugin handler failure.
#[derive(thiserror::Error, Debug)]
pub enum PluginError {
    #[error("No plugin handler registered for step type '{0}'")]
    UnknownType(String),

    #[error("Plugin handler for '{step_type}' failed: {message}")]
    Handler { step_type: String, message: String },
}
