use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("Option provider command failed: {command} ({message})")]
    Command { command: String, message: String },

    #[error("Command option provider is unavailable in this context")]
    CommandUnavailable,

    #[error("Failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("JSON pointer '{pointer}' not found in {path}")]
    PointerNotFound { path: PathBuf, pointer: String },

    #[error("Invalid glob pattern '{pattern}': {message}")]
    Glob { pattern: String, message: String },
}
