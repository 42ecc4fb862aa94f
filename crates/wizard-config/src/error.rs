//! Composer error surface.

use std::path::PathBuf;

/// One path-qualified problem inside a config document.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaIssue {
    /// Dotted location inside the document (`flows.build.steps.0`).
    pub path: String,
    pub message: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ComposeError {
    #[error("Config discovery failed:\n{}", errors.join("\n"))]
    Discovery { errors: Vec<String> },

    #[error("Failed to read config file {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Schema violation in {file_path}:\n{}", issues.iter().map(|issue| format!("  {}: {}", issue.path, issue.message)).collect::<Vec<_>>().join("\n"))]
    Schema {
        file_path: PathBuf,
        issues: Vec<SchemaIssue>,
    },

    #[error("Circular import: {}", stack.iter().map(|path| path.display().to_string()).collect::<Vec<_>>().join(" -> "))]
    ImportCycle { stack: Vec<PathBuf> },

    #[error("Cannot resolve import '{specifier}' from {from}")]
    ImportNotFound { specifier: String, from: PathBuf },

    #[error("Duplicate scenario id '{id}' (defined in {first} and {second})")]
    DuplicateScenario {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Duplicate flow id '{id}' (defined in {first} and {second})")]
    DuplicateFlow {
        id: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Conflicting definitions for command preset '{name}' (first in {first}, conflicting in {second})")]
    PresetConflict {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Cannot resolve plugin module '{module}' (registered in {source_path})")]
    UnknownPluginModule { module: String, source_path: PathBuf },

    #[error("No config file provided a 'meta' block")]
    MissingMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_lists_issues() {
        let err = ComposeError::Schema {
            file_path: PathBuf::from("/repo/dev-wizard.config.yaml"),
            issues: vec![
                SchemaIssue {
                    path: "flows.build".into(),
                    message: "flow key 'build' does not match id 'compile'".into(),
                },
                SchemaIssue {
                    path: "scenarios.0.flow".into(),
                    message: "missing field".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("dev-wizard.config.yaml"));
        assert!(text.contains("flows.build"));
        assert!(text.contains("scenarios.0.flow"));
    }

    #[test]
    fn test_import_cycle_lists_stack() {
        let err = ComposeError::ImportCycle {
            stack: vec![
                PathBuf::from("/a.yaml"),
                PathBuf::from("/b.yaml"),
                PathBuf::from("/a.yaml"),
            ],
        };
        assert_eq!(err.to_string(), "Circular import: /a.yaml -> /b.yaml -> /a.yaml");
    }
}
