//! Per-file document shape and schema validation.
//!
//! Each overlay file is validated on its own; cross-file invariants
//! (duplicate ids, unknown references) are handled by the merge and lint
//! layers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use wizard_core::{
    CommandPreset, Flow, Meta, Policies, SUPPORTED_SCHEMA_VERSION, Scenario, Step,
};

use crate::error::{ComposeError, SchemaIssue};

/// A plugin registration in a file: a bare module specifier or an object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPluginEntry {
    Module(String),
    Full {
        module: String,
        #[serde(default)]
        options: Option<Value>,
    },
}

impl RawPluginEntry {
    pub fn module(&self) -> &str {
        match self {
            RawPluginEntry::Module(module) => module,
            RawPluginEntry::Full { module, .. } => module,
        }
    }

    pub fn options(&self) -> Option<&Value> {
        match self {
            RawPluginEntry::Module(_) => None,
            RawPluginEntry::Full { options, .. } => options.as_ref(),
        }
    }
}

/// The parsed shape of one config file. Sections are optional so files can
/// be thin overlays.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    #[serde(default)]
    pub meta: Option<Meta>,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub flows: IndexMap<String, Flow>,
    #[serde(default)]
    pub command_presets: IndexMap<String, CommandPreset>,
    #[serde(default)]
    pub policies: Option<Policies>,
    #[serde(default)]
    pub plugins: Vec<RawPluginEntry>,
    #[serde(default)]
    pub imports: Vec<String>,
}

/// A loaded, validated file ready for merging. Plugin entries are already
/// resolved against the filesystem.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub path: PathBuf,
    pub document: ConfigDocument,
    pub plugin_refs: Vec<wizard_core::PluginRef>,
}

/// Deserialize and validate a raw value into a `ConfigDocument`,
/// collecting every issue rather than stopping at the first.
pub fn validate_document(path: &Path, raw: &Value) -> Result<ConfigDocument, ComposeError> {
    let mut issues = Vec::new();

    let document: ConfigDocument = match serde_json::from_value(raw.clone()) {
        Ok(document) => document,
        Err(err) => {
            return Err(ComposeError::Schema {
                file_path: path.to_path_buf(),
                issues: vec![SchemaIssue {
                    path: "$".into(),
                    message: err.to_string(),
                }],
            });
        }
    };

    check_scenarios(&document.scenarios, &mut issues);
    check_flows(&document.flows, &mut issues);
    check_presets(&document.command_presets, &mut issues);

    if issues.is_empty() {
        Ok(document)
    } else {
        Err(ComposeError::Schema {
            file_path: path.to_path_buf(),
            issues,
        })
    }
}

fn check_scenarios(scenarios: &[Scenario], issues: &mut Vec<SchemaIssue>) {
    let mut seen = HashSet::new();
    for (index, scenario) in scenarios.iter().enumerate() {
        if scenario.id.is_empty() {
            issues.push(SchemaIssue {
                path: format!("scenarios.{index}.id"),
                message: "scenario id must not be empty".into(),
            });
        }
        if !seen.insert(scenario.id.clone()) {
            issues.push(SchemaIssue {
                path: format!("scenarios.{index}.id"),
                message: format!("duplicate scenario id '{}'", scenario.id),
            });
        }
    }
}

fn check_flows(flows: &IndexMap<String, Flow>, issues: &mut Vec<SchemaIssue>) {
    for (key, flow) in flows {
        if flow.id != *key {
            issues.push(SchemaIssue {
                path: format!("flows.{key}.id"),
                message: format!("flow key '{key}' does not match id '{}'", flow.id),
            });
        }
        if flow.steps.is_empty() {
            issues.push(SchemaIssue {
                path: format!("flows.{key}.steps"),
                message: "flow must declare at least one step".into(),
            });
        }
        let mut step_ids = HashSet::new();
        for (index, step) in flow.steps.iter().enumerate() {
            if !step_ids.insert(step.id().to_string()) {
                issues.push(SchemaIssue {
                    path: format!("flows.{key}.steps.{index}.id"),
                    message: format!("duplicate step id '{}' in flow '{key}'", step.id()),
                });
            }
            check_step(key, index, step, issues);
        }
    }
}

fn check_step(flow_key: &str, index: usize, step: &Step, issues: &mut Vec<SchemaIssue>) {
    let location = format!("flows.{flow_key}.steps.{index}");
    match step {
        Step::Branch(branch) => {
            if branch.branches.is_empty() {
                issues.push(SchemaIssue {
                    path: format!("{location}.branches"),
                    message: "branch step requires at least one clause".into(),
                });
            }
        }
        Step::Compute(compute) => {
            match (&compute.values, &compute.handler) {
                (Some(_), Some(_)) => issues.push(SchemaIssue {
                    path: location.clone(),
                    message: "compute step takes 'values' or 'handler', not both".into(),
                }),
                (None, None) => issues.push(SchemaIssue {
                    path: location.clone(),
                    message: "compute step requires 'values' or 'handler'".into(),
                }),
                _ => {}
            }
            if compute.handler.is_some() && compute.store_as.is_none() {
                issues.push(SchemaIssue {
                    path: format!("{location}.storeAs"),
                    message: "handler-style compute step must declare 'storeAs'".into(),
                });
            }
        }
        Step::Command(command) => {
            if command.commands.is_empty() {
                issues.push(SchemaIssue {
                    path: format!("{location}.commands"),
                    message: "command step requires at least one command".into(),
                });
            }
        }
        _ => {}
    }
}

fn check_presets(presets: &IndexMap<String, CommandPreset>, issues: &mut Vec<SchemaIssue>) {
    for (name, preset) in presets {
        if preset.preset.is_some() {
            issues.push(SchemaIssue {
                path: format!("commandPresets.{name}.preset"),
                message: "presets must not reference another preset".into(),
            });
        }
    }
}

/// Warnings that do not block loading: unsupported schema versions and
/// legacy library files kept around for older workspaces.
pub fn document_warnings(path: &Path, raw: &Value, document: &ConfigDocument) -> Vec<String> {
    let mut warnings = Vec::new();

    if let Some(meta) = &document.meta {
        if let Some(version) = meta.schema_version {
            if version != SUPPORTED_SCHEMA_VERSION {
                warnings.push(format!(
                    "{}: schemaVersion {version} is not supported (expected {SUPPORTED_SCHEMA_VERSION}); loading anyway",
                    path.display()
                ));
            }
        }
    }

    let path_text = path.to_string_lossy();
    if legacy_library_pattern().is_match(&path_text) {
        warnings.push(format!(
            "{}: legacy library wizard file; migrate it into dev-wizard-config/",
            path.display()
        ));
    }
    if path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name == "shared-maintenance.flows.yaml")
    {
        warnings.push(format!(
            "{}: shared-maintenance flows are deprecated; fold them into your scenario config",
            path.display()
        ));
    }
    if raw.to_string().contains("examples/library/scripts/") {
        warnings.push(format!(
            "{}: references examples/library/scripts/; those scripts are no longer shipped",
            path.display()
        ));
    }

    warnings
}

fn legacy_library_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"packages/dev-wizard-core/examples/library/.+\.wizard\.ya?ml$")
            .expect("legacy pattern is valid")
    })
}
