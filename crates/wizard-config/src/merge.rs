//! Deterministic merge of loaded documents, base → overlays.
//!
//! Scenarios append (duplicate id fails), flows union (duplicate id
//! fails), presets first-wins (identical duplicates warn, conflicts
//! fail), plugins first-wins, and preset provenance tracks every defining
//! file.

use std::collections::HashMap;
use std::path::PathBuf;

use indexmap::IndexMap;

use wizard_core::{Config, Policies, PolicyLevel};

use crate::document::LoadedDocument;
use crate::error::ComposeError;

#[derive(Debug)]
pub struct MergeOutcome {
    pub config: Config,
    pub warnings: Vec<String>,
}

pub fn merge_documents(documents: &[LoadedDocument]) -> Result<MergeOutcome, ComposeError> {
    let mut warnings = Vec::new();

    let mut meta = None;
    let mut scenarios = Vec::new();
    let mut scenario_origin: HashMap<String, PathBuf> = HashMap::new();
    let mut flows = IndexMap::new();
    let mut flow_origin: HashMap<String, PathBuf> = HashMap::new();
    let mut command_presets = IndexMap::new();
    let mut preset_sources: IndexMap<String, Vec<PathBuf>> = IndexMap::new();
    let mut policies: Option<Policies> = None;
    let mut plugins = Vec::new();
    let mut plugin_keys: HashMap<String, PathBuf> = HashMap::new();

    for loaded in documents {
        let path = &loaded.path;
        let document = &loaded.document;

        if meta.is_none() {
            meta = document.meta.clone();
        }

        for scenario in &document.scenarios {
            if let Some(first) = scenario_origin.get(&scenario.id) {
                return Err(ComposeError::DuplicateScenario {
                    id: scenario.id.clone(),
                    first: first.clone(),
                    second: path.clone(),
                });
            }
            scenario_origin.insert(scenario.id.clone(), path.clone());
            scenarios.push(scenario.clone());
        }

        for (id, flow) in &document.flows {
            if let Some(first) = flow_origin.get(id) {
                return Err(ComposeError::DuplicateFlow {
                    id: id.clone(),
                    first: first.clone(),
                    second: path.clone(),
                });
            }
            flow_origin.insert(id.clone(), path.clone());
            flows.insert(id.clone(), flow.clone());
        }

        for (name, preset) in &document.command_presets {
            let sources = preset_sources.entry(name.clone()).or_default();
            sources.push(path.clone());
            match command_presets.get(name) {
                None => {
                    command_presets.insert(name.clone(), preset.clone());
                }
                Some(existing) if existing == preset => {
                    warnings.push(format!(
                        "Command preset '{name}' defined identically in multiple files: {}",
                        sources
                            .iter()
                            .map(|source| source.display().to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ));
                }
                Some(_) => {
                    return Err(ComposeError::PresetConflict {
                        name: name.clone(),
                        first: sources[0].clone(),
                        second: path.clone(),
                    });
                }
            }
        }

        if let Some(document_policies) = &document.policies {
            match &mut policies {
                None => policies = Some(document_policies.clone()),
                Some(merged) => {
                    // First defaultLevel wins; overlay rules append in order.
                    if merged.default_level == PolicyLevel::Allow
                        && document_policies.default_level != PolicyLevel::Allow
                        && merged.rules.is_empty()
                    {
                        merged.default_level = document_policies.default_level;
                    }
                    merged.rules.extend(document_policies.rules.iter().cloned());
                }
            }
        }

        for plugin in &loaded.plugin_refs {
            let key = plugin.registry_key();
            if let Some(first) = plugin_keys.get(&key) {
                warnings.push(format!(
                    "Plugin '{}' already registered by {}; ignoring registration in {}",
                    plugin.module,
                    first.display(),
                    path.display()
                ));
                continue;
            }
            plugin_keys.insert(key, path.clone());
            plugins.push(plugin.clone());
        }
    }

    let meta = meta.ok_or(ComposeError::MissingMeta)?;

    Ok(MergeOutcome {
        config: Config {
            meta,
            scenarios,
            flows,
            command_presets,
            preset_sources,
            policies,
            plugins,
        },
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::validate_document;
    use serde_json::json;
    use std::path::Path;

    fn loaded(path: &str, value: serde_json::Value) -> LoadedDocument {
        let document = validate_document(Path::new(path), &value).unwrap();
        LoadedDocument {
            path: PathBuf::from(path),
            document,
            plugin_refs: Vec::new(),
        }
    }

    fn base() -> LoadedDocument {
        loaded(
            "/repo/base.yaml",
            json!({
                "meta": {"name": "demo", "version": "1.0.0"},
                "scenarios": [{"id": "release", "label": "Release", "flow": "build"}],
                "flows": {
                    "build": {
                        "id": "build",
                        "steps": [{"type": "message", "id": "hi", "text": "hi"}]
                    }
                },
                "commandPresets": {"ci": {"env": {"CI": "1"}}}
            }),
        )
    }

    #[test]
    fn test_merge_single_document() {
        let outcome = merge_documents(&[base()]).unwrap();
        assert_eq!(outcome.config.meta.name, "demo");
        assert_eq!(outcome.config.scenarios.len(), 1);
        assert!(outcome.warnings.is_empty());
        assert_eq!(
            outcome.config.preset_sources.get("ci").unwrap(),
            &vec![PathBuf::from("/repo/base.yaml")]
        );
    }

    #[test]
    fn test_scenarios_append_across_files() {
        let overlay = loaded(
            "/repo/overlay.yaml",
            json!({
                "scenarios": [{"id": "hotfix", "label": "Hotfix", "flow": "build"}]
            }),
        );
        let outcome = merge_documents(&[base(), overlay]).unwrap();
        let ids: Vec<&str> = outcome
            .config
            .scenarios
            .iter()
            .map(|scenario| scenario.id.as_str())
            .collect();
        assert_eq!(ids, vec!["release", "hotfix"]);
    }

    #[test]
    fn test_duplicate_scenario_across_files_fails() {
        let overlay = loaded(
            "/repo/overlay.yaml",
            json!({
                "scenarios": [{"id": "release", "label": "Again", "flow": "build"}]
            }),
        );
        let err = merge_documents(&[base(), overlay]).unwrap_err();
        assert!(matches!(err, ComposeError::DuplicateScenario { .. }));
    }

    #[test]
    fn test_duplicate_flow_across_files_fails() {
        let overlay = loaded(
            "/repo/overlay.yaml",
            json!({
                "flows": {
                    "build": {
                        "id": "build",
                        "steps": [{"type": "message", "id": "other", "text": "x"}]
                    }
                }
            }),
        );
        let err = merge_documents(&[base(), overlay]).unwrap_err();
        assert!(matches!(err, ComposeError::DuplicateFlow { .. }));
    }

    #[test]
    fn test_identical_preset_duplicate_warns_and_keeps_first() {
        let overlay = loaded(
            "/repo/overlay.yaml",
            json!({"commandPresets": {"ci": {"env": {"CI": "1"}}}}),
        );
        let outcome = merge_documents(&[base(), overlay]).unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("ci"));
        assert_eq!(
            outcome.config.preset_sources.get("ci").unwrap().len(),
            2,
            "provenance keeps every defining file"
        );
    }

    #[test]
    fn test_conflicting_preset_duplicate_fails() {
        let overlay = loaded(
            "/repo/overlay.yaml",
            json!({"commandPresets": {"ci": {"env": {"CI": "0"}}}}),
        );
        let err = merge_documents(&[base(), overlay]).unwrap_err();
        assert!(matches!(err, ComposeError::PresetConflict { .. }));
    }

    #[test]
    fn test_plugin_first_registration_wins() {
        let mut first = base();
        first.plugin_refs.push(wizard_core::PluginRef {
            module: "wizard-plugin-docker".into(),
            resolved_path: Some(PathBuf::from("/repo/node_modules/wizard-plugin-docker/index.js")),
            options: None,
            source: Some(PathBuf::from("/repo/base.yaml")),
        });
        let mut second = loaded("/repo/overlay.yaml", json!({}));
        second.plugin_refs.push(wizard_core::PluginRef {
            module: "wizard-plugin-docker".into(),
            resolved_path: Some(PathBuf::from("/repo/node_modules/wizard-plugin-docker/index.js")),
            options: Some(json!({"replaced": true})),
            source: Some(PathBuf::from("/repo/overlay.yaml")),
        });

        let outcome = merge_documents(&[first, second]).unwrap();
        assert_eq!(outcome.config.plugins.len(), 1);
        assert!(outcome.config.plugins[0].options.is_none());
        assert!(outcome.warnings.iter().any(|warning| warning.contains("already registered")));
    }

    #[test]
    fn test_missing_meta_fails() {
        let no_meta = loaded("/repo/only.yaml", json!({}));
        let err = merge_documents(&[no_meta]).unwrap_err();
        assert!(matches!(err, ComposeError::MissingMeta));
    }

    #[test]
    fn test_policy_rules_append_in_load_order() {
        let mut first = base();
        first.document.policies = Some(
            serde_json::from_value(json!({
                "defaultLevel": "warn",
                "rules": [{"id": "a", "level": "warn", "match": {}}]
            }))
            .unwrap(),
        );
        let mut second = loaded("/repo/overlay.yaml", json!({}));
        second.document.policies = Some(
            serde_json::from_value(json!({
                "rules": [{"id": "b", "level": "block", "match": {}}]
            }))
            .unwrap(),
        );

        let outcome = merge_documents(&[first, second]).unwrap();
        let policies = outcome.config.policies.unwrap();
        assert_eq!(policies.default_level, PolicyLevel::Warn);
        let ids: Vec<&str> = policies.rules.iter().map(|rule| rule.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
