//! Command preset lookup with source provenance.

use std::path::PathBuf;

use wizard_core::{CommandPreset, Config};

#[derive(thiserror::Error, Debug)]
pub enum PresetError {
    #[error("Unknown command preset '{0}'")]
    Unknown(String),
}

/// A preset definition frozen for callers: a cloned definition (env and
/// tags copied) plus the files that defined it, in load order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPreset {
    pub name: String,
    pub preset: CommandPreset,
    pub sources: Vec<PathBuf>,
}

/// Resolve a preset by name.
pub fn resolve_preset(config: &Config, name: &str) -> Result<ResolvedPreset, PresetError> {
    let preset = config
        .preset(name)
        .ok_or_else(|| PresetError::Unknown(name.to_string()))?;
    Ok(ResolvedPreset {
        name: name.to_string(),
        preset: preset.clone(),
        sources: config
            .preset_sources
            .get(name)
            .cloned()
            .unwrap_or_default(),
    })
}

/// All presets, in declaration order.
pub fn list_presets(config: &Config) -> Vec<ResolvedPreset> {
    config
        .command_presets
        .keys()
        .filter_map(|name| resolve_preset(config, name).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_with_presets() -> Config {
        serde_json::from_value(json!({
            "meta": {"name": "wizard", "version": "1.0.0"},
            "commandPresets": {
                "build": {"env": {"CI": "1"}, "timeoutMs": 60000, "tags": ["ci"]},
                "deploy": {"cwd": "infra"}
            },
            "presetSources": {
                "build": ["/repo/dev-wizard.config.yaml", "/repo/dev-wizard-config/local/index.yaml"]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_resolve_preset_returns_definition_and_sources() {
        let config = config_with_presets();
        let resolved = resolve_preset(&config, "build").unwrap();
        assert_eq!(resolved.preset.knobs.timeout_ms, Some(60_000));
        assert_eq!(resolved.preset.tags, vec!["ci".to_string()]);
        assert_eq!(resolved.sources.len(), 2);
    }

    #[test]
    fn test_resolve_preset_without_sources_is_empty_list() {
        let config = config_with_presets();
        let resolved = resolve_preset(&config, "deploy").unwrap();
        assert!(resolved.sources.is_empty());
    }

    #[test]
    fn test_resolve_unknown_preset_errors() {
        let config = config_with_presets();
        let err = resolve_preset(&config, "missing").unwrap_err();
        assert_eq!(err.to_string(), "Unknown command preset 'missing'");
    }

    #[test]
    fn test_list_presets_in_declaration_order() {
        let config = config_with_presets();
        let names: Vec<String> = list_presets(&config)
            .into_iter()
            .map(|preset| preset.name)
            .collect();
        assert_eq!(names, vec!["build".to_string(), "deploy".to_string()]);
    }

    #[test]
    fn test_resolved_preset_is_a_copy() {
        let config = config_with_presets();
        let mut resolved = resolve_preset(&config, "build").unwrap();
        resolved
            .preset
            .knobs
            .env
            .insert("EXTRA".into(), "1".into());
        // The config definition is untouched.
        assert!(!config.preset("build").unwrap().knobs.env.contains_key("EXTRA"));
    }
}
