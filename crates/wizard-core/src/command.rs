//! Command descriptors, presets, and the env/knob overlay rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// When captured stdout may be stored into answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreWhen {
    #[default]
    Success,
    Failure,
    Always,
}

impl StoreWhen {
    /// Whether an outcome with the given success flag qualifies for storage.
    pub fn permits(&self, success: bool) -> bool {
        match self {
            StoreWhen::Success => success,
            StoreWhen::Failure => !success,
            StoreWhen::Always => true,
        }
    }
}

/// How a command behaves when the run is a dry run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DryRunStrategy {
    #[default]
    Skip,
    Execute,
}

/// Behavior when `parseJson` is requested and the payload is not valid JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseJsonOnError {
    #[default]
    Warn,
    Fail,
}

/// `parseJson` accepts either a bare boolean or an options object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParseJsonSpec {
    Enabled(bool),
    Options {
        #[serde(default, rename = "onError")]
        on_error: ParseJsonOnError,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reviver: Option<String>,
    },
}

impl ParseJsonSpec {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ParseJsonSpec::Enabled(false))
    }

    pub fn on_error(&self) -> ParseJsonOnError {
        match self {
            ParseJsonSpec::Enabled(_) => ParseJsonOnError::Warn,
            ParseJsonSpec::Options { on_error, .. } => *on_error,
        }
    }
}

/// The tunable knobs shared by command descriptors, step defaults, and
/// presets. Every field is optional so overlays can distinguish "unset"
/// from an explicit value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandKnobs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_fail: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_stdout: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_after_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_stdout_as: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_json: Option<ParseJsonSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_when: Option<StoreWhen>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redact_keys: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run_strategy: Option<DryRunStrategy>,
}

impl CommandKnobs {
    /// Overlay `over` onto `self`: set fields in `over` win, env maps merge
    /// key-wise with `over` winning.
    pub fn overlay(&self, over: &CommandKnobs) -> CommandKnobs {
        let mut env = self.env.clone();
        for (key, value) in &over.env {
            env.insert(key.clone(), value.clone());
        }
        CommandKnobs {
            cwd: over.cwd.clone().or_else(|| self.cwd.clone()),
            env,
            shell: over.shell.clone().or_else(|| self.shell.clone()),
            continue_on_fail: over.continue_on_fail.or(self.continue_on_fail),
            timeout_ms: over.timeout_ms.or(self.timeout_ms),
            capture_stdout: over.capture_stdout.or(self.capture_stdout),
            quiet: over.quiet.or(self.quiet),
            warn_after_ms: over.warn_after_ms.or(self.warn_after_ms),
            store_stdout_as: over
                .store_stdout_as
                .clone()
                .or_else(|| self.store_stdout_as.clone()),
            parse_json: over.parse_json.clone().or_else(|| self.parse_json.clone()),
            store_when: over.store_when.or(self.store_when),
            redact_keys: if over.redact_keys.is_empty() {
                self.redact_keys.clone()
            } else {
                over.redact_keys.clone()
            },
            dry_run_strategy: over.dry_run_strategy.or(self.dry_run_strategy),
        }
    }
}

/// A single command inside a `command` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDescriptor {
    pub run: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,

    #[serde(flatten)]
    pub knobs: CommandKnobs,
}

/// A reusable bundle of command defaults. Same knobs as a descriptor minus
/// `run`. A preset must not reference another preset; the composer rejects
/// nesting at schema time, but the field is kept so the violation can be
/// reported with its location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPreset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,

    #[serde(flatten)]
    pub knobs: CommandKnobs,
}

/// Step-level defaults for every command in the step: preset reference plus
/// inline knob overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,

    #[serde(flatten)]
    pub knobs: CommandKnobs,
}

/// The layer that last wrote an env key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvSource {
    Preset,
    Defaults,
    Command,
}

/// One entry of the env provenance diff: the effective value for `key`,
/// the value it shadowed (if any), and the narrowest layer that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvDiffEntry {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    pub source: EnvSource,
}

/// Merge env maps with last-writer-wins: preset ⊕ defaults ⊕ command.
/// Returns the effective map plus a diff entry per key.
pub fn merge_env(
    preset: &BTreeMap<String, String>,
    defaults: &BTreeMap<String, String>,
    command: &BTreeMap<String, String>,
) -> (BTreeMap<String, String>, Vec<EnvDiffEntry>) {
    let mut effective: BTreeMap<String, String> = BTreeMap::new();
    let mut owner: BTreeMap<String, (EnvSource, Option<String>)> = BTreeMap::new();

    for (layer, source) in [
        (preset, EnvSource::Preset),
        (defaults, EnvSource::Defaults),
        (command, EnvSource::Command),
    ] {
        for (key, value) in layer {
            let previous = effective.insert(key.clone(), value.clone());
            owner.insert(key.clone(), (source, previous));
        }
    }

    let diff = effective
        .iter()
        .map(|(key, value)| {
            let (source, previous) = owner
                .get(key)
                .cloned()
                .unwrap_or((EnvSource::Command, None));
            EnvDiffEntry {
                key: key.clone(),
                value: value.clone(),
                previous,
                source,
            }
        })
        .collect();

    (effective, diff)
}

/// A fully materialized command: descriptor overlaid on step defaults and
/// the resolved preset, with env provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedCommand {
    pub run: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    pub knobs: CommandKnobs,
    pub env: BTreeMap<String, String>,
    pub env_diff: Vec<EnvDiffEntry>,
}

/// Resolve one descriptor against its step defaults and preset definition.
/// The caller looks up `preset` (descriptor's own reference wins over the
/// defaults' reference) and passes the definition here.
pub fn resolve_command(
    descriptor: &CommandDescriptor,
    defaults: Option<&CommandDefaults>,
    preset_name: Option<&str>,
    preset: Option<&CommandPreset>,
) -> ResolvedCommand {
    let preset_knobs = preset.map(|p| p.knobs.clone()).unwrap_or_default();
    let default_knobs = defaults.map(|d| d.knobs.clone()).unwrap_or_default();

    let empty = BTreeMap::new();
    let (env, env_diff) = merge_env(
        preset.map(|p| &p.knobs.env).unwrap_or(&empty),
        defaults.map(|d| &d.knobs.env).unwrap_or(&empty),
        &descriptor.knobs.env,
    );

    let mut knobs = preset_knobs
        .overlay(&default_knobs)
        .overlay(&descriptor.knobs);
    knobs.env = env.clone();

    ResolvedCommand {
        run: descriptor.run.clone(),
        name: descriptor.name.clone(),
        preset: preset_name.map(|s| s.to_string()),
        knobs,
        env,
        env_diff,
    }
}
