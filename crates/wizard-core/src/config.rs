//! The canonical configuration model: immutable after composition.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::CommandPreset;
use crate::policy::Policies;
use crate::step::Step;

/// The only schema version this engine understands. Other numeric versions
/// parse with a warning.
pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
}

/// When a post-run hook fires relative to overall scenario success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PostRunWhen {
    #[default]
    Always,
    OnSuccess,
    OnFailure,
}

impl PostRunWhen {
    pub fn applies(&self, succeeded: bool) -> bool {
        match self {
            PostRunWhen::Always => true,
            PostRunWhen::OnSuccess => succeeded,
            PostRunWhen::OnFailure => !succeeded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRunHook {
    pub flow: String,
    #[serde(default)]
    pub when: PostRunWhen,
}

/// One segment of a scenario identity (e.g. project, environment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySegmentConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Identity metadata attached to a scenario. `slug` and segment values are
/// template strings rendered at scenario start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<IdentitySegmentConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The base flow.
    pub flow: String,
    /// Additional flows chained after the base flow.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flows: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shortcuts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_run: Vec<PostRunHook>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityConfig>,
}

impl Scenario {
    /// The full flow sequence: base flow then chained flows.
    pub fn flow_sequence(&self) -> Vec<&str> {
        let mut sequence = vec![self.flow.as_str()];
        sequence.extend(self.flows.iter().map(String::as_str));
        sequence
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<Step>,
}

impl Flow {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.id() == id)
    }

    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.id() == id)
    }
}

/// Where a plugin registration came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRef {
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl PluginRef {
    /// Dedup key: resolved path when available, otherwise the module
    /// specifier.
    pub fn registry_key(&self) -> String {
        self.resolved_path
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.module.clone())
    }
}

/// The composed, canonical configuration. Built once per run; read-only
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub meta: Meta,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub flows: IndexMap<String, Flow>,
    #[serde(default)]
    pub command_presets: IndexMap<String, CommandPreset>,
    /// Per-preset list of the files that defined it, in load order.
    #[serde(default)]
    pub preset_sources: IndexMap<String, Vec<PathBuf>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policies: Option<Policies>,
    #[serde(default)]
    pub plugins: Vec<PluginRef>,
}

impl Config {
    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|scenario| scenario.id == id)
    }

    pub fn flow(&self, id: &str) -> Option<&Flow> {
        self.flows.get(id)
    }

    pub fn preset(&self, name: &str) -> Option<&CommandPreset> {
        self.command_presets.get(name)
    }
}
