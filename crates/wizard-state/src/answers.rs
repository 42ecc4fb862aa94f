//! Cross-run prompt answer persistence at
//! `<repoRoot>/.dev-wizard/answers/<scenarioId>.json`.
//!
//! Values carry over between runs of the same scenario; project-scoped
//! values carry over per project id. Saves are skipped unless something
//! actually changed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use wizard_core::{AnswerScope, AnswerStore};

use crate::sanitize::sanitize_component;

pub const ANSWERS_DIR: &str = ".dev-wizard/answers";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnswerMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scenario_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identity: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    execution: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct AnswerFile {
    #[serde(default)]
    scenario: Map<String, Value>,
    #[serde(default)]
    projects: Map<String, Value>,
    #[serde(default)]
    meta: AnswerMeta,
}

/// File-backed answer store for one scenario.
pub struct FileAnswerStore {
    path: PathBuf,
    data: AnswerFile,
    dirty: bool,
}

impl FileAnswerStore {
    /// Open (or start fresh) at the conventional path for a scenario.
    pub fn open(repo_root: &Path, scenario_id: &str) -> Self {
        let path = repo_root
            .join(ANSWERS_DIR)
            .join(format!("{}.json", sanitize_component(scenario_id)));
        Self::open_at(path, scenario_id)
    }

    /// Open with an explicit file path.
    pub fn open_at(path: PathBuf, scenario_id: &str) -> Self {
        let mut data = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<AnswerFile>(&raw) {
                Ok(data) => data,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "Corrupt answers file; starting fresh"
                    );
                    AnswerFile::default()
                }
            },
            Err(_) => AnswerFile::default(),
        };
        data.meta.scenario_id = Some(scenario_id.to_string());
        Self {
            path,
            data,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File stem without extension, exposed to templates as
    /// `answersFileBase`.
    pub fn file_base(&self) -> Option<String> {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
    }

    pub fn set_meta_identity(&mut self, identity: Value) {
        if self.data.meta.identity.as_ref() != Some(&identity) {
            self.data.meta.identity = Some(identity);
            self.dirty = true;
        }
    }

    pub fn set_meta_execution(&mut self, execution: Value) {
        if self.data.meta.execution.as_ref() != Some(&execution) {
            self.data.meta.execution = Some(execution);
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn project_map(&self, project_id: &str) -> Option<&Map<String, Value>> {
        self.data
            .projects
            .get(project_id)
            .and_then(Value::as_object)
    }
}

impl AnswerStore for FileAnswerStore {
    fn get(&self, scope: AnswerScope, key: &str, project_id: Option<&str>) -> Option<Value> {
        match scope {
            AnswerScope::Scenario => self.data.scenario.get(key).cloned(),
            AnswerScope::Project => self
                .project_map(project_id?)
                .and_then(|map| map.get(key))
                .cloned(),
        }
    }

    fn set(&mut self, scope: AnswerScope, key: &str, project_id: Option<&str>, value: Value) {
        match scope {
            AnswerScope::Scenario => {
                if self.data.scenario.get(key) == Some(&value) {
                    return;
                }
                self.data.scenario.insert(key.to_string(), value);
                self.dirty = true;
            }
            AnswerScope::Project => {
                let Some(project_id) = project_id else {
                    warn!(key, "Project-scoped answer without a project id; dropping");
                    return;
                };
                let entry = self
                    .data
                    .projects
                    .entry(project_id.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                let Some(map) = entry.as_object_mut() else {
                    return;
                };
                if map.get(key) == Some(&value) {
                    return;
                }
                map.insert(key.to_string(), value);
                self.dirty = true;
            }
        }
    }

    fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create answers directory: {}", parent.display())
            })?;
        }
        let mut body = serde_json::to_string_pretty(&self.data)
            .context("Failed to serialize answers file")?;
        body.push('\n');

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, body)
            .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to move {} into place", self.path.display()))?;
        self.dirty = false;
        Ok(())
    }

    fn reset_all_answers(&mut self) {
        self.data.scenario.clear();
        self.data.projects.clear();
        self.dirty = true;
    }

    fn file_name(&self) -> Option<String> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}
