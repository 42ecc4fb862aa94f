//! Durable, atomic snapshots of `WizardState` under
//! `<repoRoot>/.reports/runs/<runId>/`, with batched writes and retention
//! pruning. Checkpoints let an interrupted run resume at the step after
//! the last completed one.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use wizard_core::{RunPhase, WizardState};

use crate::sanitize::sanitize_component;

pub const RUNS_DIR: &str = ".reports/runs";
const STATE_FILE: &str = "state.json";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Running,
    Completed,
    Failed,
}

/// The sidecar record describing one run directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMetadata {
    pub id: String,
    pub scenario_id: String,
    pub scenario_label: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: CheckpointStatus,
    pub dry_run: bool,
    pub flow_cursor: usize,
    pub step_cursor: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<RunPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_run_cursor: Option<usize>,
}

/// A loaded checkpoint: the full state plus its metadata.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub state: WizardState,
    pub metadata: CheckpointMetadata,
}

#[derive(Debug, Clone)]
pub struct CheckpointOptions {
    /// Completed/failed runs kept per scenario beyond the current one.
    /// Zero disables pruning.
    pub retention: usize,
    /// Write every N recorded steps. 1 writes at every step boundary.
    pub interval: usize,
}

impl Default for CheckpointOptions {
    fn default() -> Self {
        Self {
            retention: 10,
            interval: 1,
        }
    }
}

/// Build a run id from a timestamp and the sanitized scenario id:
/// `YYYYMMDD-HHMMSS-<scenario>`.
pub fn generate_run_id(scenario_id: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}-{}",
        at.format("%Y%m%d-%H%M%S"),
        sanitize_component(scenario_id)
    )
}

pub struct CheckpointStore {
    repo_root: PathBuf,
    options: CheckpointOptions,
    steps_since_write: usize,
}

impl CheckpointStore {
    pub fn new(repo_root: impl Into<PathBuf>, options: CheckpointOptions) -> Self {
        Self {
            repo_root: repo_root.into(),
            options,
            steps_since_write: 0,
        }
    }

    pub fn runs_root(&self) -> PathBuf {
        self.repo_root.join(RUNS_DIR)
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_root().join(run_id)
    }

    /// Record a step boundary. Writes both files unless batched behind a
    /// positive `interval` that has not elapsed yet.
    pub fn record_step(&mut self, state: &WizardState, dry_run: bool) -> Result<()> {
        self.steps_since_write += 1;
        if self.options.interval > 1 && self.steps_since_write < self.options.interval {
            return Ok(());
        }
        self.steps_since_write = 0;
        self.write(state, CheckpointStatus::Running, dry_run)
    }

    /// Force a write with a terminal status, then prune old runs.
    pub fn finalize(
        &mut self,
        state: &WizardState,
        status: CheckpointStatus,
        dry_run: bool,
    ) -> Result<()> {
        self.steps_since_write = 0;
        self.write(state, status, dry_run)?;
        if let Some(run_id) = &state.run_id {
            self.prune(run_id)?;
        }
        Ok(())
    }

    /// Write `state.json` and `metadata.json` atomically.
    pub fn write(&self, state: &WizardState, status: CheckpointStatus, dry_run: bool) -> Result<()> {
        let run_id = state
            .run_id
            .as_deref()
            .context("Cannot checkpoint a state without a runId")?;
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create run directory: {}", dir.display()))?;

        let metadata = CheckpointMetadata {
            id: run_id.to_string(),
            scenario_id: state.scenario_id.clone(),
            scenario_label: state.scenario_label.clone(),
            started_at: state.started_at,
            updated_at: Utc::now(),
            status,
            dry_run,
            flow_cursor: state.flow_cursor,
            step_cursor: state.step_cursor,
            phase: Some(state.phase),
            post_run_cursor: Some(state.post_run_cursor),
        };

        write_json_atomic(&dir.join(STATE_FILE), state)?;
        write_json_atomic(&dir.join(METADATA_FILE), &metadata)?;
        Ok(())
    }

    /// Load a checkpoint by run id. Timestamps and error shapes rehydrate
    /// through the serde model.
    pub fn load(&self, run_id: &str) -> Result<Checkpoint> {
        let dir = self.run_dir(run_id);
        if !dir.is_dir() {
            bail!("No checkpoint found for run '{}'", run_id);
        }

        let state_path = dir.join(STATE_FILE);
        let state_raw = fs::read_to_string(&state_path)
            .with_context(|| format!("Failed to read checkpoint state: {}", state_path.display()))?;
        let state: WizardState = serde_json::from_str(&state_raw)
            .with_context(|| format!("Failed to parse checkpoint state: {}", state_path.display()))?;

        let metadata_path = dir.join(METADATA_FILE);
        let metadata_raw = fs::read_to_string(&metadata_path).with_context(|| {
            format!(
                "Failed to read checkpoint metadata: {}",
                metadata_path.display()
            )
        })?;
        let metadata: CheckpointMetadata = serde_json::from_str(&metadata_raw).with_context(|| {
            format!(
                "Failed to parse checkpoint metadata: {}",
                metadata_path.display()
            )
        })?;

        Ok(Checkpoint { state, metadata })
    }

    /// List run metadata, newest first (then id ascending), optionally
    /// filtered by scenario. Directories without a parseable
    /// `metadata.json` are skipped with a warning.
    pub fn list(&self, scenario_id: Option<&str>) -> Result<Vec<CheckpointMetadata>> {
        let root = self.runs_root();
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&root)
            .with_context(|| format!("Failed to list runs directory: {}", root.display()))?
        {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let metadata_path = entry.path().join(METADATA_FILE);
            let raw = match fs::read_to_string(&metadata_path) {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            match serde_json::from_str::<CheckpointMetadata>(&raw) {
                Ok(metadata) => {
                    if scenario_id.is_none_or(|id| metadata.scenario_id == id) {
                        entries.push(metadata);
                    }
                }
                Err(err) => {
                    warn!(
                        path = %metadata_path.display(),
                        error = %err,
                        "Skipping run with corrupt metadata"
                    );
                }
            }
        }

        entries.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(entries)
    }

    /// Remove non-current runs beyond the retention count.
    fn prune(&self, current_run_id: &str) -> Result<()> {
        if self.options.retention == 0 {
            return Ok(());
        }
        let entries = self.list(None)?;
        for metadata in entries.iter().skip(self.options.retention) {
            if metadata.id == current_run_id {
                continue;
            }
            let dir = self.run_dir(&metadata.id);
            if let Err(err) = fs::remove_dir_all(&dir) {
                warn!(
                    run_id = %metadata.id,
                    error = %err,
                    "Failed to prune old run directory"
                );
            }
        }
        Ok(())
    }
}

/// Pretty-printed JSON (2-space indent, LF, trailing newline), written via
/// a sibling temp file and an atomic rename.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut body = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    body.push('\n');

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, body)
        .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
