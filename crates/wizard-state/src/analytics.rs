//! Workflow analytics reports under `<repoRoot>/.reports/`.
//!
//! Written only on non-dry-run successful completion (the caller enforces
//! that). `*-latest.json` holds the most recent run; `*-history.json` is a
//! newest-first ring buffer capped at 50 entries.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use wizard_core::{FlowRun, IntegrationTimingEntry, WizardState};

pub const REPORTS_DIR: &str = ".reports";
pub const HISTORY_CAPACITY: usize = 50;

const WORKFLOWS_LATEST: &str = "workflows-latest.json";
const WORKFLOWS_HISTORY: &str = "workflows-history.json";
const TIMINGS_LATEST: &str = "integration-timings-latest.json";
const TIMINGS_HISTORY: &str = "integration-timings-history.json";
const RELEASE_EMAIL_STATUS: &str = "release-email-status.json";

/// One completed run, as reported to the workflow analytics consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub scenario_id: String,
    pub scenario_label: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub completed_steps: u32,
    pub failed_steps: u32,
    pub exited_early: bool,
    pub flow_runs: Vec<FlowRun>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_email_status: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub scenario_id: String,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<IntegrationTimingEntry>,
}

pub struct AnalyticsWriter {
    reports_dir: PathBuf,
}

impl AnalyticsWriter {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            reports_dir: repo_root.join(REPORTS_DIR),
        }
    }

    /// Write the workflow and integration-timing reports for a completed
    /// run.
    pub fn write_reports(&self, state: &WizardState) -> Result<()> {
        fs::create_dir_all(&self.reports_dir).with_context(|| {
            format!(
                "Failed to create reports directory: {}",
                self.reports_dir.display()
            )
        })?;

        let workflow = self.build_workflow_report(state);
        self.write_json(WORKFLOWS_LATEST, &workflow)?;
        self.append_history(WORKFLOWS_HISTORY, &workflow)?;

        let timings = TimingReport {
            run_id: state.run_id.clone(),
            scenario_id: state.scenario_id.clone(),
            generated_at: Utc::now(),
            entries: state.integration_timings.clone(),
        };
        self.write_json(TIMINGS_LATEST, &timings)?;
        self.append_history(TIMINGS_HISTORY, &timings)?;

        Ok(())
    }

    fn build_workflow_report(&self, state: &WizardState) -> WorkflowReport {
        let duration_ms = state
            .ended_at
            .map(|ended| (ended - state.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        WorkflowReport {
            run_id: state.run_id.clone(),
            scenario_id: state.scenario_id.clone(),
            scenario_label: state.scenario_label.clone(),
            started_at: state.started_at,
            ended_at: state.ended_at,
            duration_ms,
            completed_steps: state.completed_steps,
            failed_steps: state.failed_steps,
            exited_early: state.exited_early,
            flow_runs: state.flow_runs.clone(),
            release_email_status: self.read_release_email_status(),
        }
    }

    /// Merge `release-email-status.json` into the report when present.
    fn read_release_email_status(&self) -> Option<Value> {
        let path = self.reports_dir.join(RELEASE_EMAIL_STATUS);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "Ignoring unparseable release email status"
                );
                None
            }
        }
    }

    fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.reports_dir.join(file);
        let mut body =
            serde_json::to_string_pretty(value).context("Failed to serialize report")?;
        body.push('\n');

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, body)
            .with_context(|| format!("Failed to write temp file: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to move {} into place", path.display()))?;
        Ok(())
    }

    /// Prepend to a history file, keeping at most `HISTORY_CAPACITY`
    /// entries. A corrupt history is dropped with a warning.
    fn append_history<T: Serialize>(&self, file: &str, entry: &T) -> Result<()> {
        let path = self.reports_dir.join(file);
        let mut history: Vec<Value> = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(values) => values,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "Corrupt history file; starting over"
                    );
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        history.insert(0, serde_json::to_value(entry)?);
        history.truncate(HISTORY_CAPACITY);
        self.write_json(file, &history)
    }
}
