//! Integration timing capture: command stdout is scanned line by line
//! for `[integration][timing] {json}` payloads and aggregated per task.

use serde::Deserialize;
use serde_json::Value;

use wizard_core::{TimingRun, TimingTask};

const TIMING_MARKER: &str = "[integration][timing]";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimingPayload {
    task: String,
    profile: String,
    duration_ms: u64,
    status: String,
    #[serde(default)]
    label: Option<String>,
}

/// Scan stdout and aggregate payloads by task, preserving per-profile
/// runs in encounter order. Unparseable payloads are skipped.
pub fn scan_integration_timings(stdout: &str) -> Vec<TimingTask> {
    let mut tasks: Vec<TimingTask> = Vec::new();

    for line in stdout.lines() {
        let Some(position) = line.find(TIMING_MARKER) else {
            continue;
        };
        let payload_text = line[position + TIMING_MARKER.len()..].trim();
        let Ok(payload) = serde_json::from_str::<TimingPayload>(payload_text) else {
            continue;
        };

        let run = TimingRun {
            profile: payload.profile,
            duration_ms: payload.duration_ms,
            status: payload.status,
            label: payload.label,
        };
        match tasks.iter_mut().find(|task| task.task == payload.task) {
            Some(task) => task.runs.push(run),
            None => tasks.push(TimingTask {
                task: payload.task,
                runs: vec![run],
            }),
        }
    }

    tasks
}

/// The `workflow` block a step may carry in its metadata.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub include_in_all: Option<bool>,
}

pub fn workflow_metadata(step_metadata: Option<&Value>) -> Option<WorkflowMetadata> {
    let workflow = step_metadata?.get("workflow")?;
    serde_json::from_value(workflow.clone()).ok()
}
