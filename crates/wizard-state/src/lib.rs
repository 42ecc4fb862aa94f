//! Durable run state: checkpoints, persisted answers, telemetry sinks,
//! and analytics reports.

pub mod analytics;
pub mod answers;
pub mod checkpoint;
pub mod redact;
pub mod sanitize;
pub mod telemetry;

pub use analytics::{AnalyticsWriter, HISTORY_CAPACITY, REPORTS_DIR, TimingReport, WorkflowReport};
pub use answers::{ANSWERS_DIR, FileAnswerStore};
pub use checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointOptions, CheckpointStatus, CheckpointStore, RUNS_DIR,
    generate_run_id,
};
pub use redact::{redact_event_line, redact_value_paths};
pub use sanitize::sanitize_component;
pub use telemetry::{NdjsonFileSink, TelemetryFanout};
