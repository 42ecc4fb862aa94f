//! Telemetry fanout: one event stream, N sinks.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use serde::Serialize;
use tracing::warn;

use wizard_core::{LogSink, MessageLevel, WizardEvent};

use crate::redact::redact_event_line;

const EVENT_SCHEMA_VERSION: u8 = 1;

/// Chains sinks in order. Every sink sees every event in emission order;
/// `close` closes all sinks and reports the first failure without
/// dropping the rest.
#[derive(Default)]
pub struct TelemetryFanout {
    sinks: Vec<Box<dyn LogSink>>,
}

impl TelemetryFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn LogSink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn emit(&mut self, event: &WizardEvent) {
        for sink in &mut self.sinks {
            sink.emit(event);
        }
    }

    pub fn note(&mut self, level: MessageLevel, message: &str) {
        for sink in &mut self.sinks {
            sink.note(level, message);
        }
    }

    /// Close every sink; the first error wins but later closes still run.
    pub fn close(&mut self) -> Result<()> {
        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(err) = sink.close() {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Serialize)]
struct NdjsonLine<'a> {
    v: u8,
    seq: u64,
    ts: String,
    #[serde(rename = "type")]
    event_type: &'a str,
    data: &'a WizardEvent,
}

#[derive(Serialize)]
struct NdjsonNote<'a> {
    v: u8,
    seq: u64,
    ts: String,
    #[serde(rename = "type")]
    event_type: &'static str,
    level: MessageLevel,
    message: &'a str,
}

/// Appends one redacted JSON line per event. Write failures are warned,
/// never raised; telemetry must not take the run down.
pub struct NdjsonFileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    seq: u64,
    write_failures: u64,
}

impl NdjsonFileSink {
    pub fn create(path: &Path) -> Self {
        let writer = match open_append(path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "Failed to open NDJSON event log"
                );
                None
            }
        };
        Self {
            path: path.to_path_buf(),
            writer,
            seq: 0,
            write_failures: 0,
        }
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    fn write_line<T: Serialize>(&mut self, payload: &T) {
        let Some(writer) = self.writer.as_mut() else {
            self.write_failures += 1;
            return;
        };
        match serde_json::to_string(payload) {
            Ok(line) => {
                let redacted = redact_event_line(&line);
                if let Err(err) = writer
                    .write_all(redacted.as_bytes())
                    .and_then(|_| writer.write_all(b"\n"))
                {
                    self.write_failures += 1;
                    warn!(
                        path = %self.path.display(),
                        error = %err,
                        "Failed to append event line"
                    );
                }
            }
            Err(err) => {
                self.write_failures += 1;
                warn!(error = %err, "Failed to serialize event");
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq = self.seq.saturating_add(1);
        seq
    }
}

fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open event log: {}", path.display()))
}

impl LogSink for NdjsonFileSink {
    fn emit(&mut self, event: &WizardEvent) {
        let seq = self.next_seq();
        let line = NdjsonLine {
            v: EVENT_SCHEMA_VERSION,
            seq,
            ts: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event_type: event.kind(),
            data: event,
        };
        self.write_line(&line);
    }

    fn note(&mut self, level: MessageLevel, message: &str) {
        let seq = self.next_seq();
        let note = NdjsonNote {
            v: EVENT_SCHEMA_VERSION,
            seq,
            ts: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event_type: "note",
            level,
            message,
        };
        self.write_line(&note);
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("Failed to flush event log: {}", self.path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;
    use wizard_core::CollectorSink;

    fn step_start(step_id: &str) -> WizardEvent {
        WizardEvent::StepStart {
            flow_id: "build".into(),
            step_id: step_id.into(),
            step_type: "message".into(),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_fanout_delivers_in_order_to_all_sinks() {
        let mut fanout = TelemetryFanout::new();
        fanout.push(Box::new(CollectorSink::default()));
        fanout.emit(&step_start("a"));
        fanout.emit(&step_start("b"));
        fanout.note(MessageLevel::Info, "note");
        fanout.close().unwrap();
    }

    struct FailingCloseSink {
        label: &'static str,
        closed: std::sync::Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl LogSink for FailingCloseSink {
        fn emit(&mut self, _event: &WizardEvent) {}
        fn note(&mut self, _level: MessageLevel, _message: &str) {}
        fn close(&mut self) -> Result<()> {
            self.closed.lock().unwrap().push(self.label);
            anyhow::bail!("close failed: {}", self.label)
        }
    }

    #[test]
    fn test_close_propagates_first_error_but_closes_all() {
        let closed = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut fanout = TelemetryFanout::new();
        fanout.push(Box::new(FailingCloseSink {
            label: "first",
            closed: closed.clone(),
        }));
        fanout.push(Box::new(FailingCloseSink {
            label: "second",
            closed: closed.clone(),
        }));

        let err = fanout.close().unwrap_err();
        assert!(err.to_string().contains("first"));
        assert_eq!(*closed.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_ndjson_sink_writes_one_line_per_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("logs/events.ndjson");
        let mut sink = NdjsonFileSink::create(&path);
        sink.emit(&step_start("a"));
        sink.emit(&step_start("b"));
        sink.close().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.get("v").unwrap(), 1);
        assert_eq!(first.get("seq").unwrap(), 0);
        assert_eq!(first.get("type").unwrap(), "step.start");
        assert_eq!(first["data"]["stepId"], "a");

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.get("seq").unwrap(), 1);
    }

    #[test]
    fn test_ndjson_sink_redacts_secrets() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("events.ndjson");
        let mut sink = NdjsonFileSink::create(&path);
        sink.emit(&WizardEvent::CommandResult {
            flow_id: "deploy".into(),
            step_id: "push".into(),
            command: "deploy.sh".into(),
            name: None,
            success: true,
            exit_code: Some(0),
            duration_ms: 10,
            timed_out: false,
            stdout: Some("issued sk-live_abcdef123456".into()),
            stderr: None,
            at: Utc::now(),
        });
        sink.close().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("sk-live_abcdef123456"));
        assert!(raw.contains("[REDACTED]"));
    }

    #[test]
    fn test_ndjson_sink_notes() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("events.ndjson");
        let mut sink = NdjsonFileSink::create(&path);
        sink.note(MessageLevel::Warning, "long running command");
        sink.close().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.get("type").unwrap(), "note");
        assert_eq!(parsed.get("level").unwrap(), "warning");
    }

    #[test]
    fn test_ndjson_sink_unwritable_path_counts_failures() {
        let mut sink = NdjsonFileSink::create(Path::new("/dev/null/not/a/dir/events.ndjson"));
        sink.emit(&step_start("a"));
        assert_eq!(sink.write_failures(), 1);
        sink.close().unwrap();
    }
}
