use super::*;
use chrono::TimeZone;
use tempfile::tempdir;

fn state_with_run_id(scenario_id: &str, run_id: &str) -> WizardState {
    let mut state = WizardState::new(scenario_id, format!("Label for {scenario_id}"));
    state.run_id = Some(run_id.to_string());
    state
}

#[test]
fn test_generate_run_id_format() {
    let at = Utc.with_ymd_and_hms(2026, 8, 1, 10, 15, 0).unwrap();
    assert_eq!(
        generate_run_id("release train!", at),
        "20260801-101500-release-train"
    );
}

#[test]
fn test_write_and_load_round_trip() {
    let tmp = tempdir().unwrap();
    let store = CheckpointStore::new(tmp.path(), CheckpointOptions::default());

    let mut state = state_with_run_id("release", "20260801-101500-release");
    state
        .answers
        .insert("name".into(), serde_json::json!("demo"));
    state.step_cursor = 3;
    state.flow_cursor = 1;

    store.write(&state, CheckpointStatus::Running, false).unwrap();

    let checkpoint = store.load("20260801-101500-release").unwrap();
    assert_eq!(checkpoint.state, state);
    assert_eq!(checkpoint.metadata.step_cursor, 3);
    assert_eq!(checkpoint.metadata.flow_cursor, 1);
    assert_eq!(checkpoint.metadata.status, CheckpointStatus::Running);
}

#[test]
fn test_checkpoint_files_end_with_newline() {
    let tmp = tempdir().unwrap();
    let store = CheckpointStore::new(tmp.path(), CheckpointOptions::default());
    let state = state_with_run_id("release", "run-1");
    store.write(&state, CheckpointStatus::Running, false).unwrap();

    let raw = std::fs::read_to_string(store.run_dir("run-1").join("state.json")).unwrap();
    assert!(raw.ends_with('\n'));
    assert!(raw.contains("  \"scenarioId\""), "expected 2-space indent");
}

#[test]
fn test_load_missing_run_errors() {
    let tmp = tempdir().unwrap();
    let store = CheckpointStore::new(tmp.path(), CheckpointOptions::default());
    let err = store.load("nope").unwrap_err();
    assert!(err.to_string().contains("nope"));
}

#[test]
fn test_record_step_batches_by_interval() {
    let tmp = tempdir().unwrap();
    let mut store = CheckpointStore::new(
        tmp.path(),
        CheckpointOptions {
            retention: 0,
            interval: 3,
        },
    );
    let state = state_with_run_id("release", "run-1");

    store.record_step(&state, false).unwrap();
    store.record_step(&state, false).unwrap();
    assert!(!store.run_dir("run-1").join("state.json").exists());

    store.record_step(&state, false).unwrap();
    assert!(store.run_dir("run-1").join("state.json").exists());
}

#[test]
fn test_finalize_writes_even_when_batched() {
    let tmp = tempdir().unwrap();
    let mut store = CheckpointStore::new(
        tmp.path(),
        CheckpointOptions {
            retention: 0,
            interval: 10,
        },
    );
    let state = state_with_run_id("release", "run-1");
    store.record_step(&state, false).unwrap();
    store
        .finalize(&state, CheckpointStatus::Completed, false)
        .unwrap();

    let checkpoint = store.load("run-1").unwrap();
    assert_eq!(checkpoint.metadata.status, CheckpointStatus::Completed);
}

#[test]
fn test_list_sorted_newest_first() {
    let tmp = tempdir().unwrap();
    let store = CheckpointStore::new(tmp.path(), CheckpointOptions::default());

    for run_id in ["run-a", "run-b", "run-c"] {
        let state = state_with_run_id("release", run_id);
        store.write(&state, CheckpointStatus::Completed, false).unwrap();
        // updatedAt granularity is sub-millisecond; nudge the clock apart.
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    let listed = store.list(None).unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].id, "run-c");
    assert_eq!(listed[2].id, "run-a");
}

#[test]
fn test_list_filters_by_scenario() {
    let tmp = tempdir().unwrap();
    let store = CheckpointStore::new(tmp.path(), CheckpointOptions::default());

    store
        .write(
            &state_with_run_id("release", "run-release"),
            CheckpointStatus::Completed,
            false,
        )
        .unwrap();
    store
        .write(
            &state_with_run_id("setup", "run-setup"),
            CheckpointStatus::Completed,
            false,
        )
        .unwrap();

    let listed = store.list(Some("setup")).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "run-setup");
}

#[test]
fn test_list_skips_corrupt_metadata() {
    let tmp = tempdir().unwrap();
    let store = CheckpointStore::new(tmp.path(), CheckpointOptions::default());
    store
        .write(
            &state_with_run_id("release", "run-good"),
            CheckpointStatus::Completed,
            false,
        )
        .unwrap();

    let bad_dir = store.runs_root().join("run-bad");
    std::fs::create_dir_all(&bad_dir).unwrap();
    std::fs::write(bad_dir.join("metadata.json"), "not json {{{").unwrap();

    let listed = store.list(None).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "run-good");
}

#[test]
fn test_finalize_prunes_beyond_retention() {
    let tmp = tempdir().unwrap();
    let mut store = CheckpointStore::new(
        tmp.path(),
        CheckpointOptions {
            retention: 2,
            interval: 1,
        },
    );

    for run_id in ["run-1", "run-2", "run-3"] {
        let state = state_with_run_id("release", run_id);
        store.write(&state, CheckpointStatus::Completed, false).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    let current = state_with_run_id("release", "run-4");
    store
        .finalize(&current, CheckpointStatus::Completed, false)
        .unwrap();

    let listed = store.list(None).unwrap();
    let ids: Vec<&str> = listed.iter().map(|m| m.id.as_str()).collect();
    assert!(ids.contains(&"run-4"));
    assert_eq!(listed.len(), 2, "retention=2 keeps the two newest runs");
    assert!(!ids.contains(&"run-1"));
    assert!(!ids.contains(&"run-2"));
}

#[test]
fn test_retention_zero_never_prunes() {
    let tmp = tempdir().unwrap();
    let mut store = CheckpointStore::new(
        tmp.path(),
        CheckpointOptions {
            retention: 0,
            interval: 1,
        },
    );
    for run_id in ["run-1", "run-2", "run-3"] {
        let state = state_with_run_id("release", run_id);
        store
            .finalize(&state, CheckpointStatus::Completed, false)
            .unwrap();
    }
    assert_eq!(store.list(None).unwrap().len(), 3);
}

#[test]
fn test_resume_cursors_survive_round_trip() {
    let tmp = tempdir().unwrap();
    let store = CheckpointStore::new(tmp.path(), CheckpointOptions::default());

    let mut state = state_with_run_id("release", "run-1");
    state.step_cursor = 3;
    state.completed_steps = 3;
    state.phase = RunPhase::Scenario;
    store.write(&state, CheckpointStatus::Running, false).unwrap();

    let checkpoint = store.load("run-1").unwrap();
    assert_eq!(checkpoint.state.step_cursor, 3);
    assert_eq!(checkpoint.state.phase, RunPhase::Scenario);
    assert_eq!(checkpoint.metadata.post_run_cursor, Some(0));
}

#[test]
fn test_error_shape_survives_round_trip() {
    let tmp = tempdir().unwrap();
    let store = CheckpointStore::new(tmp.path(), CheckpointOptions::default());

    let mut state = state_with_run_id("release", "run-1");
    state.history.push(wizard_core::CommandExecutionRecord {
        flow_id: "build".into(),
        step_id: "compile".into(),
        command: "cargo build".into(),
        name: None,
        cwd: None,
        success: false,
        exit_code: Some(101),
        duration_ms: 40,
        started_at: Utc::now(),
        ended_at: Some(Utc::now()),
        stdout: None,
        stderr: None,
        timed_out: false,
        error: Some(wizard_core::ErrorShape {
            name: "CommandError".into(),
            message: "exit code 101".into(),
            stack: Some("engine::command".into()),
        }),
    });
    store.write(&state, CheckpointStatus::Failed, false).unwrap();

    let checkpoint = store.load("run-1").unwrap();
    let error = checkpoint.state.history[0].error.as_ref().unwrap();
    assert_eq!(error.name, "CommandError");
    assert_eq!(error.stack.as_deref(), Some("engine::command"));
}
