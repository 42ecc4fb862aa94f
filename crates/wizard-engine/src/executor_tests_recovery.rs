//! Failure recovery, policy gating, iterate, and worktree guard paths.

use std::process::Command;
use std::sync::Arc;

use serde_json::json;

use wizard_core::{PolicyLevel, RunStatus, WizardEvent};

use crate::error::ExecutionError;
use crate::executor::ExecuteOptions;

use crate::executor_tests::harness::*;

fn policy_config() -> Arc<wizard_core::Config> {
    config(json!({
        "meta": {"name": "demo", "version": "1.0.0"},
        "scenarios": [{"id": "cleanup", "label": "Cleanup", "flow": "main"}],
        "policies": {
            "rules": [
                {"id": "destructive", "level": "block", "match": {"commandPattern": "rm -rf"}}
            ]
        },
        "flows": {
            "main": {
                "id": "main",
                "steps": [{
                    "type": "command",
                    "id": "wipe",
                    "commands": [{"run": "rm -rf scratch"}]
                }]
            }
        }
    }))
}

#[tokio::test]
async fn test_policy_block_fails_non_interactive() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    let (sink, events, _notes) = shared_sink();

    let err = executor(
        policy_config(),
        "cleanup",
        deps(
            ScriptedPrompt::non_interactive(),
            runner.clone(),
            Default::default(),
            Default::default(),
        ),
        ExecuteOptions::new(tmp.path()),
        sink,
    )
    .execute()
    .await
    .unwrap_err();

    assert!(matches!(err.source, ExecutionError::PolicyBlocked { .. }));
    assert!(runner.commands_run().is_empty());

    // The decision was still emitted before failing.
    let decided = events.lock().unwrap().iter().any(|event| {
        matches!(
            event,
            WizardEvent::PolicyDecision {
                enforced_level: PolicyLevel::Block,
                ..
            }
        )
    });
    assert!(decided);
}

#[tokio::test]
async fn test_policy_block_acknowledged_interactively() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    let (sink, events, _notes) = shared_sink();

    // One scripted answer: "yes" to the continue-anyway confirm.
    let driver = ScriptedPrompt::with_answers(vec![json!(true)]);

    let state = executor(
        policy_config(),
        "cleanup",
        deps(driver, runner.clone(), Default::default(), Default::default()),
        ExecuteOptions::new(tmp.path()),
        sink,
    )
    .execute()
    .await
    .unwrap();

    // The command actually ran.
    assert_eq!(runner.commands_run(), vec!["rm -rf scratch".to_string()]);

    // Two decisions: the original block, then the acknowledged downgrade.
    let decisions: Vec<(PolicyLevel, bool)> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            WizardEvent::PolicyDecision {
                enforced_level,
                acknowledged,
                ..
            } => Some((*enforced_level, *acknowledged)),
            _ => None,
        })
        .collect();
    assert_eq!(decisions.len(), 2);
    assert_eq!(decisions[0], (PolicyLevel::Block, false));
    assert_eq!(decisions[1], (PolicyLevel::Warn, true));

    // Both decisions landed in state as well.
    assert_eq!(state.policy_decisions.len(), 2);
    assert!(state.policy_decisions[1].acknowledged);
}

#[tokio::test]
async fn test_auto_retry_until_limit_then_success() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    runner.script(
        "flaky-build",
        vec![
            failure_outcome(1),
            failure_outcome(1),
            success_outcome("ok\n"),
        ],
    );
    let (sink, _events, _notes) = shared_sink();

    let config = config(json!({
        "meta": {"name": "demo", "version": "1.0.0"},
        "scenarios": [{"id": "s", "label": "S", "flow": "main"}],
        "flows": {
            "main": {
                "id": "main",
                "steps": [{
                    "type": "command",
                    "id": "build",
                    "commands": [{"run": "flaky-build"}],
                    "onError": {"auto": {"strategy": "retry", "limit": 2}}
                }]
            }
        }
    }));

    let state = executor(
        config,
        "s",
        deps(
            ScriptedPrompt::non_interactive(),
            runner.clone(),
            Default::default(),
            Default::default(),
        ),
        ExecuteOptions::new(tmp.path()),
        sink,
    )
    .execute()
    .await
    .unwrap();

    assert_eq!(runner.commands_run().len(), 3);
    assert_eq!(state.retries.len(), 2);
    // Repeats do not count as completed steps; the final success does.
    assert_eq!(state.completed_steps, 1);
    assert_eq!(state.failed_steps, 2);
    assert_eq!(state.auto_attempts("main", "build"), 2);
}

#[tokio::test]
async fn test_failure_non_interactive_takes_default_transition() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    runner.script("broken", vec![failure_outcome(2)]);
    let (sink, _events, notes) = shared_sink();

    let config = config(json!({
        "meta": {"name": "demo", "version": "1.0.0"},
        "scenarios": [{"id": "s", "label": "S", "flow": "main"}],
        "flows": {
            "main": {
                "id": "main",
                "steps": [
                    {
                        "type": "command",
                        "id": "build",
                        "commands": [{"run": "broken"}],
                        "onError": {"defaultNext": {"next": "cleanup"}}
                    },
                    {"type": "message", "id": "skipped-over", "text": "never"},
                    {"type": "message", "id": "cleanup", "text": "cleaning"}
                ]
            }
        }
    }));

    let state = executor(
        config,
        "s",
        deps(
            ScriptedPrompt::non_interactive(),
            runner,
            Default::default(),
            Default::default(),
        ),
        ExecuteOptions::new(tmp.path()),
        sink,
    )
    .execute()
    .await
    .unwrap();

    assert_eq!(state.skipped_steps.len(), 1);
    assert_eq!(state.skipped_steps[0].step_id, "build");
    let texts: Vec<String> = notes
        .lock()
        .unwrap()
        .iter()
        .map(|(_, text)| text.clone())
        .collect();
    assert!(texts.contains(&"cleaning".to_string()));
    assert!(!texts.contains(&"never".to_string()));
}

#[tokio::test]
async fn test_failure_policy_maps_stored_answer() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    runner.script("broken", vec![failure_outcome(2)]);
    let (sink, _events, notes) = shared_sink();

    let config = config(json!({
        "meta": {"name": "demo", "version": "1.0.0"},
        "scenarios": [{"id": "s", "label": "S", "flow": "main"}],
        "flows": {
            "main": {
                "id": "main",
                "steps": [
                    {"type": "compute", "id": "seed", "values": {"recovery": {"choice": "skip-ahead"}}},
                    {
                        "type": "command",
                        "id": "build",
                        "commands": [{"run": "broken"}],
                        "onError": {
                            "policy": {
                                "key": "recovery.choice",
                                "map": {"skip-ahead": "after"},
                                "default": "exit"
                            }
                        }
                    },
                    {"type": "message", "id": "after", "text": "moved on"}
                ]
            }
        }
    }));

    executor(
        config,
        "s",
        deps(
            ScriptedPrompt::non_interactive(),
            runner,
            Default::default(),
            Default::default(),
        ),
        ExecuteOptions::new(tmp.path()),
        sink,
    )
    .execute()
    .await
    .unwrap();

    let texts: Vec<String> = notes
        .lock()
        .unwrap()
        .iter()
        .map(|(_, text)| text.clone())
        .collect();
    assert!(texts.contains(&"moved on".to_string()));
}

#[tokio::test]
async fn test_interactive_failure_menu_replay_shortcut() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    runner.script(
        "flaky-build",
        vec![failure_outcome(1), success_outcome("ok\n")],
    );
    let (sink, events, _notes) = shared_sink();

    // One scripted answer: the replay shortcut from the failure menu.
    let driver = ScriptedPrompt::with_answers(vec![json!("__replay__")]);

    let config = config(json!({
        "meta": {"name": "demo", "version": "1.0.0"},
        "scenarios": [{"id": "s", "label": "S", "flow": "main"}],
        "flows": {
            "main": {
                "id": "main",
                "steps": [{
                    "type": "command",
                    "id": "build",
                    "commands": [{"run": "flaky-build"}],
                    "onError": {"actions": [{"label": "Give up", "next": "exit"}]}
                }]
            }
        }
    }));

    let state = executor(
        config,
        "s",
        deps(driver, runner.clone(), Default::default(), Default::default()),
        ExecuteOptions::new(tmp.path()),
        sink,
    )
    .execute()
    .await
    .unwrap();

    assert_eq!(runner.commands_run().len(), 2);
    assert!(state.is_successful() || state.failed_steps == 1);

    let shortcuts: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            WizardEvent::ShortcutTrigger { shortcut, .. } => Some(shortcut.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(shortcuts, vec!["replay".to_string()]);
}

#[tokio::test]
async fn test_iterate_over_workspace_projects() {
    let tmp = tempfile::tempdir().unwrap();
    for (dir, name) in [
        ("apps/api", "@demo/api"),
        ("apps/web", "@demo/web"),
        ("apps/worker", "@demo/worker"),
    ] {
        let path = tmp.path().join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(
            path.join("package.json"),
            format!(r#"{{"name": "{name}"}}"#),
        )
        .unwrap();
    }

    let runner = FakeRunner::new();
    let (sink, events, _notes) = shared_sink();

    let config = config(json!({
        "meta": {"name": "demo", "version": "1.0.0"},
        "scenarios": [{"id": "s", "label": "S", "flow": "main"}],
        "flows": {
            "main": {
                "id": "main",
                "steps": [{
                    "type": "iterate",
                    "id": "each-project",
                    "flow": "per-project",
                    "storeEachAs": "project",
                    "source": {"from": "dynamic", "type": "workspace-projects", "maxDepth": 2}
                }]
            },
            "per-project": {
                "id": "per-project",
                "steps": [{
                    "type": "message",
                    "id": "announce",
                    "text": "visiting {{iteration.value.id}}"
                }]
            }
        }
    }));

    let state = executor(
        config,
        "s",
        deps(
            ScriptedPrompt::non_interactive(),
            runner,
            Default::default(),
            Default::default(),
        ),
        ExecuteOptions::new(tmp.path()),
        sink,
    )
    .execute()
    .await
    .unwrap();

    // The shadowed answer is restored (it never existed, so removed).
    assert!(state.answers.get("project").is_none());
    assert!(state.iteration.is_none());

    let inner_runs = state
        .flow_runs
        .iter()
        .filter(|run| run.flow_id == "per-project")
        .count();
    assert_eq!(inner_runs, 3);

    let iterate_status = events
        .lock()
        .unwrap()
        .iter()
        .find_map(|event| match event {
            WizardEvent::StepComplete {
                step_id, status, ..
            } if step_id == "each-project" => Some(*status),
            _ => None,
        })
        .unwrap();
    assert_eq!(iterate_status, RunStatus::Success);
}

#[tokio::test]
async fn test_iterate_empty_items_skips_with_warning() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    let (sink, _events, notes) = shared_sink();

    let config = config(json!({
        "meta": {"name": "demo", "version": "1.0.0"},
        "scenarios": [{"id": "s", "label": "S", "flow": "main"}],
        "flows": {
            "main": {
                "id": "main",
                "steps": [{
                    "type": "iterate",
                    "id": "each",
                    "flow": "inner",
                    "items": []
                }]
            },
            "inner": {
                "id": "inner",
                "steps": [{"type": "message", "id": "x", "text": "x"}]
            }
        }
    }));

    let state = executor(
        config,
        "s",
        deps(
            ScriptedPrompt::non_interactive(),
            runner,
            Default::default(),
            Default::default(),
        ),
        ExecuteOptions::new(tmp.path()),
        sink,
    )
    .execute()
    .await
    .unwrap();

    assert!(state.flow_runs.iter().all(|run| run.flow_id != "inner"));
    assert!(
        notes
            .lock()
            .unwrap()
            .iter()
            .any(|(_, text)| text.contains("no items"))
    );
}

#[tokio::test]
async fn test_iterate_concurrency_hint_warns_but_stays_sequential() {
    let tmp = tempfile::tempdir().unwrap();
    let runner = FakeRunner::new();
    let (sink, _events, notes) = shared_sink();

    let config = config(json!({
        "meta": {"name": "demo", "version": "1.0.0"},
        "scenarios": [{"id": "s", "label": "S", "flow": "main"}],
        "flows": {
            "main": {
                "id": "main",
                "steps": [{
                    "type": "iterate",
                    "id": "each",
                    "flow": "inner",
                    "items": ["a", "b"],
                    "concurrency": 4
                }]
            },
            "inner": {
                "id": "inner",
                "steps": [{"type": "message", "id": "x", "text": "{{iteration.value}}"}]
            }
        }
    }));

    let state = executor(
        config,
        "s",
        deps(
            ScriptedPrompt::non_interactive(),
            runner,
            Default::default(),
            Default::default(),
        ),
        ExecuteOptions::new(tmp.path()),
        sink,
    )
    .execute()
    .await
    .unwrap();

    assert!(
        notes
            .lock()
            .unwrap()
            .iter()
            .any(|(_, text)| text.contains("sequentially"))
    );
    // Items ran in order.
    let texts: Vec<String> = notes
        .lock()
        .unwrap()
        .iter()
        .map(|(_, text)| text.clone())
        .filter(|text| *text == "a" || *text == "b")
        .collect();
    assert_eq!(texts, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(
        state
            .flow_runs
            .iter()
            .filter(|run| run.flow_id == "inner")
            .count(),
        2
    );
}

// ── Worktree guard ───────────────────────────────────────────────

fn git(dir: &std::path::Path, args: &[&str]) {
    let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn guard_config() -> Arc<wizard_core::Config> {
    config(json!({
        "meta": {"name": "demo", "version": "1.0.0"},
        "scenarios": [{"id": "s", "label": "S", "flow": "main"}],
        "flows": {
            "main": {
                "id": "main",
                "steps": [{"type": "git-worktree-guard", "id": "guard"}]
            }
        }
    }))
}

#[tokio::test]
async fn test_guard_clean_worktree_succeeds() {
    let tmp = tempfile::tempdir().unwrap();
    git(tmp.path(), &["init", "-q"]);
    git(tmp.path(), &["config", "user.email", "t@example.com"]);
    git(tmp.path(), &["config", "user.name", "T"]);

    let runner = FakeRunner::new();
    let (sink, _events, notes) = shared_sink();

    let state = executor(
        guard_config(),
        "s",
        deps(
            ScriptedPrompt::non_interactive(),
            runner,
            Default::default(),
            Default::default(),
        ),
        ExecuteOptions::new(tmp.path()),
        sink,
    )
    .execute()
    .await
    .unwrap();

    assert!(state.is_successful());
    assert!(
        notes
            .lock()
            .unwrap()
            .iter()
            .any(|(_, text)| text.contains("clean"))
    );
}

#[tokio::test]
async fn test_guard_dirty_commit_push_with_upstream_fallback() {
    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("origin.git");
    let repo = tmp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();

    git(tmp.path(), &["init", "--bare", "-q", "origin.git"]);
    git(&repo, &["init", "-q"]);
    git(&repo, &["config", "user.email", "t@example.com"]);
    git(&repo, &["config", "user.name", "T"]);
    std::fs::write(repo.join("base.txt"), "base").unwrap();
    git(&repo, &["add", "-A"]);
    git(&repo, &["commit", "-q", "-m", "init"]);
    git(&repo, &["remote", "add", "origin", origin.to_str().unwrap()]);

    // Dirty the tree.
    std::fs::write(repo.join("work.txt"), "wip").unwrap();

    let runner = FakeRunner::new();
    let (sink, _events, notes) = shared_sink();

    let mut options = ExecuteOptions::new(&repo);
    options
        .overrides
        .insert("worktreeStrategy".into(), json!("commit-push"));
    options
        .overrides
        .insert("commitMessage".into(), json!("chore: x"));

    let state = executor(
        guard_config(),
        "s",
        deps(
            ScriptedPrompt::non_interactive(),
            runner,
            Default::default(),
            Default::default(),
        ),
        options,
        sink,
    )
    .execute()
    .await
    .unwrap();

    assert!(state.is_successful());

    // The tree is clean again and the commit landed on the remote.
    let status = wizard_process::worktree_status(&repo).unwrap();
    assert!(status.clean);
    let log = Command::new("git")
        .args(["log", "-1", "--format=%s"])
        .current_dir(&repo)
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&log.stdout).trim(), "chore: x");

    // The fallback set an upstream on the first push.
    assert!(wizard_process::has_upstream(&repo));
    assert!(
        notes
            .lock()
            .unwrap()
            .iter()
            .any(|(_, text)| text.contains("upstream"))
    );
}

#[tokio::test]
async fn test_guard_dirty_non_interactive_without_strategy_fails() {
    let tmp = tempfile::tempdir().unwrap();
    git(tmp.path(), &["init", "-q"]);
    git(tmp.path(), &["config", "user.email", "t@example.com"]);
    git(tmp.path(), &["config", "user.name", "T"]);
    std::fs::write(tmp.path().join("dirty.txt"), "x").unwrap();

    let runner = FakeRunner::new();
    let (sink, _events, _notes) = shared_sink();

    let err = executor(
        guard_config(),
        "s",
        deps(
            ScriptedPrompt::non_interactive(),
            runner,
            Default::default(),
            Default::default(),
        ),
        ExecuteOptions::new(tmp.path()),
        sink,
    )
    .execute()
    .await
    .unwrap_err();

    assert!(matches!(err.source, ExecutionError::GuardNoStrategy(_)));
}

#[tokio::test]
async fn test_guard_dirty_stash_strategy() {
    let tmp = tempfile::tempdir().unwrap();
    git(tmp.path(), &["init", "-q"]);
    git(tmp.path(), &["config", "user.email", "t@example.com"]);
    git(tmp.path(), &["config", "user.name", "T"]);
    std::fs::write(tmp.path().join("base.txt"), "base").unwrap();
    git(tmp.path(), &["add", "-A"]);
    git(tmp.path(), &["commit", "-q", "-m", "init"]);
    std::fs::write(tmp.path().join("wip.txt"), "wip").unwrap();

    let runner = FakeRunner::new();
    let (sink, _events, _notes) = shared_sink();

    let mut options = ExecuteOptions::new(tmp.path());
    options
        .overrides
        .insert("worktreeStrategy".into(), json!("stash"));
    options
        .overrides
        .insert("commitMessage".into(), json!("wip before wizard"));

    let state = executor(
        guard_config(),
        "s",
        deps(
            ScriptedPrompt::non_interactive(),
            runner,
            Default::default(),
            Default::default(),
        ),
        options,
        sink,
    )
    .execute()
    .await
    .unwrap();

    assert!(state.is_successful());
    assert!(wizard_process::worktree_status(tmp.path()).unwrap().clean);
}
