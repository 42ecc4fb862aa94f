use super::*;
use serde_json::json;

fn config(value: serde_json::Value) -> Config {
    serde_json::from_value(value).unwrap()
}

fn base_config(flows: serde_json::Value) -> Config {
    config(json!({
        "meta": {"name": "demo", "version": "1.0.0"},
        "scenarios": [{"id": "release", "label": "Release", "flow": "build"}],
        "flows": flows
    }))
}

#[test]
fn test_clean_config_has_no_issues() {
    let config = base_config(json!({
        "build": {
            "id": "build",
            "steps": [{"type": "message", "id": "hello", "text": "hi"}]
        }
    }));
    let issues = lint_config(&config);
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn test_unknown_scenario_flow_is_error() {
    let config = config(json!({
        "meta": {"name": "demo", "version": "1.0.0"},
        "scenarios": [{"id": "release", "label": "Release", "flow": "ghost"}],
        "flows": {}
    }));
    let issues = lint_config(&config);
    assert!(has_errors(&issues));
    assert!(issues[0].message.contains("ghost"));
}

#[test]
fn test_unknown_post_run_flow_is_error() {
    let config = config(json!({
        "meta": {"name": "demo", "version": "1.0.0"},
        "scenarios": [{
            "id": "release",
            "label": "Release",
            "flow": "build",
            "postRun": [{"flow": "missing-hook"}]
        }],
        "flows": {
            "build": {
                "id": "build",
                "steps": [{"type": "message", "id": "hello", "text": "hi"}]
            }
        }
    }));
    let issues = lint_config(&config);
    assert!(issues.iter().any(|issue| issue.message.contains("missing-hook")));
}

#[test]
fn test_unknown_branch_target_is_error() {
    let config = base_config(json!({
        "build": {
            "id": "build",
            "steps": [
                {
                    "type": "branch",
                    "id": "route",
                    "branches": [{"when": "true", "next": "ghost-step"}],
                    "defaultNext": {"next": "exit"}
                }
            ]
        }
    }));
    let issues = lint_config(&config);
    assert!(has_errors(&issues));
    assert!(issues.iter().any(|issue| issue.message.contains("ghost-step")));
}

#[test]
fn test_exit_and_repeat_targets_are_valid() {
    let config = base_config(json!({
        "build": {
            "id": "build",
            "steps": [
                {
                    "type": "branch",
                    "id": "route",
                    "branches": [
                        {"when": "true", "next": "exit"},
                        {"when": "false", "next": "repeat"}
                    ],
                    "defaultNext": {"next": "exit"}
                }
            ]
        }
    }));
    let issues = lint_config(&config);
    assert!(!has_errors(&issues));
}

#[test]
fn test_unknown_group_flow_is_error() {
    let config = base_config(json!({
        "build": {
            "id": "build",
            "steps": [{"type": "group", "id": "nested", "flow": "ghost-flow"}]
        }
    }));
    let issues = lint_config(&config);
    assert!(issues.iter().any(|issue| issue.message.contains("ghost-flow")));
}

#[test]
fn test_unknown_preset_reference_is_error() {
    let config = base_config(json!({
        "build": {
            "id": "build",
            "steps": [{
                "type": "command",
                "id": "run",
                "commands": [{"run": "make", "preset": "ghost-preset"}]
            }]
        }
    }));
    let issues = lint_config(&config);
    assert!(has_errors(&issues));
    assert!(issues.iter().any(|issue| issue.message.contains("ghost-preset")));
}

#[test]
fn test_unused_preset_is_warning() {
    let config = config(json!({
        "meta": {"name": "demo", "version": "1.0.0"},
        "scenarios": [{"id": "release", "label": "Release", "flow": "build"}],
        "flows": {
            "build": {
                "id": "build",
                "steps": [{"type": "message", "id": "hello", "text": "hi"}]
            }
        },
        "commandPresets": {"lonely": {"env": {"A": "1"}}}
    }));
    let issues = lint_config(&config);
    let unused: Vec<&LintIssue> = issues
        .iter()
        .filter(|issue| issue.message.contains("lonely"))
        .collect();
    assert_eq!(unused.len(), 1);
    assert_eq!(unused[0].level, LintLevel::Warning);
}

#[test]
fn test_guard_without_strategy_is_error() {
    let config = base_config(json!({
        "build": {
            "id": "build",
            "steps": [{
                "type": "git-worktree-guard",
                "id": "guard",
                "allowCommit": false,
                "allowStash": false
            }]
        }
    }));
    let issues = lint_config(&config);
    assert!(has_errors(&issues));
    assert!(issues.iter().any(|issue| issue.message.contains("no strategy")));
}

#[test]
fn test_iterate_dynamic_command_source_is_warning() {
    let config = base_config(json!({
        "build": {
            "id": "build",
            "steps": [
                {
                    "type": "iterate",
                    "id": "each",
                    "flow": "inner",
                    "source": {"from": "dynamic", "type": "command", "command": "ls"}
                }
            ]
        },
        "inner": {
            "id": "inner",
            "steps": [{"type": "message", "id": "hello", "text": "hi"}]
        }
    }));
    let issues = lint_config(&config);
    assert!(
        issues
            .iter()
            .any(|issue| issue.detail.as_deref()
                == Some("command providers cannot run in the collect phase"))
    );
}

#[test]
fn test_actions_without_policy_is_warning() {
    let config = base_config(json!({
        "build": {
            "id": "build",
            "steps": [{
                "type": "command",
                "id": "run",
                "commands": [{"run": "make"}],
                "onError": {
                    "actions": [{"label": "Retry build", "next": "repeat"}]
                }
            }]
        }
    }));
    let issues = lint_config(&config);
    assert!(
        issues
            .iter()
            .any(|issue| issue.message.contains("without a policy mapping"))
    );
}

#[test]
fn test_unreachable_flow_is_warning() {
    let config = base_config(json!({
        "build": {
            "id": "build",
            "steps": [{"type": "message", "id": "hello", "text": "hi"}]
        },
        "orphan": {
            "id": "orphan",
            "steps": [{"type": "message", "id": "alone", "text": "?"}]
        }
    }));
    let issues = lint_config(&config);
    assert!(issues.iter().any(|issue| issue.message.contains("orphan")));
    assert!(!has_errors(&issues));
}

#[test]
fn test_reachability_follows_group_and_iterate() {
    let config = base_config(json!({
        "build": {
            "id": "build",
            "steps": [
                {"type": "group", "id": "nested", "flow": "inner"},
                {"type": "iterate", "id": "each", "flow": "per-item", "items": []}
            ]
        },
        "inner": {
            "id": "inner",
            "steps": [{"type": "message", "id": "a", "text": "a"}]
        },
        "per-item": {
            "id": "per-item",
            "steps": [{"type": "message", "id": "b", "text": "b"}]
        }
    }));
    let issues = lint_config(&config);
    assert!(
        !issues.iter().any(|issue| issue.message.contains("not reachable")),
        "nested flows should be reachable: {issues:?}"
    );
}

#[test]
fn test_cyclic_flow_graph_does_not_hang() {
    let config = base_config(json!({
        "build": {
            "id": "build",
            "steps": [{"type": "group", "id": "loop", "flow": "build"}]
        }
    }));
    let issues = lint_config(&config);
    assert!(!has_errors(&issues));
}

#[test]
fn test_policy_map_targets_checked() {
    let config = base_config(json!({
        "build": {
            "id": "build",
            "steps": [{
                "type": "command",
                "id": "run",
                "commands": [{"run": "make"}],
                "onError": {
                    "policy": {
                        "key": "recovery.choice",
                        "map": {"skip": "ghost-target"},
                        "default": "exit"
                    }
                }
            }]
        }
    }));
    let issues = lint_config(&config);
    assert!(issues.iter().any(|issue| issue.message.contains("ghost-target")));
}
