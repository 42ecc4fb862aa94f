//! Plan formatters: human-readable text, NDJSON event lines, and JSON.

use std::fmt::Write as _;

use crate::plan::{FlowPlan, PlanEvent, ScenarioPlan, StepPlan, TargetMode};

/// Indented text rendering for terminals.
pub fn to_pretty(plan: &ScenarioPlan) -> String {
    let mut out = String::new();
    let mode = match plan.target_mode {
        TargetMode::DryRun => "dry-run",
        TargetMode::Live => "live",
    };
    let _ = writeln!(out, "{} ({}) [{}]", plan.label, plan.scenario_id, mode);
    if plan.pending_prompt_count > 0 {
        let _ = writeln!(out, "  pending prompts: {}", plan.pending_prompt_count);
    }
    for flow in &plan.flows {
        write_flow(&mut out, flow, 1);
    }
    if !plan.warnings.is_empty() {
        let _ = writeln!(out, "  warnings:");
        for warning in &plan.warnings {
            let _ = writeln!(out, "    - {warning}");
        }
    }
    out
}

fn write_flow(out: &mut String, flow: &FlowPlan, depth: usize) {
    let indent = "  ".repeat(depth);
    match &flow.label {
        Some(label) => {
            let _ = writeln!(out, "{indent}flow {} ({label})", flow.flow_id);
        }
        None => {
            let _ = writeln!(out, "{indent}flow {}", flow.flow_id);
        }
    }
    for step in &flow.steps {
        write_step(out, step, depth + 1);
    }
}

fn write_step(out: &mut String, step: &StepPlan, depth: usize) {
    let indent = "  ".repeat(depth);
    match step {
        StepPlan::Prompt(prompt) => {
            let status = if prompt.pending {
                "pending".to_string()
            } else {
                match &prompt.value {
                    Some(value) => format!("= {value}"),
                    None => "resolved".to_string(),
                }
            };
            let _ = writeln!(out, "{indent}prompt {} ({}) {status}", prompt.step_id, prompt.key);
        }
        StepPlan::Command(command) => {
            let _ = writeln!(out, "{indent}command {}", command.step_id);
            for entry in &command.commands {
                let _ = writeln!(out, "{indent}  $ {}", entry.command);
            }
        }
        StepPlan::Message(message) => {
            let _ = writeln!(out, "{indent}message {}: {}", message.step_id, message.text);
        }
        StepPlan::Branch(branch) => {
            let target = branch.selected.as_deref().unwrap_or("(none)");
            let _ = writeln!(out, "{indent}branch {} -> {target}", branch.step_id);
        }
        StepPlan::Group(group) => {
            let _ = writeln!(out, "{indent}group {}", group.step_id);
            write_flow(out, &group.flow, depth + 1);
        }
        StepPlan::Iterate(iterate) => {
            let count = iterate
                .count
                .map(|count| count.to_string())
                .unwrap_or_else(|| "?".to_string());
            let _ = writeln!(
                out,
                "{indent}iterate {} over {} ({count} items)",
                iterate.step_id, iterate.flow_id
            );
            if let Some(note) = &iterate.note {
                let _ = writeln!(out, "{indent}  note: {note}");
            }
        }
        StepPlan::Compute(compute) => {
            let _ = writeln!(
                out,
                "{indent}compute {} -> [{}]",
                compute.step_id,
                compute.stored_keys.join(", ")
            );
        }
        StepPlan::Guard(guard) => {
            let status = match guard.clean {
                Some(true) => "clean".to_string(),
                Some(false) => guard
                    .strategy
                    .clone()
                    .map(|strategy| format!("dirty -> {strategy}"))
                    .unwrap_or_else(|| "dirty (strategy pending)".to_string()),
                None => "unknown".to_string(),
            };
            let _ = writeln!(out, "{indent}worktree-guard {} ({status})", guard.step_id);
        }
        StepPlan::Plugin(plugin) => {
            let _ = writeln!(out, "{indent}plugin {} [{}]", plugin.step_id, plugin.step_type);
        }
    }
}

/// One JSON line per plan event.
pub fn to_ndjson(plan: &ScenarioPlan) -> String {
    plan.events
        .iter()
        .filter_map(|event| serde_json::to_string::<PlanEvent>(event).ok())
        .collect::<Vec<_>>()
        .join("\n")
}

/// The whole plan as pretty JSON.
pub fn to_json(plan: &ScenarioPlan) -> String {
    serde_json::to_string_pretty(plan).unwrap_or_else(|_| "{}".to_string())
}
