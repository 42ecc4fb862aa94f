//! Semantic lint over a composed config: reference integrity, unused
//! definitions, and constructs that cannot work at runtime.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use wizard_core::{Config, Flow, IterateSource, NextTarget, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LintLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LintIssue {
    pub level: LintLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LintIssue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            level: LintLevel::Error,
            message: message.into(),
            detail: None,
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: LintLevel::Warning,
            message: message.into(),
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Run every lint rule. The executor refuses configs with error-level
/// issues; warnings are surfaced but do not block.
pub fn lint_config(config: &Config) -> Vec<LintIssue> {
    let mut issues = Vec::new();

    check_scenario_flow_refs(config, &mut issues);
    check_nested_flow_refs(config, &mut issues);
    check_step_targets(config, &mut issues);
    check_preset_refs(config, &mut issues);
    check_unused_presets(config, &mut issues);
    check_error_actions(config, &mut issues);
    check_guards(config, &mut issues);
    check_dynamic_commands(config, &mut issues);
    check_reachability(config, &mut issues);

    issues
}

pub fn has_errors(issues: &[LintIssue]) -> bool {
    issues.iter().any(|issue| issue.level == LintLevel::Error)
}

fn check_scenario_flow_refs(config: &Config, issues: &mut Vec<LintIssue>) {
    for scenario in &config.scenarios {
        for flow_id in scenario.flow_sequence() {
            if config.flow(flow_id).is_none() {
                issues.push(LintIssue::error(format!(
                    "Scenario '{}' references unknown flow '{}'",
                    scenario.id, flow_id
                )));
            }
        }
        for hook in &scenario.post_run {
            if config.flow(&hook.flow).is_none() {
                issues.push(LintIssue::error(format!(
                    "Scenario '{}' post-run hook references unknown flow '{}'",
                    scenario.id, hook.flow
                )));
            }
        }
    }
}

fn check_nested_flow_refs(config: &Config, issues: &mut Vec<LintIssue>) {
    for flow in config.flows.values() {
        for step in &flow.steps {
            let nested = match step {
                Step::Group(group) => Some(&group.flow),
                Step::Iterate(iterate) => Some(&iterate.flow),
                _ => None,
            };
            if let Some(nested) = nested {
                if config.flow(nested).is_none() {
                    issues.push(LintIssue::error(format!(
                        "Step '{}' in flow '{}' references unknown flow '{}'",
                        step.id(),
                        flow.id,
                        nested
                    )));
                }
            }
        }
    }
}

fn check_target(flow: &Flow, step_id: &str, target: &NextTarget, issues: &mut Vec<LintIssue>) {
    if let NextTarget::Step(id) = target {
        if flow.step(id).is_none() {
            issues.push(LintIssue::error(format!(
                "Step '{}' in flow '{}' targets unknown step '{}'",
                step_id, flow.id, id
            )));
        }
    }
}

fn check_step_targets(config: &Config, issues: &mut Vec<LintIssue>) {
    for flow in config.flows.values() {
        for step in &flow.steps {
            let step_id = step.id();
            match step {
                Step::Branch(branch) => {
                    for clause in &branch.branches {
                        check_target(flow, step_id, &clause.next, issues);
                    }
                    if let Some(default_next) = &branch.default_next {
                        check_target(flow, step_id, &default_next.next, issues);
                    }
                    if branch.default_next.is_none() {
                        issues.push(
                            LintIssue::warning(format!(
                                "Branch step '{}' in flow '{}' has no defaultNext",
                                step_id, flow.id
                            ))
                            .with_detail("a run where no clause matches falls through with a warning"),
                        );
                    }
                }
                Step::Message(message) => {
                    if let Some(next) = &message.next {
                        check_target(flow, step_id, &next.next, issues);
                    }
                }
                Step::Compute(compute) => {
                    if let Some(next) = &compute.next {
                        check_target(flow, step_id, &next.next, issues);
                    }
                }
                Step::Command(command) => {
                    if let Some(on_success) = &command.on_success {
                        check_target(flow, step_id, &on_success.next, issues);
                    }
                    if let Some(on_error) = &command.on_error {
                        if let Some(default_next) = &on_error.default_next {
                            check_target(flow, step_id, &default_next.next, issues);
                        }
                        for action in &on_error.actions {
                            check_target(flow, step_id, &action.next, issues);
                        }
                        for target in on_error.policy.iter().flat_map(|policy| {
                            policy.map.values().chain(policy.default.as_ref())
                        }) {
                            check_target(flow, step_id, target, issues);
                        }
                        if let Some(auto) = &on_error.auto {
                            if let Some(target) = &auto.target {
                                if !matches!(target.as_str(), "retry" | "exit") {
                                    check_target(
                                        flow,
                                        step_id,
                                        &NextTarget::from_name(target),
                                        issues,
                                    );
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

fn check_preset_refs(config: &Config, issues: &mut Vec<LintIssue>) {
    for flow in config.flows.values() {
        for step in &flow.steps {
            let Step::Command(command) = step else {
                continue;
            };
            let references = command
                .commands
                .iter()
                .filter_map(|descriptor| descriptor.preset.as_deref())
                .chain(
                    command
                        .defaults
                        .as_ref()
                        .and_then(|defaults| defaults.preset.as_deref()),
                );
            for preset in references {
                if config.preset(preset).is_none() {
                    issues.push(LintIssue::error(format!(
                        "Step '{}' in flow '{}' references unknown preset '{}'",
                        step.id(),
                        flow.id,
                        preset
                    )));
                }
            }
        }
    }
}

fn check_unused_presets(config: &Config, issues: &mut Vec<LintIssue>) {
    let mut used = HashSet::new();
    for flow in config.flows.values() {
        for step in &flow.steps {
            if let Step::Command(command) = step {
                for descriptor in &command.commands {
                    if let Some(preset) = &descriptor.preset {
                        used.insert(preset.clone());
                    }
                }
                if let Some(preset) = command
                    .defaults
                    .as_ref()
                    .and_then(|defaults| defaults.preset.clone())
                {
                    used.insert(preset);
                }
            }
        }
    }
    for name in config.command_presets.keys() {
        if !used.contains(name) {
            issues.push(LintIssue::warning(format!(
                "Command preset '{name}' is never referenced"
            )));
        }
    }
}

fn check_error_actions(config: &Config, issues: &mut Vec<LintIssue>) {
    for flow in config.flows.values() {
        for step in &flow.steps {
            let Step::Command(command) = step else {
                continue;
            };
            let Some(on_error) = &command.on_error else {
                continue;
            };
            if !on_error.actions.is_empty()
                && on_error.policy.is_none()
                && on_error.default_next.is_none()
            {
                issues.push(
                    LintIssue::warning(format!(
                        "Step '{}' in flow '{}' declares recovery actions without a policy mapping or defaultNext",
                        step.id(),
                        flow.id
                    ))
                    .with_detail("non-interactive runs will exit on failure"),
                );
            }
        }
    }
}

fn check_guards(config: &Config, issues: &mut Vec<LintIssue>) {
    for flow in config.flows.values() {
        for step in &flow.steps {
            if let Step::GitWorktreeGuard(guard) = step {
                if guard.enabled_strategies().is_empty() {
                    issues.push(LintIssue::error(format!(
                        "Worktree guard '{}' in flow '{}' enables no strategy",
                        step.id(),
                        flow.id
                    )));
                }
            }
        }
    }
}

fn check_dynamic_commands(config: &Config, issues: &mut Vec<LintIssue>) {
    for flow in config.flows.values() {
        for step in &flow.steps {
            match step {
                Step::Iterate(iterate) => {
                    if let Some(IterateSource::Dynamic { dynamic }) = &iterate.source {
                        if dynamic.requires_command_execution() {
                            issues.push(
                                LintIssue::warning(format!(
                                    "Iterate step '{}' in flow '{}' sources items from a command provider",
                                    step.id(),
                                    flow.id
                                ))
                                .with_detail("command providers cannot run in the collect phase"),
                            );
                        }
                    }
                }
                Step::Prompt(prompt) => {
                    if let Some(dynamic) = &prompt.dynamic {
                        if dynamic.requires_command_execution() {
                            issues.push(
                                LintIssue::warning(format!(
                                    "Prompt '{}' in flow '{}' uses a command option provider",
                                    step.id(),
                                    flow.id
                                ))
                                .with_detail(
                                    "options will be preview-only in plans and rejected in collect",
                                ),
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// BFS over the flow reference graph from every scenario root. Flows the
/// search never reaches are reported.
fn check_reachability(config: &Config, issues: &mut Vec<LintIssue>) {
    let mut reached: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();

    for scenario in &config.scenarios {
        for flow_id in scenario.flow_sequence() {
            queue.push_back(flow_id.to_string());
        }
        for hook in &scenario.post_run {
            queue.push_back(hook.flow.clone());
        }
    }

    while let Some(flow_id) = queue.pop_front() {
        if !reached.insert(flow_id.clone()) {
            continue;
        }
        let Some(flow) = config.flow(&flow_id) else {
            continue;
        };
        for step in &flow.steps {
            match step {
                Step::Group(group) => queue.push_back(group.flow.clone()),
                Step::Iterate(iterate) => queue.push_back(iterate.flow.clone()),
                _ => {}
            }
        }
    }

    for flow_id in config.flows.keys() {
        if !reached.contains(flow_id) {
            issues.push(LintIssue::warning(format!(
                "Flow '{flow_id}' is not reachable from any scenario"
            )));
        }
    }
}

#[cfg(test)]
#[path = "lint_tests.rs"]
mod tests;
