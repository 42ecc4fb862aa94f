//! Group and iterate steps: nested flow execution.

use serde_json::Value;

use wizard_core::{
    DynamicSource, GroupStep, IterateSource, IterateStep, IterationState, MessageLevel,
    NextTarget, RunStatus, normalize_item_list,
};

use crate::error::ExecutionError;
use crate::executor::{FlowOutcome, ScenarioExecutor, StepResult};

impl ScenarioExecutor {
    pub(crate) async fn run_group(
        &mut self,
        step: &GroupStep,
    ) -> Result<StepResult, ExecutionError> {
        let outcome = self.run_flow(&step.flow, false).await?;
        if outcome == FlowOutcome::ExitedEarly {
            return Ok(StepResult::with_next(Some(NextTarget::Exit)));
        }
        Ok(StepResult::advance())
    }

    pub(crate) async fn run_iterate(
        &mut self,
        step: &IterateStep,
    ) -> Result<StepResult, ExecutionError> {
        let items = self.resolve_iterate_items(step).await?;

        if items.is_empty() {
            self.note(
                MessageLevel::Warning,
                &format!("Iterate '{}' has no items; skipping", step.common.id),
            );
            return Ok(StepResult::advance());
        }

        if step.concurrency.is_some_and(|concurrency| concurrency > 1) {
            self.note(
                MessageLevel::Warning,
                &format!(
                    "Iterate '{}' requests concurrency but children run sequentially",
                    step.common.id
                ),
            );
        }

        // Both the iteration frame and any shadowed answer are restored
        // when the loop ends.
        let previous_iteration = self.state.iteration.take();
        let previous_stored = step
            .store_each_as
            .as_ref()
            .map(|key| (key.clone(), self.state.answers.get(key).cloned()));

        let total = items.len();
        let failed_before = self.state.failed_steps;
        let mut exited = false;

        for (index, item) in items.into_iter().enumerate() {
            self.state.iteration = Some(IterationState {
                index,
                total,
                value: item.clone(),
                key: item
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
            if let Some(key) = &step.store_each_as {
                self.state.answers.insert(key.clone(), item);
            }

            let outcome = self.run_flow(&step.flow, false).await?;
            if outcome == FlowOutcome::ExitedEarly {
                exited = true;
                break;
            }
        }

        self.state.iteration = previous_iteration;
        if let Some((key, previous)) = previous_stored {
            match previous {
                Some(value) => {
                    self.state.answers.insert(key, value);
                }
                None => {
                    self.state.answers.remove(&key);
                }
            }
        }

        let any_failed = self.state.failed_steps > failed_before;
        if any_failed {
            self.note(
                MessageLevel::Warning,
                &format!("Iterate '{}' saw failures in nested runs", step.common.id),
            );
        }

        Ok(StepResult {
            next: exited.then_some(NextTarget::Exit),
            status: if any_failed {
                RunStatus::Warning
            } else {
                RunStatus::Success
            },
        })
    }

    async fn resolve_iterate_items(
        &mut self,
        step: &IterateStep,
    ) -> Result<Vec<Value>, ExecutionError> {
        let ctx = self.ctx(step.common.metadata.as_ref());

        if let Some(items) = &step.items {
            return match items {
                Value::Array(values) => Ok(values.clone()),
                Value::String(template) => {
                    let rendered = self.render(template, &ctx);
                    Ok(normalize_item_list(&rendered))
                }
                other => {
                    self.note(
                        MessageLevel::Warning,
                        &format!(
                            "Iterate '{}' items must be an array or template, got {other}",
                            step.common.id
                        ),
                    );
                    Ok(Vec::new())
                }
            };
        }

        if let Some(over) = &step.over {
            return Ok(self
                .state
                .answers
                .get(over)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default());
        }

        let Some(source) = &step.source else {
            return Ok(Vec::new());
        };

        match source {
            IterateSource::Answers { key } => Ok(self
                .state
                .answers
                .get(key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()),
            IterateSource::Json { path, pointer } => {
                let dynamic = DynamicSource::Json {
                    path: path.clone(),
                    pointer: pointer.clone(),
                    map: None,
                    cache: None,
                };
                match self.options_resolver.resolve_records(&dynamic).await {
                    Ok(records) => Ok(records),
                    Err(err) => {
                        self.note(
                            MessageLevel::Warning,
                            &format!("Iterate '{}': {err}", step.common.id),
                        );
                        Ok(Vec::new())
                    }
                }
            }
            IterateSource::Dynamic { dynamic } => {
                if self.options.collect && dynamic.requires_command_execution() {
                    return Err(ExecutionError::CollectDynamicCommand(step.common.id.clone()));
                }
                match self.options_resolver.resolve_records(dynamic).await {
                    Ok(records) => Ok(records),
                    Err(err) => {
                        self.note(
                            MessageLevel::Warning,
                            &format!("Iterate '{}': {err}", step.common.id),
                        );
                        Ok(Vec::new())
                    }
                }
            }
        }
    }
}
