//! Message, branch, and compute steps.

use chrono::Utc;
use serde_json::Value;

use wizard_core::{
    BranchStep, ComputeStep, MessageLevel, MessageStep, RunStatus, WizardEvent, is_truthy,
};

use crate::error::ExecutionError;
use crate::executor::{ScenarioExecutor, StepResult};

impl ScenarioExecutor {
    pub(crate) fn run_message(&mut self, step: &MessageStep) -> Result<StepResult, ExecutionError> {
        let ctx = self.ctx(step.common.metadata.as_ref());
        let text = self.render(&step.text, &ctx);
        self.note(step.level, &text);

        let status = match step.level {
            MessageLevel::Warning => RunStatus::Warning,
            MessageLevel::Error => RunStatus::Failure,
            _ => RunStatus::Success,
        };
        Ok(StepResult {
            next: step.next.as_ref().map(|transition| transition.next.clone()),
            status,
        })
    }

    pub(crate) fn run_branch(
        &mut self,
        flow_id: &str,
        step: &BranchStep,
    ) -> Result<StepResult, ExecutionError> {
        let ctx = self.ctx(step.common.metadata.as_ref());

        for (index, clause) in step.branches.iter().enumerate() {
            let rendered = self.render(&clause.when, &ctx);
            let value = match self.deps.evaluator.evaluate(&rendered, &ctx) {
                Ok(value) => value,
                Err(err) => {
                    self.note(
                        MessageLevel::Warning,
                        &format!("Branch '{}' clause {index}: {err}", step.common.id),
                    );
                    Value::Null
                }
            };
            if is_truthy(&value) {
                self.emit(WizardEvent::BranchDecision {
                    flow_id: flow_id.to_string(),
                    step_id: step.common.id.clone(),
                    clause_index: Some(index),
                    when: Some(clause.when.clone()),
                    next: clause.next.as_str().to_string(),
                    used_default: false,
                    at: Utc::now(),
                });
                return Ok(StepResult::with_next(Some(clause.next.clone())));
            }
        }

        if let Some(default_next) = &step.default_next {
            self.emit(WizardEvent::BranchDecision {
                flow_id: flow_id.to_string(),
                step_id: step.common.id.clone(),
                clause_index: None,
                when: None,
                next: default_next.next.as_str().to_string(),
                used_default: true,
                at: Utc::now(),
            });
            return Ok(StepResult::with_next(Some(default_next.next.clone())));
        }

        self.note(
            MessageLevel::Warning,
            &format!("Branch '{}' selected no target", step.common.id),
        );
        Ok(StepResult {
            next: None,
            status: RunStatus::Warning,
        })
    }

    pub(crate) async fn run_compute(
        &mut self,
        step: &ComputeStep,
    ) -> Result<StepResult, ExecutionError> {
        let ctx = self.ctx(step.common.metadata.as_ref());

        if let Some(values) = &step.values {
            for (key, value) in values {
                let rendered = self.render_value(value, &ctx);
                self.state.answers.insert(key.clone(), rendered);
            }
        }

        if let Some(handler_name) = &step.handler {
            let handler = self
                .deps
                .compute
                .handler(handler_name)
                .ok_or_else(|| ExecutionError::ComputeHandlerMissing(handler_name.clone()))?;
            let params = step
                .params
                .as_ref()
                .map(|params| self.render_value(params, &ctx))
                .unwrap_or(Value::Null);
            let result =
                handler
                    .compute(params)
                    .await
                    .map_err(|err| ExecutionError::ComputeFailed {
                        handler: handler_name.clone(),
                        message: err.to_string(),
                    })?;

            match &step.store_as {
                Some(store_as) => {
                    self.state.answers.insert(store_as.clone(), result);
                }
                None => match result {
                    Value::Object(map) => {
                        for (key, value) in map {
                            self.state.answers.insert(key, value);
                        }
                    }
                    _ => {
                        return Err(ExecutionError::ComputeResultNotObject(
                            step.common.id.clone(),
                        ));
                    }
                },
            }
        }

        Ok(StepResult::with_next(
            step.next.as_ref().map(|transition| transition.next.clone()),
        ))
    }
}
