//! Plugin step dispatch through the registry.

use wizard_core::{PluginInvocation, PluginStep};

use crate::error::ExecutionError;
use crate::executor::{ScenarioExecutor, StepResult};

impl ScenarioExecutor {
    pub(crate) async fn run_plugin(
        &mut self,
        flow_id: &str,
        step: &PluginStep,
    ) -> Result<StepResult, ExecutionError> {
        let handler = self
            .deps
            .plugins
            .handler(&step.step_type)
            .ok_or_else(|| ExecutionError::UnknownPluginType(step.step_type.clone()))?;

        let invocation = PluginInvocation {
            flow_id: flow_id.to_string(),
            step: step.clone(),
            answers: self.state.answers.clone(),
            repo_root: self.options.repo_root.clone(),
            dry_run: self.options.dry_run,
        };

        let outcome = handler
            .run(invocation)
            .await
            .map_err(|err| ExecutionError::PluginFailed {
                step: step.common.id.clone(),
                message: err.to_string(),
            })?;

        for (key, value) in outcome.store {
            self.state.answers.insert(key, value);
        }

        Ok(StepResult {
            next: outcome.next,
            status: outcome.status,
        })
    }
}
