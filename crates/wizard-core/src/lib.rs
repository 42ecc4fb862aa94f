//! Core data model and collaborator interfaces for the dev-wizard engine.

pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod policy;
pub mod render;
pub mod state;
pub mod step;
pub mod traits;

pub use command::{
    CommandDefaults, CommandDescriptor, CommandKnobs, CommandPreset, DryRunStrategy, EnvDiffEntry,
    EnvSource, ParseJsonOnError, ParseJsonSpec, ResolvedCommand, StoreWhen, merge_env,
    resolve_command,
};
pub use config::{
    Config, Flow, IdentityConfig, IdentitySegmentConfig, Meta, PluginRef, PostRunHook, PostRunWhen,
    SUPPORTED_SCHEMA_VERSION, Scenario,
};
pub use context::{
    TemplateContext, TemplateContextArgs, build_template_context, is_truthy, normalize_item_list,
};
pub use error::{CommandError, EvalError, PluginError, PromptError, TemplateError};
pub use events::{AnswerSource, CollectorSink, LogSink, RunStatus, WizardEvent};
pub use policy::{OneOrMany, Policies, PolicyLevel, PolicyMatch, PolicyRule};
pub use render::{SimpleExpressionEvaluator, SimpleTemplateRenderer};
pub use state::{
    CommandExecutionRecord, ErrorShape, FlowRun, Identity, IdentitySegment,
    IntegrationTimingEntry, IterationState, PolicyDecisionRecord, RetryRecord, RunPhase,
    SkipRecord, TimingRun, TimingTask, WizardState,
};
pub use step::{
    AnswerScope, AutoRecovery, AutoStrategy, BranchClause, BranchStep, CacheMode, CommandStep,
    ComputeStep, DynamicSource, ErrorAction, ErrorPolicy, GroupStep, IterateSource, IterateStep,
    MessageLevel, MessageStep, NextTarget, OnError, OptionMapping, PersistSpec, PluginStep,
    PromptMode, PromptOption, PromptStep, PromptValidation, Recommendation, StaticOption, Step,
    StepCommon, Transition, WorktreeGuardStep,
};
pub use traits::{
    AnswerStore, CommandOutcome, CommandRequest, CommandRunner, ComputeHandler, ComputeRegistry,
    ExpressionEvaluator, PluginHandler, PluginInvocation, PluginOutcome, PluginRegistry,
    PromptDriver, PromptRequest, TemplateRenderer,
};
