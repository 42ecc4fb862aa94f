//! Narrow interfaces for the external collaborators: the prompt UI, the
//! template/expression engines, the command runner, plugin modules, the
//! answer store, and compute handlers. The engine only ever sees these
//! traits; concrete frontends live outside the core.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::TemplateContext;
use crate::error::{CommandError, EvalError, PromptError, TemplateError};
use crate::events::RunStatus;
use crate::step::{AnswerScope, NextTarget, PluginStep, PromptMode, PromptOption};

// ── Prompting ────────────────────────────────────────────────────

/// One prompt put to the user.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub flow_id: String,
    pub step_id: String,
    pub mode: PromptMode,
    pub message: String,
    pub options: Vec<PromptOption>,
    pub default_value: Option<Value>,
    pub required: bool,
    pub show_selection_order: bool,
}

/// The terminal (or test double) that collects answers.
#[async_trait]
pub trait PromptDriver: Send + Sync {
    async fn prompt(&self, request: PromptRequest) -> Result<Value, PromptError>;

    /// Whether a human is attached. Non-interactive drivers make blocked
    /// policies fatal and failure-recovery menus fall through to defaults.
    fn is_interactive(&self) -> bool;
}

// ── Templates & expressions ──────────────────────────────────────

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, ctx: &TemplateContext) -> Result<String, TemplateError>;
}

pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, ctx: &TemplateContext) -> Result<Value, EvalError>;
}

// ── Command running ──────────────────────────────────────────────

/// A fully resolved process invocation.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub shell: Option<String>,
    pub timeout_ms: Option<u64>,
    pub capture_stdout: bool,
    pub quiet: bool,
}

/// What happened. Non-zero exits and timeouts are outcomes, not errors.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutcome, CommandError>;
}

// ── Plugins ──────────────────────────────────────────────────────

/// What a plugin step handler receives: the raw step document plus a
/// snapshot of the run it can read.
#[derive(Debug, Clone)]
pub struct PluginInvocation {
    pub flow_id: String,
    pub step: PluginStep,
    pub answers: serde_json::Map<String, Value>,
    pub repo_root: PathBuf,
    pub dry_run: bool,
}

/// Normalized plugin result.
#[derive(Debug, Clone)]
pub struct PluginOutcome {
    pub status: RunStatus,
    pub next: Option<NextTarget>,
    /// Values merged into `answers` after the handler returns.
    pub store: serde_json::Map<String, Value>,
}

impl Default for PluginOutcome {
    fn default() -> Self {
        Self {
            status: RunStatus::Success,
            next: None,
            store: serde_json::Map::new(),
        }
    }
}

#[async_trait]
pub trait PluginHandler: Send + Sync {
    async fn run(&self, invocation: PluginInvocation) -> anyhow::Result<PluginOutcome>;

    /// Optional plan-time preview. `None` makes the compiler fall back to
    /// a bare plugin-plan stub.
    fn plan(&self, _invocation: &PluginInvocation) -> Option<Value> {
        None
    }
}

/// Read-only after load.
#[derive(Default)]
pub struct PluginRegistry {
    handlers: HashMap<String, Arc<dyn PluginHandler>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, step_type: impl Into<String>, handler: Arc<dyn PluginHandler>) {
        self.handlers.insert(step_type.into(), handler);
    }

    pub fn handler(&self, step_type: &str) -> Option<Arc<dyn PluginHandler>> {
        self.handlers.get(step_type).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ── Compute handlers ─────────────────────────────────────────────

#[async_trait]
pub trait ComputeHandler: Send + Sync {
    async fn compute(&self, params: Value) -> anyhow::Result<Value>;
}

#[derive(Default)]
pub struct ComputeRegistry {
    handlers: HashMap<String, Arc<dyn ComputeHandler>>,
}

impl ComputeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ComputeHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn ComputeHandler>> {
        self.handlers.get(name).cloned()
    }
}

// ── Answer persistence ───────────────────────────────────────────

/// Cross-run prompt answer store, scoped per scenario or per project.
pub trait AnswerStore: Send + Sync {
    fn get(&self, scope: AnswerScope, key: &str, project_id: Option<&str>) -> Option<Value>;

    /// Writes only when the value differs (deep inequality).
    fn set(&mut self, scope: AnswerScope, key: &str, project_id: Option<&str>, value: Value);

    /// Flush to durable storage; a no-op when nothing changed.
    fn save(&mut self) -> anyhow::Result<()>;

    fn reset_all_answers(&mut self);

    /// The answers file name, when file-backed (exposed to templates).
    fn file_name(&self) -> Option<String> {
        None
    }
}
