//! The step sum type and its per-kind payloads.
//!
//! Steps are discriminated by `type`. Anything that is not one of the
//! builtin kinds deserializes into the `plugin` variant carrying the raw
//! document, so plugin modules can define their own step shapes.

use indexmap::IndexMap;
use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::command::{CommandDefaults, CommandDescriptor};

/// Fields every step variant carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCommon {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A control transfer target: `exit`, `repeat`, or a step id in the same flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NextTarget {
    Exit,
    Repeat,
    Step(String),
}

impl NextTarget {
    pub fn from_name(name: &str) -> NextTarget {
        match name {
            "exit" => NextTarget::Exit,
            "repeat" => NextTarget::Repeat,
            other => NextTarget::Step(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NextTarget::Exit => "exit",
            NextTarget::Repeat => "repeat",
            NextTarget::Step(id) => id,
        }
    }
}

impl Serialize for NextTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NextTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(NextTarget::from_name(&name))
    }
}

impl std::fmt::Display for NextTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wrapped transfer (`{ "next": "step-id" }`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub next: NextTarget,
}

// ── Prompt steps ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    Input,
    Confirm,
    Select,
    Multiselect,
}

/// A normalized selectable option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOption {
    pub value: Value,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

/// Static options accept either a bare string or a full option object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StaticOption {
    Label(String),
    Full(PromptOption),
}

impl StaticOption {
    pub fn normalize(&self) -> PromptOption {
        match self {
            StaticOption::Label(label) => PromptOption {
                value: Value::String(label.clone()),
                label: label.clone(),
                hint: None,
                disabled: false,
            },
            StaticOption::Full(option) => option.clone(),
        }
    }
}

/// Maps raw provider records into option fields via dotted path expressions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_when: Option<String>,
}

/// Provider result caching: per-run, TTL-bounded, or forever.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheMode {
    Session,
    Ttl { ttl_ms: u64 },
    Always,
}

impl Serialize for CacheMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CacheMode::Session => serializer.serialize_str("session"),
            CacheMode::Always => serializer.serialize_str("always"),
            CacheMode::Ttl { ttl_ms } => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("ttlMs", ttl_ms)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for CacheMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::String(mode) => match mode.as_str() {
                "session" => Ok(CacheMode::Session),
                "always" => Ok(CacheMode::Always),
                other => Err(D::Error::custom(format!(
                    "unknown cache mode '{other}' (expected 'session', 'always', or {{ttlMs}})"
                ))),
            },
            Value::Object(map) => {
                let ttl_ms = map
                    .get("ttlMs")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| D::Error::custom("cache object requires a numeric 'ttlMs'"))?;
                Ok(CacheMode::Ttl { ttl_ms })
            }
            _ => Err(D::Error::custom("cache must be a string or {ttlMs} object")),
        }
    }
}

/// Dynamic option providers, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DynamicSource {
    /// Run an external process; stdout is parsed as JSON and normalized.
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shell: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map: Option<OptionMapping>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache: Option<CacheMode>,
    },
    /// File matches under a cwd, relative-labeled.
    Glob {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map: Option<OptionMapping>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache: Option<CacheMode>,
    },
    /// A JSON document traversed with an optional JSON Pointer.
    Json {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pointer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map: Option<OptionMapping>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache: Option<CacheMode>,
    },
    /// Walk the workspace tree; every directory holding a package.json
    /// becomes a project option.
    WorkspaceProjects {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_depth: Option<usize>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ignore: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache: Option<CacheMode>,
    },
    /// tsconfig*.json files inside a project directory plus a synthetic
    /// "Custom path…" entry unless disabled.
    ProjectTsconfigs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        allow_custom: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache: Option<CacheMode>,
    },
}

impl DynamicSource {
    /// Whether resolving this provider requires spawning a process.
    pub fn requires_command_execution(&self) -> bool {
        matches!(self, DynamicSource::Command { .. })
    }
}

/// Prompt answer validation rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Answer persistence scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerScope {
    #[default]
    Scenario,
    Project,
}

/// `persist` accepts `true`/`false` or `{ "scope": "project" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersistSpec {
    Enabled(bool),
    Scoped { scope: AnswerScope },
}

impl PersistSpec {
    pub fn scope(&self) -> Option<AnswerScope> {
        match self {
            PersistSpec::Enabled(false) => None,
            PersistSpec::Enabled(true) => Some(AnswerScope::Scenario),
            PersistSpec::Scoped { scope } => Some(*scope),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStep {
    #[serde(flatten)]
    pub common: StepCommon,
    pub mode: PromptMode,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<StaticOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_as: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub show_selection_order: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<PromptValidation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist: Option<PersistSpec>,
}

impl PromptStep {
    /// The answers key this prompt writes: `storeAs`, falling back to the id.
    pub fn answer_key(&self) -> &str {
        self.store_as.as_deref().unwrap_or(&self.common.id)
    }
}

// ── Command steps ────────────────────────────────────────────────

/// Automatic failure recovery strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoStrategy {
    Retry,
    Default,
    Transition,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoRecovery {
    pub strategy: AutoStrategy,
    #[serde(default = "default_auto_limit")]
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

fn default_auto_limit() -> u32 {
    1
}

/// Maps a stored answer to a recovery transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPolicy {
    pub key: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub map: IndexMap<String, NextTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<NextTarget>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorAction {
    pub label: String,
    pub next: NextTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto: Option<AutoRecovery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ErrorPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ErrorAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_next: Option<Transition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStep {
    #[serde(flatten)]
    pub common: StepCommon,
    pub commands: Vec<CommandDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<CommandDefaults>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continue_on_error: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub collect_safe: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<Transition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

// ── Remaining builtin kinds ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStep {
    #[serde(flatten)]
    pub common: StepCommon,
    #[serde(default)]
    pub level: MessageLevel,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Transition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchClause {
    pub when: String,
    pub next: NextTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchStep {
    #[serde(flatten)]
    pub common: StepCommon,
    pub branches: Vec<BranchClause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_next: Option<Transition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStep {
    #[serde(flatten)]
    pub common: StepCommon,
    pub flow: String,
}

/// Item sources for `iterate`, discriminated by `from`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "kebab-case")]
pub enum IterateSource {
    Answers {
        key: String,
    },
    Json {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pointer: Option<String>,
    },
    Dynamic {
        #[serde(flatten)]
        dynamic: DynamicSource,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterateStep {
    #[serde(flatten)]
    pub common: StepCommon,
    pub flow: String,
    /// A literal array or a template string that renders to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<IterateSource>,
    /// Shorthand for iterating a stored answer list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_each_as: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeStep {
    #[serde(flatten)]
    pub common: StepCommon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<IndexMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_as: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Transition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeGuardStep {
    #[serde(flatten)]
    pub common: StepCommon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dirty_message: Option<String>,
    #[serde(default = "default_true")]
    pub allow_commit: bool,
    #[serde(default = "default_true")]
    pub allow_stash: bool,
    #[serde(default)]
    pub allow_branch: bool,
    #[serde(default)]
    pub allow_proceed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_strategy_as: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

fn default_true() -> bool {
    true
}

impl WorktreeGuardStep {
    /// Strategy flags in presentation order.
    pub fn enabled_strategies(&self) -> Vec<&'static str> {
        let mut strategies = Vec::new();
        if self.allow_commit {
            strategies.push("commit-push");
        }
        if self.allow_stash {
            strategies.push("stash");
        }
        if self.allow_branch {
            strategies.push("branch");
        }
        if self.allow_proceed {
            strategies.push("proceed");
        }
        strategies
    }
}

/// A step whose `type` is not a builtin: dispatched through the plugin
/// registry. `config` keeps the raw document (including `type`).
#[derive(Debug, Clone, PartialEq)]
pub struct PluginStep {
    pub common: StepCommon,
    pub step_type: String,
    pub config: Value,
}

// ── The sum type ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Prompt(PromptStep),
    Command(CommandStep),
    Message(MessageStep),
    Branch(BranchStep),
    Group(GroupStep),
    Iterate(IterateStep),
    Compute(ComputeStep),
    GitWorktreeGuard(WorktreeGuardStep),
    Plugin(PluginStep),
}

impl Step {
    pub fn common(&self) -> &StepCommon {
        match self {
            Step::Prompt(step) => &step.common,
            Step::Command(step) => &step.common,
            Step::Message(step) => &step.common,
            Step::Branch(step) => &step.common,
            Step::Group(step) => &step.common,
            Step::Iterate(step) => &step.common,
            Step::Compute(step) => &step.common,
            Step::GitWorktreeGuard(step) => &step.common,
            Step::Plugin(step) => &step.common,
        }
    }

    pub fn id(&self) -> &str {
        &self.common().id
    }

    /// The wire discriminator for this step.
    pub fn type_name(&self) -> &str {
        match self {
            Step::Prompt(_) => "prompt",
            Step::Command(_) => "command",
            Step::Message(_) => "message",
            Step::Branch(_) => "branch",
            Step::Group(_) => "group",
            Step::Iterate(_) => "iterate",
            Step::Compute(_) => "compute",
            Step::GitWorktreeGuard(_) => "git-worktree-guard",
            Step::Plugin(step) => &step.step_type,
        }
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        let step_type = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::custom("step requires a string 'type' field"))?
            .to_string();

        fn typed<T: serde::de::DeserializeOwned, E: DeError>(raw: &Value) -> Result<T, E> {
            serde_json::from_value(raw.clone()).map_err(E::custom)
        }

        match step_type.as_str() {
            "prompt" => typed(&raw).map(Step::Prompt),
            "command" => typed(&raw).map(Step::Command),
            "message" => typed(&raw).map(Step::Message),
            "branch" => typed(&raw).map(Step::Branch),
            "group" => typed(&raw).map(Step::Group),
            "iterate" => typed(&raw).map(Step::Iterate),
            "compute" => typed(&raw).map(Step::Compute),
            "git-worktree-guard" => typed(&raw).map(Step::GitWorktreeGuard),
            _ => {
                let common: StepCommon = typed(&raw)?;
                Ok(Step::Plugin(PluginStep {
                    common,
                    step_type,
                    config: raw,
                }))
            }
        }
    }
}

impl Serialize for Step {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        fn tagged<T: Serialize, E: SerError>(step: &T, tag: &str) -> Result<Value, E> {
            let mut value = serde_json::to_value(step).map_err(E::custom)?;
            if let Value::Object(map) = &mut value {
                map.insert("type".to_string(), Value::String(tag.to_string()));
            }
            Ok(value)
        }

        let value = match self {
            Step::Prompt(step) => tagged(step, "prompt")?,
            Step::Command(step) => tagged(step, "command")?,
            Step::Message(step) => tagged(step, "message")?,
            Step::Branch(step) => tagged(step, "branch")?,
            Step::Group(step) => tagged(step, "group")?,
            Step::Iterate(step) => tagged(step, "iterate")?,
            Step::Compute(step) => tagged(step, "compute")?,
            Step::GitWorktreeGuard(step) => tagged(step, "git-worktree-guard")?,
            Step::Plugin(step) => step.config.clone(),
        };
        value.serialize(serializer)
    }
}
