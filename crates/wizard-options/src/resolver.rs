//! The options resolver: dispatches a `DynamicSource` to its provider,
//! with session/TTL/always caching layered on top.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use wizard_core::{CacheMode, CommandRequest, CommandRunner, DynamicSource, PromptOption};

use crate::cache::{cache_key, global_get, global_put};
use crate::error::ProviderError;
use crate::map::normalize_records;
use crate::providers::{
    glob_records, json_records, project_tsconfig_records, workspace_project_records,
};

pub struct OptionsResolver {
    repo_root: PathBuf,
    runner: Option<Arc<dyn CommandRunner>>,
    session_cache: Mutex<HashMap<String, Vec<Value>>>,
}

impl OptionsResolver {
    /// A resolver without a runner rejects command providers; the plan
    /// compiler and collect phase use that mode.
    pub fn new(repo_root: impl Into<PathBuf>, runner: Option<Arc<dyn CommandRunner>>) -> Self {
        Self {
            repo_root: repo_root.into(),
            runner,
            session_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn can_run_commands(&self) -> bool {
        self.runner.is_some()
    }

    /// Resolve a provider to normalized prompt options.
    pub async fn resolve_options(
        &self,
        source: &DynamicSource,
    ) -> Result<Vec<PromptOption>, ProviderError> {
        let records = self.resolve_records(source).await?;
        let mapping = match source {
            DynamicSource::Command { map, .. }
            | DynamicSource::Glob { map, .. }
            | DynamicSource::Json { map, .. } => map.as_ref(),
            _ => None,
        };
        Ok(normalize_records(&records, mapping))
    }

    /// Resolve a provider to its raw records (used by iterate).
    pub async fn resolve_records(
        &self,
        source: &DynamicSource,
    ) -> Result<Vec<Value>, ProviderError> {
        let cache_mode = source_cache(source);
        let key = cache_key(&self.repo_root, source);

        if let Some(mode) = cache_mode {
            match mode {
                CacheMode::Session => {
                    if let Some(records) = self
                        .session_cache
                        .lock()
                        .ok()
                        .and_then(|cache| cache.get(&key).cloned())
                    {
                        debug!(key = %key, "session cache hit");
                        return Ok(records);
                    }
                }
                CacheMode::Ttl { .. } | CacheMode::Always => {
                    if let Some(records) = global_get(&key) {
                        debug!(key = %key, "global cache hit");
                        return Ok(records);
                    }
                }
            }
        }

        let records = self.fetch(source).await?;

        if let Some(mode) = cache_mode {
            match mode {
                CacheMode::Session => {
                    if let Ok(mut cache) = self.session_cache.lock() {
                        cache.insert(key, records.clone());
                    }
                }
                CacheMode::Ttl { .. } | CacheMode::Always => {
                    global_put(key, records.clone(), mode);
                }
            }
        }

        Ok(records)
    }

    async fn fetch(&self, source: &DynamicSource) -> Result<Vec<Value>, ProviderError> {
        match source {
            DynamicSource::Command {
                command,
                cwd,
                shell,
                ..
            } => self.command_records(command, cwd.as_deref(), shell.as_deref()).await,
            DynamicSource::Glob { pattern, cwd, .. } => {
                glob_records(&self.repo_root, pattern, cwd.as_deref())
            }
            DynamicSource::Json { path, pointer, .. } => {
                json_records(&self.repo_root, path, pointer.as_deref())
            }
            DynamicSource::WorkspaceProjects {
                max_depth,
                ignore,
                cwd,
                ..
            } => workspace_project_records(&self.repo_root, cwd.as_deref(), *max_depth, ignore),
            DynamicSource::ProjectTsconfigs {
                project,
                allow_custom,
                ..
            } => project_tsconfig_records(&self.repo_root, project.as_deref(), *allow_custom),
        }
    }

    /// Run an external process and parse its stdout as JSON. Accepts a
    /// bare array or an object with an `options` array.
    async fn command_records(
        &self,
        command: &str,
        cwd: Option<&str>,
        shell: Option<&str>,
    ) -> Result<Vec<Value>, ProviderError> {
        let runner = self
            .runner
            .as_ref()
            .ok_or(ProviderError::CommandUnavailable)?;

        let request = CommandRequest {
            command: command.to_string(),
            cwd: Some(match cwd {
                Some(cwd) => self.repo_root.join(cwd),
                None => self.repo_root.clone(),
            }),
            env: Default::default(),
            shell: shell.map(str::to_string),
            timeout_ms: None,
            capture_stdout: true,
            quiet: true,
        };

        let outcome = runner
            .run(&request)
            .await
            .map_err(|err| ProviderError::Command {
                command: command.to_string(),
                message: err.to_string(),
            })?;
        if !outcome.success {
            return Err(ProviderError::Command {
                command: command.to_string(),
                message: format!(
                    "exit code {}",
                    outcome
                        .exit_code
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| "unknown".into())
                ),
            });
        }

        let parsed: Value =
            serde_json::from_str(outcome.stdout.trim()).map_err(|err| ProviderError::Command {
                command: command.to_string(),
                message: format!("stdout is not JSON: {err}"),
            })?;
        match parsed {
            Value::Array(items) => Ok(items),
            Value::Object(map) => match map.get("options") {
                Some(Value::Array(items)) => Ok(items.clone()),
                _ => Err(ProviderError::Command {
                    command: command.to_string(),
                    message: "expected a JSON array or {options: [...]}".into(),
                }),
            },
            _ => Err(ProviderError::Command {
                command: command.to_string(),
                message: "expected a JSON array or {options: [...]}".into(),
            }),
        }
    }
}

/// The cache mode configured on a provider, if any.
fn source_cache(source: &DynamicSource) -> Option<&CacheMode> {
    match source {
        DynamicSource::Command { cache, .. }
        | DynamicSource::Glob { cache, .. }
        | DynamicSource::Json { cache, .. }
        | DynamicSource::WorkspaceProjects { cache, .. }
        | DynamicSource::ProjectTsconfigs { cache, .. } => cache.as_ref(),
    }
}
