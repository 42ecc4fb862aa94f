//! The composer entry point: discovery → parse → imports → merge →
//! canonical `Config` plus resolution diagnostics.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use wizard_core::{Config, PluginRef};

use crate::discovery::{ConfigResolution, DiscoveryRequest, ResolutionSource, discover};
use crate::document::{LoadedDocument, RawPluginEntry, document_warnings, validate_document};
use crate::error::ComposeError;
use crate::imports::{ImportStack, resolve_import};
use crate::merge::merge_documents;
use crate::parse::parse_file;

#[derive(Debug, Clone)]
pub struct ComposeOptions {
    pub cwd: PathBuf,
    pub explicit_paths: Vec<PathBuf>,
    pub environment: Option<String>,
    pub include_local: bool,
}

impl ComposeOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            explicit_paths: Vec::new(),
            environment: None,
            include_local: true,
        }
    }
}

#[derive(Debug)]
pub struct ComposeOutcome {
    pub config: Config,
    pub resolution: ConfigResolution,
}

/// Compose the canonical config for a workspace. Any hard failure is an
/// error result; there is no partial `Config`.
pub fn compose(options: &ComposeOptions) -> Result<ComposeOutcome, ComposeError> {
    let request = DiscoveryRequest {
        cwd: options.cwd.clone(),
        explicit_paths: options.explicit_paths.clone(),
        environment: options.environment.clone(),
        include_local: options.include_local,
    };
    let (paths, mut resolution) = discover(&request);
    if !resolution.errors.is_empty() {
        return Err(ComposeError::Discovery {
            errors: resolution.errors.clone(),
        });
    }

    let mut loader = Loader {
        loaded: Vec::new(),
        visited: HashSet::new(),
        stack: ImportStack::new(),
    };
    for path in &paths {
        loader.load(path, &mut resolution)?;
    }
    debug!(files = loader.loaded.len(), "composed config documents");

    let outcome = merge_documents(&loader.loaded)?;
    resolution.warnings.extend(outcome.warnings);

    Ok(ComposeOutcome {
        config: outcome.config,
        resolution,
    })
}

struct Loader {
    loaded: Vec<LoadedDocument>,
    visited: HashSet<PathBuf>,
    stack: ImportStack,
}

impl Loader {
    /// Load one file depth-first: its imports merge before the file
    /// itself, so imported documents act as the base layer.
    fn load(&mut self, path: &Path, resolution: &mut ConfigResolution) -> Result<(), ComposeError> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.visited.contains(&canonical) {
            return Ok(());
        }
        self.stack.enter(path)?;

        let result = self.load_inner(path, &canonical, resolution);
        self.stack.leave();
        result
    }

    fn load_inner(
        &mut self,
        path: &Path,
        canonical: &Path,
        resolution: &mut ConfigResolution,
    ) -> Result<(), ComposeError> {
        let raw = parse_file(path)?;
        let document = validate_document(path, &raw)?;
        for warning in document_warnings(path, &raw, &document) {
            resolution.warn(warning);
        }

        for specifier in document.imports.clone() {
            let imported = resolve_import(&specifier, path)?;
            resolution.probe(imported.clone(), ResolutionSource::Import, true);
            self.load(&imported, resolution)?;
        }

        let plugin_refs = resolve_plugins(&document.plugins, path)?;
        self.visited.insert(canonical.to_path_buf());
        self.loaded.push(LoadedDocument {
            path: path.to_path_buf(),
            document,
            plugin_refs,
        });
        Ok(())
    }
}

/// Resolve plugin module specifiers against the filesystem. A module that
/// cannot be found is a config error.
fn resolve_plugins(
    entries: &[RawPluginEntry],
    file: &Path,
) -> Result<Vec<PluginRef>, ComposeError> {
    let base_dir = file.parent().unwrap_or_else(|| Path::new("."));
    let mut refs = Vec::new();

    for entry in entries {
        let module = entry.module();
        let resolved_path = if module.starts_with("./")
            || module.starts_with("../")
            || module.starts_with('/')
        {
            let candidate = if module.starts_with('/') {
                PathBuf::from(module)
            } else {
                base_dir.join(module)
            };
            if !candidate.exists() {
                return Err(ComposeError::UnknownPluginModule {
                    module: module.to_string(),
                    source_path: file.to_path_buf(),
                });
            }
            Some(candidate)
        } else {
            let found = base_dir.ancestors().find_map(|ancestor| {
                let candidate = ancestor.join("node_modules").join(module);
                candidate.exists().then_some(candidate)
            });
            match found {
                Some(path) => Some(path),
                None => {
                    return Err(ComposeError::UnknownPluginModule {
                        module: module.to_string(),
                        source_path: file.to_path_buf(),
                    });
                }
            }
        };

        refs.push(PluginRef {
            module: module.to_string(),
            resolved_path,
            options: entry.options().cloned(),
            source: Some(file.to_path_buf()),
        });
    }

    Ok(refs)
}

#[cfg(test)]
#[path = "compose_tests.rs"]
mod tests;
