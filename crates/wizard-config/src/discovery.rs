//! Config file discovery: root candidates, the `dev-wizard-config/`
//! directory overlay, environment and local overlays, and `package.json`
//! pointers. Every probed location lands in the resolution diagnostics.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

pub const CONFIG_EXTENSIONS: [&str; 4] = ["yaml", "yml", "json", "json5"];
pub const ROOT_BASENAME: &str = "dev-wizard.config";
pub const OVERLAY_DIR: &str = "dev-wizard-config";

/// Which discovery phase produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionSource {
    Explicit,
    RootCandidate,
    OverlayBase,
    OverlayEnvironment,
    OverlayLocal,
    RootLocal,
    PackageJson,
    Import,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionEntry {
    pub path: PathBuf,
    pub source: ResolutionSource,
    pub found: bool,
}

/// The diagnostic record for one composition: every probed location,
/// warnings, and discovery errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResolution {
    pub entries: Vec<ResolutionEntry>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigResolution {
    pub fn probe(&mut self, path: PathBuf, source: ResolutionSource, found: bool) {
        self.entries.push(ResolutionEntry {
            path,
            source,
            found,
        });
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// The files that were actually found, in discovery order.
    pub fn found_paths(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|entry| entry.found)
            .map(|entry| entry.path.clone())
            .collect()
    }
}

/// What to discover.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub cwd: PathBuf,
    /// When non-empty, used verbatim; the other phases are skipped.
    pub explicit_paths: Vec<PathBuf>,
    pub environment: Option<String>,
    pub include_local: bool,
}

impl DiscoveryRequest {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            explicit_paths: Vec::new(),
            environment: None,
            include_local: true,
        }
    }
}

/// Run discovery, returning the load list (in order, deduplicated by
/// absolute path) and the diagnostics.
pub fn discover(request: &DiscoveryRequest) -> (Vec<PathBuf>, ConfigResolution) {
    let mut resolution = ConfigResolution::default();

    if !request.explicit_paths.is_empty() {
        for path in &request.explicit_paths {
            let absolute = absolutize(&request.cwd, path);
            let found = absolute.is_file();
            if !found {
                resolution.error(format!(
                    "Explicit config path not found: {}",
                    absolute.display()
                ));
            }
            resolution.probe(absolute, ResolutionSource::Explicit, found);
        }
        let paths = dedup_paths(resolution.found_paths());
        return (paths, resolution);
    }

    // Phase 2: root candidates.
    for extension in CONFIG_EXTENSIONS {
        let candidate = request.cwd.join(format!("{ROOT_BASENAME}.{extension}"));
        let found = candidate.is_file();
        resolution.probe(candidate, ResolutionSource::RootCandidate, found);
    }

    // Phase 3: directory overlay.
    let overlay_dir = request.cwd.join(OVERLAY_DIR);
    probe_index_files(
        &overlay_dir,
        ResolutionSource::OverlayBase,
        &mut resolution,
    );
    if let Some(environment) = &request.environment {
        probe_index_files(
            &overlay_dir.join("environments").join(environment),
            ResolutionSource::OverlayEnvironment,
            &mut resolution,
        );
    }
    if request.include_local {
        probe_index_files(
            &overlay_dir.join("local"),
            ResolutionSource::OverlayLocal,
            &mut resolution,
        );
        for extension in CONFIG_EXTENSIONS {
            let candidate = request
                .cwd
                .join(format!("{ROOT_BASENAME}.local.{extension}"));
            let found = candidate.is_file();
            resolution.probe(candidate, ResolutionSource::RootLocal, found);
        }
    }

    // Phase 4: package.json `wizard.config`.
    probe_package_json(&request.cwd, &mut resolution);

    let paths = dedup_paths(resolution.found_paths());
    (paths, resolution)
}

/// Probe `index.*` inside a directory, sorted lexicographically by file
/// name so overlay ordering is deterministic.
fn probe_index_files(dir: &Path, source: ResolutionSource, resolution: &mut ConfigResolution) {
    let mut candidates: Vec<PathBuf> = CONFIG_EXTENSIONS
        .iter()
        .map(|extension| dir.join(format!("index.{extension}")))
        .collect();
    candidates.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    for candidate in candidates {
        let found = candidate.is_file();
        resolution.probe(candidate, source, found);
    }
}

fn probe_package_json(cwd: &Path, resolution: &mut ConfigResolution) {
    let package_path = cwd.join("package.json");
    if !package_path.is_file() {
        return;
    }
    let Ok(raw) = std::fs::read_to_string(&package_path) else {
        resolution.warn(format!("Unreadable package.json: {}", package_path.display()));
        return;
    };
    let Ok(parsed) = serde_json::from_str::<Value>(&raw) else {
        resolution.warn(format!("Unparseable package.json: {}", package_path.display()));
        return;
    };
    let Some(config_field) = parsed.pointer("/wizard/config") else {
        return;
    };

    let specifiers: Vec<String> = match config_field {
        Value::String(single) => vec![single.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => {
            resolution.warn("package.json wizard.config must be a string or array of strings");
            return;
        }
    };

    for specifier in specifiers {
        let path = absolutize(cwd, Path::new(&specifier));
        let found = path.is_file();
        if !found {
            resolution.error(format!(
                "package.json wizard.config entry not found: {}",
                path.display()
            ));
        }
        resolution.probe(path, ResolutionSource::PackageJson, found);
    }
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn dedup_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    paths
        .into_iter()
        .filter(|path| {
            let key = path
                .canonicalize()
                .unwrap_or_else(|_| path.clone());
            seen.insert(key)
        })
        .collect()
}
