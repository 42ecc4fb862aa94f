//! Import resolution: relative paths, files inside packages, and package
//! roots carrying their own wizard config. Cycles fail with the full
//! stack.

use std::path::{Path, PathBuf};

use crate::discovery::{CONFIG_EXTENSIONS, OVERLAY_DIR, ROOT_BASENAME};
use crate::error::ComposeError;

/// Resolve an `imports:` specifier relative to the file that declared it.
pub fn resolve_import(specifier: &str, importer: &Path) -> Result<PathBuf, ComposeError> {
    let base_dir = importer.parent().unwrap_or_else(|| Path::new("."));

    let not_found = || ComposeError::ImportNotFound {
        specifier: specifier.to_string(),
        from: importer.to_path_buf(),
    };

    // (a) Relative or absolute file paths.
    if specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/') {
        let candidate = if specifier.starts_with('/') {
            PathBuf::from(specifier)
        } else {
            base_dir.join(specifier)
        };
        if candidate.is_file() {
            return Ok(candidate);
        }
        if candidate.is_dir() {
            return package_config_entry(&candidate).ok_or_else(not_found);
        }
        return Err(not_found());
    }

    // (b)/(c) Package lookup: walk ancestors for node_modules/<specifier>.
    for ancestor in base_dir.ancestors() {
        let candidate = ancestor.join("node_modules").join(specifier);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if candidate.is_dir() {
            if let Some(entry) = package_config_entry(&candidate) {
                return Ok(entry);
            }
        }
    }

    Err(not_found())
}

/// The config entry point inside a package root: a root candidate file or
/// `dev-wizard-config/index.*`.
fn package_config_entry(package_root: &Path) -> Option<PathBuf> {
    for extension in CONFIG_EXTENSIONS {
        let candidate = package_root.join(format!("{ROOT_BASENAME}.{extension}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    for extension in CONFIG_EXTENSIONS {
        let candidate = package_root.join(OVERLAY_DIR).join(format!("index.{extension}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Tracks the active import chain for cycle detection.
#[derive(Debug, Default)]
pub struct ImportStack {
    stack: Vec<PathBuf>,
}

impl ImportStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a file onto the chain; a revisit is a cycle.
    pub fn enter(&mut self, path: &Path) -> Result<(), ComposeError> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.stack.contains(&canonical) {
            let mut stack = self.stack.clone();
            stack.push(canonical);
            return Err(ComposeError::ImportCycle { stack });
        }
        self.stack.push(canonical);
        Ok(())
    }

    pub fn leave(&mut self) {
        self.stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_relative_import() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("shared")).unwrap();
        fs::write(tmp.path().join("shared/base.yaml"), "flows: {}").unwrap();
        let importer = tmp.path().join("dev-wizard.config.yaml");

        let resolved = resolve_import("./shared/base.yaml", &importer).unwrap();
        assert_eq!(resolved, tmp.path().join("shared/base.yaml"));
    }

    #[test]
    fn test_missing_relative_import_errors() {
        let tmp = tempdir().unwrap();
        let importer = tmp.path().join("dev-wizard.config.yaml");
        let err = resolve_import("./missing.yaml", &importer).unwrap_err();
        assert!(err.to_string().contains("missing.yaml"));
    }

    #[test]
    fn test_file_inside_package() {
        let tmp = tempdir().unwrap();
        let pkg = tmp.path().join("node_modules/@acme/wizard-shared");
        fs::create_dir_all(pkg.join("configs")).unwrap();
        fs::write(pkg.join("configs/base.yaml"), "flows: {}").unwrap();
        let importer = tmp.path().join("dev-wizard.config.yaml");

        let resolved =
            resolve_import("@acme/wizard-shared/configs/base.yaml", &importer).unwrap();
        assert_eq!(resolved, pkg.join("configs/base.yaml"));
    }

    #[test]
    fn test_package_root_with_root_candidate() {
        let tmp = tempdir().unwrap();
        let pkg = tmp.path().join("node_modules/wizard-shared");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("dev-wizard.config.json5"), "{}").unwrap();
        let importer = tmp.path().join("dev-wizard.config.yaml");

        let resolved = resolve_import("wizard-shared", &importer).unwrap();
        assert_eq!(resolved, pkg.join("dev-wizard.config.json5"));
    }

    #[test]
    fn test_package_root_with_overlay_index() {
        let tmp = tempdir().unwrap();
        let pkg = tmp.path().join("node_modules/wizard-shared");
        fs::create_dir_all(pkg.join(OVERLAY_DIR)).unwrap();
        fs::write(pkg.join(OVERLAY_DIR).join("index.yaml"), "flows: {}").unwrap();
        let importer = tmp.path().join("dev-wizard.config.yaml");

        let resolved = resolve_import("wizard-shared", &importer).unwrap();
        assert_eq!(resolved, pkg.join(OVERLAY_DIR).join("index.yaml"));
    }

    #[test]
    fn test_package_lookup_walks_ancestors() {
        let tmp = tempdir().unwrap();
        let pkg = tmp.path().join("node_modules/wizard-shared");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("dev-wizard.config.yaml"), "flows: {}").unwrap();

        let nested = tmp.path().join("apps/api");
        fs::create_dir_all(&nested).unwrap();
        let importer = nested.join("dev-wizard.config.yaml");

        let resolved = resolve_import("wizard-shared", &importer).unwrap();
        assert_eq!(resolved, pkg.join("dev-wizard.config.yaml"));
    }

    #[test]
    fn test_cycle_detection_reports_stack() {
        let tmp = tempdir().unwrap();
        let a = tmp.path().join("a.yaml");
        let b = tmp.path().join("b.yaml");
        fs::write(&a, "").unwrap();
        fs::write(&b, "").unwrap();

        let mut stack = ImportStack::new();
        stack.enter(&a).unwrap();
        stack.enter(&b).unwrap();
        let err = stack.enter(&a).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("a.yaml"));
        assert!(text.contains("b.yaml"));
    }

    #[test]
    fn test_stack_leave_allows_reentry() {
        let tmp = tempdir().unwrap();
        let a = tmp.path().join("a.yaml");
        fs::write(&a, "").unwrap();

        let mut stack = ImportStack::new();
        stack.enter(&a).unwrap();
        stack.leave();
        assert!(stack.enter(&a).is_ok());
    }
}
