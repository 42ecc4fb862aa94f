//! The filesystem-backed option providers: glob, json, workspace project
//! walk, and tsconfig listing. The command provider lives in the resolver
//! because it needs the command runner.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use crate::error::ProviderError;

/// Directories the workspace walk never descends into, in addition to the
/// step's own ignore list.
const DEFAULT_IGNORES: [&str; 5] = ["node_modules", ".git", "dist", "build", ".reports"];

const DEFAULT_MAX_DEPTH: usize = 3;

/// File matches under a cwd, labeled with their path relative to it.
pub fn glob_records(repo_root: &Path, pattern: &str, cwd: Option<&str>) -> Result<Vec<Value>, ProviderError> {
    let base = match cwd {
        Some(cwd) => repo_root.join(cwd),
        None => repo_root.to_path_buf(),
    };
    let full_pattern = base.join(pattern);
    let pattern_text = full_pattern.to_string_lossy().into_owned();

    let paths = glob::glob(&pattern_text).map_err(|err| ProviderError::Glob {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })?;

    let mut records = Vec::new();
    for path in paths.flatten() {
        let relative = path
            .strip_prefix(&base)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();
        records.push(json!({
            "value": relative,
            "label": relative,
        }));
    }
    Ok(records)
}

/// A JSON document traversed with an optional JSON Pointer. The target
/// must be an array; objects yield their values.
pub fn json_records(
    repo_root: &Path,
    file: &str,
    pointer: Option<&str>,
) -> Result<Vec<Value>, ProviderError> {
    let path = repo_root.join(file);
    let raw = std::fs::read_to_string(&path).map_err(|err| ProviderError::Io {
        path: path.clone(),
        message: err.to_string(),
    })?;
    let document: Value = serde_json::from_str(&raw).map_err(|err| ProviderError::Parse {
        path: path.clone(),
        message: err.to_string(),
    })?;

    let target = match pointer {
        Some(pointer) => document
            .pointer(pointer)
            .ok_or_else(|| ProviderError::PointerNotFound {
                path: path.clone(),
                pointer: pointer.to_string(),
            })?,
        None => &document,
    };

    match target {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) => Ok(map.values().cloned().collect()),
        other => Err(ProviderError::Parse {
            path,
            message: format!("expected an array at the pointer target, found {other}"),
        }),
    }
}

/// Depth-first workspace walk: every directory holding a `package.json`
/// becomes a project record `{id, label, path}` where `id` is the path
/// relative to the walk root and `label` is the package name (falling
/// back to the directory name). Entries are visited in sorted order so
/// results are stable.
pub fn workspace_project_records(
    repo_root: &Path,
    cwd: Option<&str>,
    max_depth: Option<usize>,
    ignore: &[String],
) -> Result<Vec<Value>, ProviderError> {
    let base = match cwd {
        Some(cwd) => repo_root.join(cwd),
        None => repo_root.to_path_buf(),
    };
    let max_depth = max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
    let mut records = Vec::new();
    walk_projects(&base, &base, 0, max_depth, ignore, &mut records)?;
    Ok(records)
}

fn walk_projects(
    root: &Path,
    dir: &Path,
    depth: usize,
    max_depth: usize,
    ignore: &[String],
    records: &mut Vec<Value>,
) -> Result<(), ProviderError> {
    if depth > 0 {
        let manifest = dir.join("package.json");
        if manifest.is_file() {
            let id = dir
                .strip_prefix(root)
                .unwrap_or(dir)
                .to_string_lossy()
                .into_owned();
            let label = package_name(&manifest).unwrap_or_else(|| {
                dir.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| id.clone())
            });
            records.push(json!({
                "id": id,
                "label": label,
                "path": dir.to_string_lossy(),
            }));
        }
    }
    if depth >= max_depth {
        return Ok(());
    }

    let mut children: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect(),
        Err(err) => {
            return Err(ProviderError::Io {
                path: dir.to_path_buf(),
                message: err.to_string(),
            });
        }
    };
    children.sort();

    for child in children {
        let name = child
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if DEFAULT_IGNORES.contains(&name.as_str()) || ignore.iter().any(|entry| entry == &name) {
            continue;
        }
        walk_projects(root, &child, depth + 1, max_depth, ignore, records)?;
    }
    Ok(())
}

fn package_name(manifest: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(manifest).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// The synthetic trailing option offered by the tsconfig provider.
pub const CUSTOM_TSCONFIG_VALUE: &str = "__custom__";

/// `tsconfig*.json` files in a project directory, plus a synthetic
/// "Custom path…" entry unless disabled.
pub fn project_tsconfig_records(
    repo_root: &Path,
    project: Option<&str>,
    allow_custom: Option<bool>,
) -> Result<Vec<Value>, ProviderError> {
    let dir = match project {
        Some(project) => repo_root.join(project),
        None => repo_root.to_path_buf(),
    };
    let pattern = dir.join("tsconfig*.json");
    let pattern_text = pattern.to_string_lossy().into_owned();

    let mut files: Vec<String> = glob::glob(&pattern_text)
        .map_err(|err| ProviderError::Glob {
            pattern: pattern_text.clone(),
            message: err.to_string(),
        })?
        .flatten()
        .filter_map(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .collect();
    files.sort();

    let mut records: Vec<Value> = files
        .into_iter()
        .map(|name| json!({"value": name, "label": name}))
        .collect();

    if allow_custom.unwrap_or(true) {
        records.push(json!({
            "value": CUSTOM_TSCONFIG_VALUE,
            "label": "Custom path…",
        }));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_glob_records_relative_labels() {
        let tmp = tempdir().unwrap();
        touch(&tmp.path().join("configs/a.json"), "{}");
        touch(&tmp.path().join("configs/b.json"), "{}");

        let records = glob_records(tmp.path(), "*.json", Some("configs")).unwrap();
        let labels: Vec<&str> = records
            .iter()
            .map(|record| record["label"].as_str().unwrap())
            .collect();
        assert_eq!(labels, vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_json_records_with_pointer() {
        let tmp = tempdir().unwrap();
        touch(
            &tmp.path().join("data.json"),
            r#"{"envs": {"list": [{"id": "dev"}, {"id": "prod"}]}}"#,
        );
        let records = json_records(tmp.path(), "data.json", Some("/envs/list")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"], "dev");
    }

    #[test]
    fn test_json_records_missing_pointer_errors() {
        let tmp = tempdir().unwrap();
        touch(&tmp.path().join("data.json"), r#"{"a": 1}"#);
        let err = json_records(tmp.path(), "data.json", Some("/missing")).unwrap_err();
        assert!(matches!(err, ProviderError::PointerNotFound { .. }));
    }

    #[test]
    fn test_json_records_non_array_target_errors() {
        let tmp = tempdir().unwrap();
        touch(&tmp.path().join("data.json"), r#"{"a": 1}"#);
        let err = json_records(tmp.path(), "data.json", Some("/a")).unwrap_err();
        assert!(matches!(err, ProviderError::Parse { .. }));
    }

    #[test]
    fn test_workspace_projects_walk() {
        let tmp = tempdir().unwrap();
        touch(
            &tmp.path().join("apps/api/package.json"),
            r#"{"name": "@demo/api"}"#,
        );
        touch(&tmp.path().join("apps/web/package.json"), r#"{}"#);
        touch(
            &tmp.path().join("node_modules/dep/package.json"),
            r#"{"name": "dep"}"#,
        );

        let records = workspace_project_records(tmp.path(), None, Some(3), &[]).unwrap();
        let ids: Vec<&str> = records
            .iter()
            .map(|record| record["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["apps/api", "apps/web"]);
        assert_eq!(records[0]["label"], "@demo/api");
        assert_eq!(records[1]["label"], "web");
    }

    #[test]
    fn test_workspace_projects_honors_max_depth() {
        let tmp = tempdir().unwrap();
        touch(
            &tmp.path().join("deep/nested/far/package.json"),
            r#"{"name": "far"}"#,
        );
        let shallow = workspace_project_records(tmp.path(), None, Some(2), &[]).unwrap();
        assert!(shallow.is_empty());
        let deep = workspace_project_records(tmp.path(), None, Some(3), &[]).unwrap();
        assert_eq!(deep.len(), 1);
    }

    #[test]
    fn test_workspace_projects_honors_ignore_set() {
        let tmp = tempdir().unwrap();
        touch(&tmp.path().join("legacy/package.json"), r#"{}"#);
        touch(&tmp.path().join("apps/package.json"), r#"{}"#);

        let records =
            workspace_project_records(tmp.path(), None, Some(2), &["legacy".to_string()]).unwrap();
        let ids: Vec<&str> = records
            .iter()
            .map(|record| record["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["apps"]);
    }

    #[test]
    fn test_project_tsconfigs_with_custom_entry() {
        let tmp = tempdir().unwrap();
        touch(&tmp.path().join("apps/api/tsconfig.json"), "{}");
        touch(&tmp.path().join("apps/api/tsconfig.build.json"), "{}");

        let records = project_tsconfig_records(tmp.path(), Some("apps/api"), None).unwrap();
        let values: Vec<&str> = records
            .iter()
            .map(|record| record["value"].as_str().unwrap())
            .collect();
        assert_eq!(
            values,
            vec!["tsconfig.build.json", "tsconfig.json", CUSTOM_TSCONFIG_VALUE]
        );
    }

    #[test]
    fn test_project_tsconfigs_custom_disabled() {
        let tmp = tempdir().unwrap();
        touch(&tmp.path().join("apps/api/tsconfig.json"), "{}");
        let records =
            project_tsconfig_records(tmp.path(), Some("apps/api"), Some(false)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["value"], "tsconfig.json");
    }
}
