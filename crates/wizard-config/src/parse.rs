//! Format detection and parsing. The extension selects YAML, JSON, or
//! JSON5; unknown extensions fall back to YAML then JSON5.

use std::path::Path;

use serde_json::Value;

use crate::error::ComposeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Json5,
}

pub fn format_for_path(path: &Path) -> Option<ConfigFormat> {
    match path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("yaml") | Some("yml") => Some(ConfigFormat::Yaml),
        Some("json") => Some(ConfigFormat::Json),
        Some("json5") => Some(ConfigFormat::Json5),
        _ => None,
    }
}

/// Read and parse a config file into a JSON value.
pub fn parse_file(path: &Path) -> Result<Value, ComposeError> {
    let raw = std::fs::read_to_string(path).map_err(|err| ComposeError::Read {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    parse_str(path, &raw)
}

pub fn parse_str(path: &Path, raw: &str) -> Result<Value, ComposeError> {
    let parse_error = |message: String| ComposeError::Parse {
        path: path.to_path_buf(),
        message,
    };

    match format_for_path(path) {
        Some(ConfigFormat::Yaml) => {
            serde_yaml::from_str(raw).map_err(|err| parse_error(err.to_string()))
        }
        Some(ConfigFormat::Json) => {
            serde_json::from_str(raw).map_err(|err| parse_error(err.to_string()))
        }
        Some(ConfigFormat::Json5) => {
            json5::from_str(raw).map_err(|err| parse_error(err.to_string()))
        }
        None => serde_yaml::from_str(raw)
            .or_else(|_| json5::from_str(raw))
            .map_err(|err: json5::Error| parse_error(err.to_string())),
    }
}
