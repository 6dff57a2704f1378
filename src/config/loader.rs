//! Config file loading and override application

use super::schema::{self, FieldSpec};
use super::ConfigError;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// `<configs_dir>/<source_id>.yaml`
pub fn source_config_path(configs_dir: &Path, source_id: &str) -> PathBuf {
    configs_dir.join(format!("{source_id}.yaml"))
}

/// Read and parse a YAML config document
///
/// An empty file yields an empty mapping.
pub fn load_yaml(path: &Path) -> Result<Value, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingFile(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::IoError(format!("{}: {e}", path.display())))?;
    parse_yaml(&contents)
}

/// Parse a YAML config document from a string
pub fn parse_yaml(contents: &str) -> Result<Value, ConfigError> {
    let value: Value = serde_yaml::from_str(contents)
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;
    match value {
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        Value::Mapping(_) => Ok(value),
        _ => Err(ConfigError::ParseError(
            "top-level document must be a mapping".to_string(),
        )),
    }
}

/// Split `key=value` strings at the first `=`
pub fn parse_key_value_pairs<S: AsRef<str>>(
    pairs: &[S],
) -> Result<Vec<(String, String)>, ConfigError> {
    pairs
        .iter()
        .map(|pair| {
            let pair = pair.as_ref();
            match pair.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    Ok((key.trim().to_string(), value.to_string()))
                }
                _ => Err(ConfigError::InvalidOverride(pair.to_string())),
            }
        })
        .collect()
}

/// Apply overrides and check required fields against the declared schema
///
/// Unknown override paths are rejected; unknown keys already present in the
/// base document are only logged.
pub fn resolve_document(
    source_id: &str,
    mut document: Value,
    overrides: &[(String, String)],
    fields: &[FieldSpec],
) -> Result<Value, ConfigError> {
    for path in schema::leaf_paths(&document) {
        let declared = fields
            .iter()
            .any(|f| f.path == path || path.starts_with(&format!("{}.", f.path)));
        if !declared && !path.starts_with("access.") {
            warn!(source_id, path = %path, "Ignoring undeclared config key");
        }
    }

    for (path, raw) in overrides {
        let field = fields
            .iter()
            .find(|f| f.path == path.as_str())
            .ok_or_else(|| ConfigError::UnknownOverridePath {
                source_id: source_id.to_string(),
                path: path.clone(),
            })?;
        let value = field.kind.coerce(path, raw)?;
        debug!(source_id, path = %path, kind = field.kind.name(), "Applying config override");
        schema::set_path(&mut document, path, value)?;
    }

    for field in fields.iter().filter(|f| f.required) {
        let present = schema::lookup(&document, field.path)
            .map(schema::is_present)
            .unwrap_or(false);
        if !present {
            return Err(ConfigError::MissingField {
                source_id: source_id.to_string(),
                path: field.path.to_string(),
            });
        }
    }

    Ok(document)
}
