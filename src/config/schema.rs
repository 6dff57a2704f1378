//! Declared field schema for source configuration documents
//!
//! Every registered source publishes the list of dotted paths it understands.
//! Overrides are applied by walking this list, so a typo in `-o` fails loudly
//! instead of silently creating an unused key.

use super::ConfigError;
use crate::Granularity;
use serde_yaml::{Mapping, Value};

/// Value type of a configuration field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free-form string
    String,
    /// Filesystem path
    Path,
    /// Unsigned integer
    Integer,
    /// Floating point number
    Float,
    /// `true`/`false`
    Bool,
    /// Comma-separated list of strings (YAML sequence in files)
    StringList,
    /// One of `hourly`, `daily`, `monthly`, `yearly`
    Granularity,
}

impl FieldKind {
    /// Name used in error messages and `sources list`
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Path => "path",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::StringList => "list",
            FieldKind::Granularity => "granularity",
        }
    }

    /// Convert an override string into a YAML value of this kind
    pub fn coerce(&self, path: &str, raw: &str) -> Result<Value, ConfigError> {
        let raw = raw.trim();
        let mismatch = || ConfigError::TypeCoercion {
            path: path.to_string(),
            expected: self.name(),
            value: raw.to_string(),
        };

        match self {
            FieldKind::String | FieldKind::Path => Ok(Value::String(raw.to_string())),
            FieldKind::Integer => raw
                .parse::<u64>()
                .map(|n| Value::Number(n.into()))
                .map_err(|_| mismatch()),
            FieldKind::Float => raw
                .parse::<f64>()
                .map(|n| Value::Number(n.into()))
                .map_err(|_| mismatch()),
            FieldKind::Bool => match raw.to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            FieldKind::StringList => {
                let inner = raw
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .unwrap_or(raw);
                let items: Vec<Value> = inner
                    .split(',')
                    .map(|item| item.trim().trim_matches(|c| c == '"' || c == '\''))
                    .filter(|item| !item.is_empty())
                    .map(|item| Value::String(item.to_string()))
                    .collect();
                if items.is_empty() {
                    return Err(mismatch());
                }
                Ok(Value::Sequence(items))
            }
            FieldKind::Granularity => raw
                .parse::<Granularity>()
                .map(|g| Value::String(g.to_string()))
                .map_err(|_| mismatch()),
        }
    }
}

/// One declared configuration field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Dotted path, e.g. `paths.dst_dir_raw`
    pub path: &'static str,
    /// Expected value type
    pub kind: FieldKind,
    /// Whether the field must be present after overrides
    pub required: bool,
}

impl FieldSpec {
    /// Required field
    pub const fn required(path: &'static str, kind: FieldKind) -> Self {
        Self {
            path,
            kind,
            required: true,
        }
    }

    /// Optional field
    pub const fn optional(path: &'static str, kind: FieldKind) -> Self {
        Self {
            path,
            kind,
            required: false,
        }
    }
}

/// Fields every source understands
pub const COMMON_FIELDS: &[FieldSpec] = &[
    FieldSpec::required("paths.dst_dir_raw", FieldKind::Path),
    FieldSpec::optional("crawl.granularity", FieldKind::Granularity),
    FieldSpec::optional("crawl.max_attempts", FieldKind::Integer),
    FieldSpec::optional("crawl.base_backoff_ms", FieldKind::Integer),
    FieldSpec::optional("crawl.max_backoff_ms", FieldKind::Integer),
    FieldSpec::optional("crawl.parallel_windows", FieldKind::Integer),
    FieldSpec::optional("rate_limit.max_requests", FieldKind::Integer),
    FieldSpec::optional("rate_limit.window_secs", FieldKind::Integer),
    FieldSpec::optional("rate_limit.max_concurrent", FieldKind::Integer),
];

/// Look up a dotted path
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::Null => None,
        other => Some(other),
    }
}

/// Set a dotted path, creating intermediate mappings as needed
pub fn set_path(root: &mut Value, path: &str, value: Value) -> Result<(), ConfigError> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(ConfigError::InvalidOverride(path.to_string()));
    };

    let mut current = root;
    for segment in parents {
        if current.is_null() {
            *current = Value::Mapping(Mapping::new());
        }
        let map = current.as_mapping_mut().ok_or_else(|| ConfigError::InvalidValue {
            path: path.to_string(),
            reason: format!("'{segment}' is not a mapping"),
        })?;
        current = map
            .entry(Value::String((*segment).to_string()))
            .or_insert(Value::Null);
    }

    if current.is_null() {
        *current = Value::Mapping(Mapping::new());
    }
    let map = current.as_mapping_mut().ok_or_else(|| ConfigError::InvalidValue {
        path: path.to_string(),
        reason: "parent is not a mapping".to_string(),
    })?;
    map.insert(Value::String((*last).to_string()), value);
    Ok(())
}

/// Leaf paths present in a document; sequences count as leaves
pub fn leaf_paths(root: &Value) -> Vec<String> {
    fn walk(value: &Value, prefix: &str, out: &mut Vec<String>) {
        match value {
            Value::Mapping(map) => {
                for (key, child) in map {
                    let key = match key {
                        Value::String(s) => s.clone(),
                        other => serde_yaml::to_string(other)
                            .map(|s| s.trim().to_string())
                            .unwrap_or_default(),
                    };
                    let path = if prefix.is_empty() {
                        key
                    } else {
                        format!("{prefix}.{key}")
                    };
                    walk(child, &path, out);
                }
            }
            _ if !prefix.is_empty() => out.push(prefix.to_string()),
            _ => {}
        }
    }

    let mut out = Vec::new();
    walk(root, "", &mut out);
    out
}

/// Whether a value counts as present for a required field
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Sequence(items) => !items.is_empty(),
        Value::Mapping(map) => !map.is_empty(),
        _ => true,
    }
}

/// Read an unsigned integer that may be written as a number or a quoted string
pub fn as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Read a scalar as a string
pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Read a list of strings; a single scalar is treated as a one-element list
pub fn as_string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Sequence(items) => items.iter().map(as_string).collect(),
        other => as_string(other).map(|s| vec![s]),
    }
}
