use crate::errors::DocumentError;
use serde_json::Value;
use std::path::Path;

/// A normalized report submission.
///
/// The tree is produced by an external transform and is never mutated here.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDocument {
    root: Value,
}

impl ReportDocument {
    pub fn new(root: Value) -> Result<Self, DocumentError> {
        match &root {
            Value::Object(_) => Ok(Self { root }),
            other => Err(DocumentError::NotAMapping(kind_name(other))),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Self, DocumentError> {
        Self::new(serde_json::from_str(s)?)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, DocumentError> {
        Self::new(serde_yaml::from_str(s)?)
    }

    /// Reads a report file; `.yaml`/`.yml` are parsed as YAML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let raw = std::fs::read_to_string(path).map_err(|source| DocumentError::Read {
            path: path.display().to_string(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&raw),
            _ => Self::from_json_str(&raw),
        }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Resolves a dotted path against the document root.
    pub fn get(&self, path: &str) -> Option<&Value> {
        resolve(&self.root, path)
    }
}

/// Walks `path` (dot separated, numeric segments index arrays) from `node`.
///
/// An empty path resolves to `node` itself. Explicit JSON `null` is treated as absent.
pub fn resolve<'a>(node: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = node;
    for seg in path.split('.').filter(|s| !s.is_empty()) {
        cur = match cur {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

pub(crate) fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
