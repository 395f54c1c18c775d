//! Projection of report documents into typed field sets.
//!
//! Each entity has a fixed list of named fields; the [`ExtractionTemplate`]
//! only decides where in the document each field lives. Extraction is pure:
//! the same document and template always give the same [`FieldSet`].

use crate::document::{kind_name, resolve, ReportDocument};
use crate::errors::ExtractionError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

pub mod template;

pub use template::{EntityMapping, ExtractionTemplate, FieldMapping};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    System,
    Run,
    Cyclictest,
}

impl EntityKind {
    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            EntityKind::System => SYSTEM_FIELDS,
            EntityKind::Run => RUN_FIELDS,
            EntityKind::Cyclictest => CYCLICTEST_FIELDS,
        }
    }

    pub fn spec(self, name: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.name == name)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntityKind::System => "system",
            EntityKind::Run => "run",
            EntityKind::Cyclictest => "cyclictest",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Real,
    Boolean,
    Timestamp,
    TextArray,
    IntegerArray,
}

impl FieldType {
    fn name(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Real => "real",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
            FieldType::TextArray => "text array",
            FieldType::IntegerArray => "integer array",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
}

const fn req(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        required: true,
    }
}

const fn opt(name: &'static str, ty: FieldType) -> FieldSpec {
    FieldSpec {
        name,
        ty,
        required: false,
    }
}

pub const SYSTEM_FIELDS: &[FieldSpec] = &[
    req("hostname", FieldType::Text),
    opt("ip_address", FieldType::Text),
    req("architecture", FieldType::Text),
    req("kernel_release", FieldType::Text),
    opt("realtime_kernel", FieldType::Boolean),
    opt("cpu_model", FieldType::Text),
    req("cpu_cores", FieldType::Integer),
    opt("cpu_sockets", FieldType::Integer),
    opt("memory_kb", FieldType::Integer),
    opt("bios_vendor", FieldType::Text),
    opt("system_manufacturer", FieldType::Text),
    opt("system_product", FieldType::Text),
    opt("system_serial", FieldType::Text),
];

pub const RUN_FIELDS: &[FieldSpec] = &[
    req("run_start", FieldType::Timestamp),
    opt("run_end", FieldType::Timestamp),
    req("duration_secs", FieldType::Integer),
    opt("rteval_version", FieldType::Text),
    opt("load_average", FieldType::Real),
    opt("loads", FieldType::TextArray),
    opt("workload_cmdline", FieldType::Text),
    opt("annotation", FieldType::Text),
];

/// Per-row fields; paths are relative to each element of the rows array.
pub const CYCLICTEST_FIELDS: &[FieldSpec] = &[
    opt("core", FieldType::Integer),
    opt("priority", FieldType::Integer),
    req("samples", FieldType::Integer),
    req("min_us", FieldType::Integer),
    req("max_us", FieldType::Integer),
    req("mean_us", FieldType::Real),
    opt("median_us", FieldType::Real),
    opt("mode_us", FieldType::Integer),
    opt("range_us", FieldType::Integer),
    opt("stddev_us", FieldType::Real),
    opt("histogram", FieldType::IntegerArray),
];

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    TextArray(Vec<String>),
    IntegerArray(Vec<i64>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Canonical text form, used for identity fingerprints.
    pub fn canonical(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Integer(n) => n.to_string(),
            FieldValue::Real(r) => r.to_string(),
            FieldValue::Boolean(b) => b.to_string(),
            FieldValue::Timestamp(t) => t.to_rfc3339(),
            FieldValue::TextArray(v) => v.join(","),
            FieldValue::IntegerArray(v) => v
                .iter()
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Extracted values of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Fields {
    entity: EntityKind,
    values: BTreeMap<&'static str, FieldValue>,
}

impl Fields {
    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    fn missing(&self, field: &'static str) -> ExtractionError {
        ExtractionError::NotExtracted {
            entity: self.entity,
            field,
        }
    }

    pub fn text(&self, name: &'static str) -> Result<String, ExtractionError> {
        self.opt_text(name).ok_or_else(|| self.missing(name))
    }

    pub fn opt_text(&self, name: &str) -> Option<String> {
        match self.get(name) {
            Some(FieldValue::Text(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn integer(&self, name: &'static str) -> Result<i64, ExtractionError> {
        self.opt_integer(name).ok_or_else(|| self.missing(name))
    }

    pub fn opt_integer(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(FieldValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn real(&self, name: &'static str) -> Result<f64, ExtractionError> {
        self.opt_real(name).ok_or_else(|| self.missing(name))
    }

    pub fn opt_real(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(FieldValue::Real(r)) => Some(*r),
            _ => None,
        }
    }

    pub fn opt_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(FieldValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn timestamp(&self, name: &'static str) -> Result<DateTime<Utc>, ExtractionError> {
        self.opt_timestamp(name).ok_or_else(|| self.missing(name))
    }

    pub fn opt_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.get(name) {
            Some(FieldValue::Timestamp(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn text_array(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(FieldValue::TextArray(v)) => v.clone(),
            _ => Vec::new(),
        }
    }

    pub fn opt_integer_array(&self, name: &str) -> Option<Vec<i64>> {
        match self.get(name) {
            Some(FieldValue::IntegerArray(v)) => Some(v.clone()),
            _ => None,
        }
    }
}

/// Result of [`extract`]: one record for system and run, one or more for cyclictest.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet {
    pub entity: EntityKind,
    pub rows: Vec<Fields>,
}

impl FieldSet {
    /// The single record of a system or run extraction.
    pub fn single(&self) -> Result<&Fields, ExtractionError> {
        self.rows.first().ok_or_else(|| ExtractionError::EmptyRowSet {
            entity: self.entity,
            path: String::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Applies `template` to `document` for one entity kind.
pub fn extract(
    document: &ReportDocument,
    template: &ExtractionTemplate,
    kind: EntityKind,
) -> Result<FieldSet, ExtractionError> {
    let mapping = template.mapping(kind);
    let rows = match kind {
        EntityKind::System | EntityKind::Run => {
            vec![extract_fields(document.root(), mapping, kind, "")?]
        }
        EntityKind::Cyclictest => {
            let rows_path = mapping.rows.as_deref().unwrap_or_default();
            let items = match document.get(rows_path) {
                None => {
                    return Err(ExtractionError::EmptyRowSet {
                        entity: kind,
                        path: rows_path.to_string(),
                    })
                }
                Some(Value::Array(items)) => items,
                Some(_) => {
                    return Err(ExtractionError::NotAnArray {
                        entity: kind,
                        path: rows_path.to_string(),
                    })
                }
            };
            if items.is_empty() {
                return Err(ExtractionError::EmptyRowSet {
                    entity: kind,
                    path: rows_path.to_string(),
                });
            }
            items
                .iter()
                .enumerate()
                .map(|(i, item)| extract_fields(item, mapping, kind, &format!("{rows_path}.{i}")))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(FieldSet { entity: kind, rows })
}

fn extract_fields(
    node: &Value,
    mapping: &EntityMapping,
    kind: EntityKind,
    base: &str,
) -> Result<Fields, ExtractionError> {
    let mut values = BTreeMap::new();
    for spec in kind.fields() {
        let value = match mapping.fields.get(spec.name) {
            None if spec.required => {
                return Err(ExtractionError::Unmapped {
                    entity: kind,
                    field: spec.name,
                })
            }
            None => FieldValue::Null,
            Some(m) => {
                let full_path = if base.is_empty() {
                    m.path().to_string()
                } else {
                    format!("{base}.{}", m.path())
                };
                let raw = resolve(node, m.path()).or(m.default());
                match raw {
                    Some(v) => coerce(v, spec.ty).map_err(|found| ExtractionError::InvalidValue {
                        entity: kind,
                        field: spec.name,
                        path: full_path,
                        expected: spec.ty.name(),
                        found,
                    })?,
                    None if spec.required => {
                        return Err(ExtractionError::MissingField {
                            entity: kind,
                            field: spec.name,
                            path: full_path,
                        })
                    }
                    None => FieldValue::Null,
                }
            }
        };
        values.insert(spec.name, value);
    }
    Ok(Fields {
        entity: kind,
        values,
    })
}

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

/// Coerces a document value into `ty`; the error carries a description of what was found.
fn coerce(v: &Value, ty: FieldType) -> Result<FieldValue, String> {
    let describe = || match v {
        Value::String(s) => format!("\"{s}\""),
        other => kind_name(other).to_string(),
    };
    match ty {
        FieldType::Text => match v {
            Value::String(s) => Ok(FieldValue::Text(s.clone())),
            Value::Number(n) => Ok(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Ok(FieldValue::Text(b.to_string())),
            _ => Err(describe()),
        },
        FieldType::Integer => as_integer(v).map(FieldValue::Integer).ok_or_else(describe),
        FieldType::Real => {
            let r = match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            r.filter(|r| r.is_finite())
                .map(FieldValue::Real)
                .ok_or_else(describe)
        }
        FieldType::Boolean => {
            let b = match v {
                Value::Bool(b) => Some(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Some(false),
                    Some(1) => Some(true),
                    _ => None,
                },
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => Some(true),
                    "false" | "no" | "0" => Some(false),
                    _ => None,
                },
                _ => None,
            };
            b.map(FieldValue::Boolean).ok_or_else(describe)
        }
        FieldType::Timestamp => match v {
            Value::String(s) => parse_timestamp(s.trim())
                .map(FieldValue::Timestamp)
                .ok_or_else(describe),
            _ => Err(describe()),
        },
        FieldType::TextArray => match v {
            Value::Array(items) => items
                .iter()
                .map(|i| match i {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(FieldValue::TextArray)
                .ok_or_else(describe),
            Value::String(s) => Ok(FieldValue::TextArray(vec![s.clone()])),
            _ => Err(describe()),
        },
        FieldType::IntegerArray => match v {
            Value::Array(items) => items
                .iter()
                .map(as_integer)
                .collect::<Option<Vec<_>>>()
                .map(FieldValue::IntegerArray)
                .ok_or_else(describe),
            _ => Err(describe()),
        },
    }
}

fn as_integer(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}
