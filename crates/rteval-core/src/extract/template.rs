use super::EntityKind;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

pub const SUPPORTED_TEMPLATE_VERSION: u32 = 1;

/// Built-in mapping for the canonical rteval summary document.
pub const DEFAULT_TEMPLATE: &str = r#"version: 1
name: rteval-summary-v1
system:
  identity: [system_manufacturer, system_product, system_serial, hostname, architecture]
  fields:
    hostname: SystemInfo.uname.node
    ip_address: SystemInfo.network.ipv4
    architecture: SystemInfo.uname.machine
    kernel_release: SystemInfo.uname.kernel
    realtime_kernel: { path: SystemInfo.uname.is_rt, default: false }
    cpu_model: SystemInfo.cpu.model
    cpu_cores: SystemInfo.cpu.cores
    cpu_sockets: SystemInfo.cpu.sockets
    memory_kb: SystemInfo.memory.total_kb
    bios_vendor: SystemInfo.dmi.bios_vendor
    system_manufacturer: SystemInfo.dmi.manufacturer
    system_product: SystemInfo.dmi.product
    system_serial: SystemInfo.dmi.serial
run:
  fields:
    run_start: run.start
    run_end: run.end
    duration_secs: run.duration
    rteval_version: run.version
    load_average: run.load_average
    loads: run.loads
    workload_cmdline: run.cmdline
    annotation: run.annotation
cyclictest:
  rows: cyclictest.cores
  fields:
    core: core
    priority: priority
    samples: samples
    min_us: min
    max_us: max
    mean_us: mean
    median_us: median
    mode_us: mode
    range_us: range
    stddev_us: stddev
    histogram: histogram
"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldMapping {
    Path(String),
    Detailed {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
}

impl FieldMapping {
    pub fn path(&self) -> &str {
        match self {
            FieldMapping::Path(p) => p,
            FieldMapping::Detailed { path, .. } => path,
        }
    }

    pub fn default(&self) -> Option<&Value> {
        match self {
            FieldMapping::Path(_) => None,
            FieldMapping::Detailed { default, .. } => default.as_ref().filter(|v| !v.is_null()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityMapping {
    /// System only: fields hashed into the deduplication fingerprint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identity: Vec<String>,
    /// Cyclictest only: path of the array holding one element per result row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldMapping>,
}

/// Declarative mapping from document paths to entity fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionTemplate {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub system: EntityMapping,
    pub run: EntityMapping,
    pub cyclictest: EntityMapping,
}

impl ExtractionTemplate {
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml_str(DEFAULT_TEMPLATE, true)
    }

    pub fn mapping(&self, kind: EntityKind) -> &EntityMapping {
        match kind {
            EntityKind::System => &self.system,
            EntityKind::Run => &self.run,
            EntityKind::Cyclictest => &self.cyclictest,
        }
    }

    pub fn from_yaml_str(raw: &str, strict: bool) -> Result<Self, ConfigError> {
        let mut ignored_keys = HashSet::new();
        let deserializer = serde_yaml::Deserializer::from_str(raw);
        let template: ExtractionTemplate = serde_ignored::deserialize(deserializer, |path| {
            ignored_keys.insert(path.to_string());
        })
        .map_err(|e| ConfigError(format!("failed to parse template YAML: {}", e)))?;

        if !ignored_keys.is_empty() {
            if strict {
                return Err(ConfigError(format!(
                    "Unknown template keys: {:?}",
                    sorted(&ignored_keys)
                )));
            }
            tracing::warn!(
                event = "template.unknown_keys",
                keys = ?sorted(&ignored_keys),
                "ignoring unknown template keys"
            );
        }

        template.validate()?;
        Ok(template)
    }

    pub fn load(path: &Path, strict: bool) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read template {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&raw, strict)
            .map_err(|e| ConfigError(format!("{} (file: {})", e.0, path.display())))
    }

    /// Checks version, field names, required mappings, identity and rows.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != SUPPORTED_TEMPLATE_VERSION {
            return Err(ConfigError(format!(
                "unsupported template version {} (supported: {})",
                self.version, SUPPORTED_TEMPLATE_VERSION
            )));
        }

        for kind in [EntityKind::System, EntityKind::Run, EntityKind::Cyclictest] {
            let mapping = self.mapping(kind);
            for (name, m) in &mapping.fields {
                if kind.spec(name).is_none() {
                    return Err(ConfigError(format!("{kind}: unknown field '{name}'")));
                }
                if m.path().trim().is_empty() {
                    return Err(ConfigError(format!("{kind}: field '{name}' has an empty path")));
                }
            }
            for spec in kind.fields().iter().filter(|s| s.required) {
                if !mapping.fields.contains_key(spec.name) {
                    return Err(ConfigError(format!(
                        "{kind}: required field '{}' is not mapped",
                        spec.name
                    )));
                }
            }
        }

        if self.system.identity.is_empty() {
            return Err(ConfigError("system: identity must list at least one field".into()));
        }
        for name in &self.system.identity {
            if EntityKind::System.spec(name).is_none() {
                return Err(ConfigError(format!("system: unknown identity field '{name}'")));
            }
        }

        match self.cyclictest.rows.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => {}
            _ => return Err(ConfigError("cyclictest: 'rows' path is required".into())),
        }

        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError(format!("failed to render template: {}", e)))
    }
}

fn sorted(keys: &HashSet<String>) -> Vec<&String> {
    let mut v: Vec<_> = keys.iter().collect();
    v.sort();
    v
}
