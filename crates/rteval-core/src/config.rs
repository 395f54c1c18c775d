use crate::errors::ConfigError;
use crate::extract::ExtractionTemplate;
use crate::registrar::{RegistrationPolicy, Registrar};
use crate::storage::DbConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;

pub const ENV_DATABASE: &str = "RTEVAL_DATABASE";
pub const ENV_LOG: &str = "RTEVAL_LOG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(rename = "configVersion")]
    pub version: u32,
    pub database: DbConfig,
    /// Extraction template; relative paths resolve against the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub dedup: bool,
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}

fn default_parallel() -> usize {
    4
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            database: DbConfig::new(),
            template: None,
            dedup: true,
            parallel: default_parallel(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Applies `RTEVAL_DATABASE` and `RTEVAL_LOG`.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_DATABASE).ok(),
            std::env::var(ENV_LOG).ok(),
        );
    }

    fn apply_overrides(&mut self, database: Option<String>, log: Option<String>) {
        if let Some(db) = database.filter(|v| !v.is_empty()) {
            self.database.set("database", db);
        }
        if let Some(level) = log.filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
    }

    pub fn policy(&self) -> RegistrationPolicy {
        RegistrationPolicy { dedup: self.dedup }
    }

    pub fn load_template(&self, strict: bool) -> Result<ExtractionTemplate, ConfigError> {
        match &self.template {
            Some(path) => ExtractionTemplate::load(path, strict),
            None => ExtractionTemplate::builtin(),
        }
    }

    pub fn registrar(&self, strict: bool) -> Result<Registrar, ConfigError> {
        Ok(Registrar::new(self.load_template(strict)?, self.policy()))
    }
}

/// A parsed config plus the keys serde did not recognise.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub unknown_keys: Vec<String>,
}

impl LoadedConfig {
    pub fn warn_unknown(&self, path: &Path) {
        if !self.unknown_keys.is_empty() {
            tracing::warn!(
                event = "config.unknown_keys",
                keys = ?self.unknown_keys,
                file = %path.display()
            );
        }
    }
}

/// Reads and validates a config without logging, for use before the
/// subscriber is installed.
///
/// Relative `template` and `database` paths resolve against the config
/// file's directory.
pub fn parse_config(path: &Path, strict: bool) -> Result<LoadedConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;

    let mut ignored_keys = HashSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(&raw);
    let mut cfg: AppConfig = serde_ignored::deserialize(deserializer, |p| {
        ignored_keys.insert(p.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {} (file: {})", e, path.display())))?;

    // `x-` and `_` prefixed keys are reserved for YAML anchors.
    let mut unknown: Vec<_> = ignored_keys
        .into_iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();
    unknown.sort();

    if strict && !unknown.is_empty() {
        return Err(ConfigError(format!(
            "Unknown fields detected in strict mode: {:?} (file: {})",
            unknown,
            path.display()
        )));
    }

    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported configVersion {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }
    if cfg.parallel == 0 {
        return Err(ConfigError("parallel must be at least 1".into()));
    }

    let base = path.parent().unwrap_or(Path::new("."));
    if let Some(t) = cfg.template.as_mut() {
        if t.is_relative() {
            *t = base.join(&*t);
        }
    }
    if let Some(db) = cfg.database.get("database") {
        if is_relative_db_file(&db) {
            cfg.database.set("database", base.join(&db).display().to_string());
        }
    }

    Ok(LoadedConfig {
        config: cfg,
        unknown_keys: unknown,
    })
}

/// [`parse_config`], warning about unknown keys in lenient mode.
pub fn load_config(path: &Path, strict: bool) -> Result<AppConfig, ConfigError> {
    let loaded = parse_config(path, strict)?;
    loaded.warn_unknown(path);
    Ok(loaded.config)
}

fn is_relative_db_file(db: &str) -> bool {
    !db.is_empty() && db != ":memory:" && !db.starts_with("file:") && Path::new(db).is_relative()
}

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(
        path,
        r#"configVersion: 1
# Relative paths resolve against this file's directory.
database:
  database: rteval.db
  busy_timeout_ms: 5000
  journal_mode: wal
# template: rteval-template.yaml
dedup: true
parallel: 4
log_level: info
"#,
    )
    .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}
