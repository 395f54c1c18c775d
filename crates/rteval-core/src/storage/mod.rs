//! Session capability set used by the registration pipeline.
//!
//! A [`Session`] owns one connection and at most one open transaction. Both
//! the SQLite [`store::Store`] and the in-memory [`memory::MemorySession`]
//! implement it, so the orchestrator never sees a concrete driver.
//!
//! Implementations must let a session read its own uncommitted writes: the
//! run insert references a system key generated earlier in the same
//! transaction.

use crate::errors::{ConnectionError, DbError, TransactionError};
use crate::model::{CyclicStat, RunKey, RunRecord, SystemKey, SystemRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub mod memory;
pub mod schema;
pub mod store;

pub use store::Store;

pub trait Session {
    /// Opens a transaction. Fails if one is already active.
    fn begin(&mut self) -> Result<(), TransactionError>;
    fn commit(&mut self) -> Result<(), TransactionError>;
    /// Discards the open transaction. A no-op when none is active.
    fn rollback(&mut self) -> Result<(), TransactionError>;
    fn in_transaction(&self) -> bool;
    /// Releases the connection, rolling back first if needed. Idempotent.
    fn disconnect(&mut self);

    fn find_system(&mut self, fingerprint: &str) -> Result<Option<SystemKey>, DbError>;
    fn insert_system(&mut self, system: &SystemRecord) -> Result<SystemKey, DbError>;
    fn insert_run(&mut self, system: SystemKey, run: &RunRecord) -> Result<RunKey, DbError>;
    /// Returns the number of rows written.
    fn insert_cyclic(&mut self, run: RunKey, stat: &CyclicStat) -> Result<usize, DbError>;
}

/// Opens a SQLite session.
pub fn connect(config: &DbConfig) -> Result<Store, ConnectionError> {
    Store::connect(config)
}

/// Options understood by networked backends but meaningless for SQLite.
pub const NETWORK_OPTIONS: &[&str] = &["host", "port", "user", "password", "sslmode"];

const JOURNAL_MODES: &[&str] = &["delete", "truncate", "persist", "memory", "wal", "off"];

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Flat set of named connection options, as handed over by the config loader.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DbConfig {
    options: BTreeMap<String, Value>,
}

impl DbConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sqlite(database: impl Into<String>) -> Self {
        Self::new().with("database", database.into())
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.options.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.options.get(key).and_then(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut m = f.debug_map();
        for (k, v) in &self.options {
            if k == "password" {
                m.entry(k, &"***");
            } else {
                m.entry(k, v);
            }
        }
        m.finish()
    }
}

/// Validated SQLite connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteOptions {
    pub database: String,
    pub busy_timeout_ms: u64,
    pub journal_mode: Option<String>,
}

impl SqliteOptions {
    pub fn from_config(config: &DbConfig) -> Result<Self, ConnectionError> {
        let database = config
            .get("database")
            .filter(|d| !d.trim().is_empty())
            .ok_or(ConnectionError::MissingOption("database"))?;

        // rusqlite takes the timeout as a C int.
        let busy_timeout_ms = match config.get("busy_timeout_ms") {
            None => DEFAULT_BUSY_TIMEOUT_MS,
            Some(v) => v
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms <= i32::MAX as u64)
                .ok_or_else(|| ConnectionError::InvalidOption {
                    key: "busy_timeout_ms".into(),
                    reason: format!("expected milliseconds up to {}, got '{}'", i32::MAX, v),
                })?,
        };

        let journal_mode = match config.get("journal_mode") {
            None => None,
            Some(v) => {
                let v = v.to_ascii_lowercase();
                if !JOURNAL_MODES.contains(&v.as_str()) {
                    return Err(ConnectionError::InvalidOption {
                        key: "journal_mode".into(),
                        reason: format!("expected one of {:?}, got '{}'", JOURNAL_MODES, v),
                    });
                }
                Some(v)
            }
        };

        for key in config.keys() {
            match key {
                "database" | "busy_timeout_ms" | "journal_mode" => {}
                k if NETWORK_OPTIONS.contains(&k) => {
                    tracing::warn!(
                        event = "db.option_ignored",
                        option = k,
                        "connection option has no meaning for the sqlite backend"
                    );
                }
                other => {
                    return Err(ConnectionError::InvalidOption {
                        key: other.to_string(),
                        reason: "unknown connection option".into(),
                    })
                }
            }
        }

        Ok(Self {
            database,
            busy_timeout_ms,
            journal_mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_is_required() {
        let err = SqliteOptions::from_config(&DbConfig::new()).unwrap_err();
        assert!(matches!(err, ConnectionError::MissingOption("database")));
    }

    #[test]
    fn test_numeric_options_accept_numbers_and_strings() {
        let cfg = DbConfig::sqlite("a.db").with("busy_timeout_ms", 250);
        assert_eq!(SqliteOptions::from_config(&cfg).unwrap().busy_timeout_ms, 250);
        let cfg = DbConfig::sqlite("a.db").with("busy_timeout_ms", "soon");
        assert!(SqliteOptions::from_config(&cfg).is_err());
    }

    #[test]
    fn test_busy_timeout_beyond_c_int_rejected() {
        let cfg = DbConfig::sqlite("a.db").with("busy_timeout_ms", i32::MAX as u64);
        assert_eq!(
            SqliteOptions::from_config(&cfg).unwrap().busy_timeout_ms,
            i32::MAX as u64
        );

        let cfg = DbConfig::sqlite(":memory:").with("busy_timeout_ms", 3_000_000_000u64);
        assert!(matches!(
            SqliteOptions::from_config(&cfg),
            Err(ConnectionError::InvalidOption { .. })
        ));
        assert!(matches!(
            Store::connect(&cfg),
            Err(ConnectionError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_network_options_ignored_unknown_rejected() {
        let cfg = DbConfig::sqlite("a.db")
            .with("host", "db.lab")
            .with("port", 5432)
            .with("password", "hunter2");
        let opts = SqliteOptions::from_config(&cfg).unwrap();
        assert_eq!(opts.database, "a.db");
        assert_eq!(opts.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);

        let cfg = DbConfig::sqlite("a.db").with("pool_size", 4);
        assert!(matches!(
            SqliteOptions::from_config(&cfg),
            Err(ConnectionError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_journal_mode_validated() {
        let cfg = DbConfig::sqlite("a.db").with("journal_mode", "WAL");
        assert_eq!(
            SqliteOptions::from_config(&cfg).unwrap().journal_mode.as_deref(),
            Some("wal")
        );
        let cfg = DbConfig::sqlite("a.db").with("journal_mode", "fast");
        assert!(SqliteOptions::from_config(&cfg).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let cfg = DbConfig::sqlite("a.db").with("password", "hunter2");
        let shown = format!("{:?}", cfg);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("***"));
    }
}
