use crate::extract::EntityKind;
use thiserror::Error;

/// Configuration or template could not be loaded.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

/// The report document itself could not be read or parsed.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read report {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("report is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("report is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("report root must be a mapping, found {0}")]
    NotAMapping(&'static str),
}

/// Failure to establish a session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("missing required connection option '{0}'")]
    MissingOption(&'static str),
    #[error("invalid connection option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },
    #[error("failed to open database {database}: {source}")]
    Open {
        database: String,
        #[source]
        source: rusqlite::Error,
    },
}

/// Error raised by a statement or transaction primitive on an open session.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("session is closed")]
    Closed,
    #[error("no transaction is active")]
    NoTransaction,
    #[error("a transaction is already active (nesting is not supported)")]
    TransactionActive,
    #[error("unknown {entity} key {key}")]
    UnknownKey { entity: EntityKind, key: i64 },
    #[error("injected failure at {0}")]
    Injected(&'static str),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode column value: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOp {
    Begin,
    Commit,
    Rollback,
}

impl std::fmt::Display for TxOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TxOp::Begin => "begin",
            TxOp::Commit => "commit",
            TxOp::Rollback => "rollback",
        })
    }
}

#[derive(Debug, Error)]
#[error("transaction {op} failed: {source}")]
pub struct TransactionError {
    pub op: TxOp,
    #[source]
    pub source: DbError,
}

impl TransactionError {
    pub fn new(op: TxOp, source: impl Into<DbError>) -> Self {
        Self {
            op,
            source: source.into(),
        }
    }
}

/// Applying the extraction template to a document failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("{entity}: required field '{field}' missing at path '{path}'")]
    MissingField {
        entity: EntityKind,
        field: &'static str,
        path: String,
    },
    #[error("{entity}: required field '{field}' has no mapping in the template")]
    Unmapped {
        entity: EntityKind,
        field: &'static str,
    },
    #[error("{entity}: field '{field}' at path '{path}' is not a valid {expected}: {found}")]
    InvalidValue {
        entity: EntityKind,
        field: &'static str,
        path: String,
        expected: &'static str,
        found: String,
    },
    #[error("{entity}: expected an array of result rows at path '{path}'")]
    NotAnArray { entity: EntityKind, path: String },
    #[error("{entity}: result set at path '{path}' is empty")]
    EmptyRowSet { entity: EntityKind, path: String },
    #[error("{entity}: field '{field}' was not extracted")]
    NotExtracted {
        entity: EntityKind,
        field: &'static str,
    },
}

impl ExtractionError {
    pub fn entity(&self) -> EntityKind {
        match self {
            ExtractionError::MissingField { entity, .. }
            | ExtractionError::Unmapped { entity, .. }
            | ExtractionError::InvalidValue { entity, .. }
            | ExtractionError::NotAnArray { entity, .. }
            | ExtractionError::EmptyRowSet { entity, .. }
            | ExtractionError::NotExtracted { entity, .. } => *entity,
        }
    }
}

/// Failure of one registration step inside the report transaction.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("{entity} registration failed: {source}")]
    Database {
        entity: EntityKind,
        #[source]
        source: DbError,
    },
    #[error("cyclictest registration incomplete: {inserted} of {expected} rows inserted")]
    Incomplete { inserted: usize, expected: usize },
}

impl RegistrationError {
    pub fn database(entity: EntityKind, source: DbError) -> Self {
        RegistrationError::Database { entity, source }
    }
}
