// status.rs - Terminal classification of a report-processing attempt
//
// The integer codes are persisted in the submission queue and must stay
// stable across releases.

use crate::errors::{DocumentError, ExtractionError, RegistrationError};
use crate::extract::EntityKind;
use serde::{Deserialize, Serialize};

/// Outcome of one report-processing attempt.
///
/// Set once per attempt. A fresh attempt starts again from [`Status::New`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// New, unparsed report in the submission queue
    #[default]
    New,
    /// Report registered successfully
    Success,
    /// The report document could not be parsed or extracted
    XmlParseFailed,
    /// System registration failed
    SystemRegistrationFailed,
    /// General database error (connection, begin, commit)
    GeneralDbError,
    /// Registering the rteval run failed
    RunRegistrationFailed,
    /// Registering cyclictest results failed
    CyclictestRegistrationFailed,
}

/// Internal error kinds fed to the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DocumentParse,
    Extraction(EntityKind),
    Database(EntityKind),
    IncompleteCyclictest,
    Connection,
    Transaction,
}

/// What the caller should do with a finished attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Not processed yet
    Pending,
    /// Stored; nothing left to do
    Done,
    /// Store trouble; re-submitting the same report may succeed
    Retry,
    /// The document is unusable; re-submitting it cannot help
    Reject,
    /// The document was readable but the store refused it; needs a human
    NotifyOperator,
}

impl Status {
    pub const ALL: [Status; 7] = [
        Status::New,
        Status::Success,
        Status::XmlParseFailed,
        Status::SystemRegistrationFailed,
        Status::GeneralDbError,
        Status::RunRegistrationFailed,
        Status::CyclictestRegistrationFailed,
    ];

    /// Pure mapping from an internal error kind to the public status.
    pub fn classify(kind: ErrorKind) -> Status {
        match kind {
            ErrorKind::DocumentParse => Status::XmlParseFailed,
            // System fields are pulled before the transaction opens; failing
            // there means the document is unusable.
            ErrorKind::Extraction(EntityKind::System) => Status::XmlParseFailed,
            ErrorKind::Database(EntityKind::System) => Status::SystemRegistrationFailed,
            ErrorKind::Extraction(EntityKind::Run) | ErrorKind::Database(EntityKind::Run) => {
                Status::RunRegistrationFailed
            }
            ErrorKind::Extraction(EntityKind::Cyclictest)
            | ErrorKind::Database(EntityKind::Cyclictest)
            | ErrorKind::IncompleteCyclictest => Status::CyclictestRegistrationFailed,
            ErrorKind::Connection | ErrorKind::Transaction => Status::GeneralDbError,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Status::New => 0,
            Status::Success => 1,
            Status::XmlParseFailed => 2,
            Status::SystemRegistrationFailed => 3,
            Status::GeneralDbError => 4,
            Status::RunRegistrationFailed => 5,
            Status::CyclictestRegistrationFailed => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Status> {
        Status::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::New => "NEW",
            Status::Success => "SUCCESS",
            Status::XmlParseFailed => "XML_PARSE_FAILED",
            Status::SystemRegistrationFailed => "SYSTEM_REGISTRATION_FAILED",
            Status::GeneralDbError => "GENERAL_DB_ERROR",
            Status::RunRegistrationFailed => "RUN_REGISTRATION_FAILED",
            Status::CyclictestRegistrationFailed => "CYCLICTEST_REGISTRATION_FAILED",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }

    pub fn disposition(self) -> Disposition {
        match self {
            Status::New => Disposition::Pending,
            Status::Success => Disposition::Done,
            Status::GeneralDbError => Disposition::Retry,
            Status::XmlParseFailed => Disposition::Reject,
            Status::SystemRegistrationFailed
            | Status::RunRegistrationFailed
            | Status::CyclictestRegistrationFailed => Disposition::NotifyOperator,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ExtractionError> for ErrorKind {
    fn from(e: &ExtractionError) -> Self {
        ErrorKind::Extraction(e.entity())
    }
}

impl From<&DocumentError> for ErrorKind {
    fn from(_: &DocumentError) -> Self {
        ErrorKind::DocumentParse
    }
}

impl From<&RegistrationError> for ErrorKind {
    fn from(e: &RegistrationError) -> Self {
        match e {
            RegistrationError::Extraction(x) => x.into(),
            RegistrationError::Database { entity, .. } => ErrorKind::Database(*entity),
            RegistrationError::Incomplete { .. } => ErrorKind::IncompleteCyclictest,
        }
    }
}

impl RegistrationError {
    pub fn status(&self) -> Status {
        Status::classify(self.into())
    }
}
