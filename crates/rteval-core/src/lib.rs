pub mod config;
pub mod document;
pub mod errors;
pub mod extract;
pub mod fingerprint;
pub mod model;
pub mod queue;
pub mod registrar;
pub mod status;
pub mod storage;

pub use document::ReportDocument;
pub use extract::{EntityKind, ExtractionTemplate};
pub use model::{Outcome, RunKey, SystemKey};
pub use registrar::{RegistrationPolicy, Registrar};
pub use status::{Disposition, Status};
pub use storage::{DbConfig, Session, Store};
