use crate::errors::ExtractionError;
use crate::extract::Fields;
use crate::fingerprint;
use crate::status::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Generated key of a `systems` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemKey(pub i64);

/// Generated key of an `rtevalruns` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunKey(pub i64);

impl std::fmt::Display for SystemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemRecord {
    /// sha256 over the template's identity fields
    pub fingerprint: String,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub architecture: String,
    pub kernel_release: String,
    pub realtime_kernel: Option<bool>,
    pub cpu_model: Option<String>,
    pub cpu_cores: i64,
    pub cpu_sockets: Option<i64>,
    pub memory_kb: Option<i64>,
    pub bios_vendor: Option<String>,
    pub system_manufacturer: Option<String>,
    pub system_product: Option<String>,
    pub system_serial: Option<String>,
}

impl SystemRecord {
    pub fn from_fields(f: &Fields, identity: &[String]) -> Result<Self, ExtractionError> {
        Ok(Self {
            fingerprint: fingerprint::system_identity(f, identity).hex,
            hostname: f.text("hostname")?,
            ip_address: f.opt_text("ip_address"),
            architecture: f.text("architecture")?,
            kernel_release: f.text("kernel_release")?,
            realtime_kernel: f.opt_bool("realtime_kernel"),
            cpu_model: f.opt_text("cpu_model"),
            cpu_cores: f.integer("cpu_cores")?,
            cpu_sockets: f.opt_integer("cpu_sockets"),
            memory_kb: f.opt_integer("memory_kb"),
            bios_vendor: f.opt_text("bios_vendor"),
            system_manufacturer: f.opt_text("system_manufacturer"),
            system_product: f.opt_text("system_product"),
            system_serial: f.opt_text("system_serial"),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_start: DateTime<Utc>,
    pub run_end: Option<DateTime<Utc>>,
    pub duration_secs: i64,
    pub rteval_version: Option<String>,
    pub load_average: Option<f64>,
    pub loads: Vec<String>,
    pub workload_cmdline: Option<String>,
    pub annotation: Option<String>,
    pub report_filename: Option<String>,
}

impl RunRecord {
    pub fn from_fields(f: &Fields, report_filename: Option<&str>) -> Result<Self, ExtractionError> {
        Ok(Self {
            run_start: f.timestamp("run_start")?,
            run_end: f.opt_timestamp("run_end"),
            duration_secs: f.integer("duration_secs")?,
            rteval_version: f.opt_text("rteval_version"),
            load_average: f.opt_real("load_average"),
            loads: f.text_array("loads"),
            workload_cmdline: f.opt_text("workload_cmdline"),
            annotation: f.opt_text("annotation"),
            report_filename: report_filename.map(str::to_string),
        })
    }
}

/// One cyclictest statistics row; `core == None` is the system-wide aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclicStat {
    pub core: Option<i64>,
    pub priority: Option<i64>,
    pub samples: i64,
    pub min_us: i64,
    pub max_us: i64,
    pub mean_us: f64,
    pub median_us: Option<f64>,
    pub mode_us: Option<i64>,
    pub range_us: Option<i64>,
    pub stddev_us: Option<f64>,
    pub histogram: Option<Vec<i64>>,
}

impl CyclicStat {
    pub fn from_fields(f: &Fields) -> Result<Self, ExtractionError> {
        Ok(Self {
            core: f.opt_integer("core"),
            priority: f.opt_integer("priority"),
            samples: f.integer("samples")?,
            min_us: f.integer("min_us")?,
            max_us: f.integer("max_us")?,
            mean_us: f.real("mean_us")?,
            median_us: f.opt_real("median_us"),
            mode_us: f.opt_integer("mode_us"),
            range_us: f.opt_integer("range_us"),
            stddev_us: f.opt_real("stddev_us"),
            histogram: f.opt_integer_array("histogram"),
        })
    }
}

/// Result of the system step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRegistration {
    pub key: SystemKey,
    /// The key belonged to an already committed row found by fingerprint.
    pub reused: bool,
}

/// What `process_report` hands back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: Status,
    /// Present once the system step succeeded. After a rollback a freshly
    /// inserted key is gone; only `reused` keys stay valid.
    pub system: Option<SystemRegistration>,
    /// Present only on success.
    pub run: Option<RunKey>,
}

impl Outcome {
    pub fn failed(status: Status, system: Option<SystemRegistration>) -> Self {
        Self {
            status,
            system,
            run: None,
        }
    }

    pub fn system_key(&self) -> Option<SystemKey> {
        self.system.map(|s| s.key)
    }
}

/// A queued report file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub submid: i64,
    pub filename: String,
    pub status: Status,
    pub received_at: String,
    pub parse_start: Option<String>,
    pub parse_end: Option<String>,
}
