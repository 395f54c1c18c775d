#![allow(dead_code)]

use rteval_core::storage::Store;
use rteval_core::{DbConfig, ReportDocument};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

pub fn report_value() -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(fixture("report_rt1.json"))?;
    Ok(serde_json::from_str(&raw)?)
}

/// The fixture report with its host identity replaced.
pub fn report_for(host: &str, serial: &str) -> anyhow::Result<ReportDocument> {
    let mut v = report_value()?;
    v["SystemInfo"]["uname"]["node"] = Value::from(host);
    v["SystemInfo"]["dmi"]["serial"] = Value::from(serial);
    Ok(ReportDocument::new(v)?)
}

/// A fresh database file with the schema applied.
pub fn sqlite_db(dir: &Path) -> anyhow::Result<DbConfig> {
    let path = dir.join("rteval.db");
    let cfg = DbConfig::sqlite(path.display().to_string()).with("busy_timeout_ms", 10_000);
    Store::connect(&cfg)?.init_schema()?;
    Ok(cfg)
}
