mod common;

use rteval_core::storage::Store;
use rteval_core::{
    DbConfig, ExtractionTemplate, RegistrationPolicy, Registrar, ReportDocument, Session, Status,
};
use tempfile::tempdir;

fn registrar(dedup: bool) -> anyhow::Result<Registrar> {
    Ok(Registrar::new(ExtractionTemplate::builtin()?, RegistrationPolicy { dedup }))
}

#[test]
fn test_full_report_is_stored_with_three_cyclictest_rows() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let cfg = common::sqlite_db(dir.path())?;
    let mut store = Store::connect(&cfg)?;

    let doc = ReportDocument::load(&common::fixture("report_rt1.json"))?;
    let out = registrar(true)?.process_report(&mut store, &doc, Some("report_rt1.json"));

    assert_eq!(out.status, Status::Success);
    assert!(out.run.is_some());
    assert!(!store.in_transaction());
    assert_eq!(store.count_rows("systems")?, 1);
    assert_eq!(store.count_rows("rtevalruns")?, 1);
    assert_eq!(store.count_rows("cyclic_statistics")?, 3);

    // Check the stored run through a separate connection.
    let raw = rusqlite::Connection::open(dir.path().join("rteval.db"))?;
    let (syskey, fname, loads): (i64, String, String) = raw.query_row(
        "SELECT syskey, report_filename, loads_json FROM rtevalruns",
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    assert_eq!(Some(syskey), out.system_key().map(|k| k.0));
    assert_eq!(fname, "report_rt1.json");
    assert_eq!(loads, r#"["hackbench","kcompile"]"#);
    Ok(())
}

#[test]
fn test_missing_run_field_leaves_no_rows() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let cfg = common::sqlite_db(dir.path())?;
    let mut store = Store::connect(&cfg)?;

    let mut v = common::report_value()?;
    v["run"]
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("run section missing"))?
        .remove("start");
    let doc = ReportDocument::new(v)?;

    let out = registrar(true)?.process_report(&mut store, &doc, None);
    assert_eq!(out.status, Status::RunRegistrationFailed);
    assert_eq!(out.run, None);
    assert!(!store.in_transaction());
    assert_eq!(store.count_rows("systems")?, 0);
    assert_eq!(store.count_rows("rtevalruns")?, 0);
    assert_eq!(store.count_rows("cyclic_statistics")?, 0);

    // The session stays usable and rollback remains a no-op.
    store.rollback()?;
    let again = registrar(true)?.process_report(&mut store, &common::report_for("rt-lab-01", "7XK2H43")?, None);
    assert_eq!(again.status, Status::Success);
    Ok(())
}

#[test]
fn test_resubmission_reuses_system_key() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let cfg = common::sqlite_db(dir.path())?;
    let r = registrar(true)?;
    let doc = common::report_for("rt-lab-01", "7XK2H43")?;

    let first = r.process_report(&mut Store::connect(&cfg)?, &doc, Some("a.json"));
    let second = r.process_report(&mut Store::connect(&cfg)?, &doc, Some("b.json"));

    assert_eq!(first.status, Status::Success);
    assert_eq!(second.status, Status::Success);
    assert_eq!(first.system_key(), second.system_key());
    assert!(second.system.map(|s| s.reused).unwrap_or(false));
    assert_ne!(first.run, second.run);

    let store = Store::connect(&cfg)?;
    assert_eq!(store.count_rows("systems")?, 1);
    assert_eq!(store.count_rows("rtevalruns")?, 2);
    assert_eq!(store.count_rows("cyclic_statistics")?, 6);
    Ok(())
}

#[test]
fn test_unparseable_file_and_bad_connection() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let cfg = common::sqlite_db(dir.path())?;
    let r = registrar(true)?;

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{\"SystemInfo\": ")?;
    assert_eq!(r.register_file(&cfg, &broken).status, Status::XmlParseFailed);

    let nowhere = DbConfig::sqlite(
        dir.path()
            .join("no/such/dir/rteval.db")
            .display()
            .to_string(),
    );
    let out = r.register_file(&nowhere, &common::fixture("report_rt1.json"));
    assert_eq!(out.status, Status::GeneralDbError);
    assert_eq!(out.system, None);
    Ok(())
}

#[test]
fn test_missing_schema_is_a_system_registration_failure() -> anyhow::Result<()> {
    let mut store = Store::memory()?;
    let doc = common::report_for("rt-lab-01", "7XK2H43")?;
    let out = registrar(true)?.process_report(&mut store, &doc, None);
    assert_eq!(out.status, Status::SystemRegistrationFailed);
    assert!(!store.in_transaction());
    Ok(())
}
