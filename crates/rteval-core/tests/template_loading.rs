use rteval_core::extract::extract;
use rteval_core::extract::template::DEFAULT_TEMPLATE;
use rteval_core::{EntityKind, ExtractionTemplate, ReportDocument};
use tempfile::tempdir;

const CUSTOM: &str = r#"version: 1
name: flat-lab
system:
  identity: [hostname]
  fields:
    hostname: host
    architecture: arch
    kernel_release: kernel
    cpu_cores: { path: cores, default: 1 }
run:
  fields:
    run_start: started
    duration_secs: seconds
cyclictest:
  rows: latency
  fields:
    samples: n
    min_us: lo
    max_us: hi
    mean_us: avg
"#;

#[test]
fn test_custom_template_from_file() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("flat.yaml");
    std::fs::write(&path, CUSTOM)?;
    let template = ExtractionTemplate::load(&path, true)?;
    assert_eq!(template.name.as_deref(), Some("flat-lab"));

    let doc = ReportDocument::from_yaml_str(
        "host: box\narch: riscv64\nkernel: 6.8-rt\nstarted: 2024-01-01 00:00:00\nseconds: 5\nlatency:\n  - {n: 10, lo: 1, hi: 4, avg: 2}\n",
    )?;
    let sys = extract(&doc, &template, EntityKind::System)?;
    assert_eq!(sys.single()?.integer("cpu_cores")?, 1);
    let rows = extract(&doc, &template, EntityKind::Cyclictest)?;
    assert_eq!(rows.len(), 1);
    Ok(())
}

#[test]
fn test_builtin_template_roundtrips_through_yaml_file() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("default.yaml");
    let builtin = ExtractionTemplate::builtin()?;
    std::fs::write(&path, builtin.to_yaml()?)?;
    assert_eq!(ExtractionTemplate::load(&path, true)?, builtin);
    assert!(DEFAULT_TEMPLATE.starts_with("version: 1"));
    Ok(())
}

#[test]
fn test_unknown_template_keys_fail_in_strict_mode() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("extra.yaml");
    std::fs::write(&path, format!("{}owner: lab-team\n", CUSTOM))?;
    assert!(ExtractionTemplate::load(&path, true).is_err());
    assert!(ExtractionTemplate::load(&path, false).is_ok());
    Ok(())
}
