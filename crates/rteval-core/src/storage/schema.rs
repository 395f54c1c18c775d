pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS systems (
  syskey INTEGER PRIMARY KEY AUTOINCREMENT,
  fingerprint TEXT NOT NULL,
  hostname TEXT NOT NULL,
  ip_address TEXT,
  architecture TEXT NOT NULL,
  kernel_release TEXT NOT NULL,
  realtime_kernel INTEGER,
  cpu_model TEXT,
  cpu_cores INTEGER NOT NULL,
  cpu_sockets INTEGER,
  memory_kb INTEGER,
  bios_vendor TEXT,
  system_manufacturer TEXT,
  system_product TEXT,
  system_serial TEXT,
  registered_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_systems_fingerprint ON systems(fingerprint);

CREATE TABLE IF NOT EXISTS rtevalruns (
  rterid INTEGER PRIMARY KEY AUTOINCREMENT,
  syskey INTEGER NOT NULL REFERENCES systems(syskey),
  run_start TEXT NOT NULL,
  run_end TEXT,
  duration_secs INTEGER NOT NULL,
  rteval_version TEXT,
  load_average REAL,
  loads_json TEXT NOT NULL,
  workload_cmdline TEXT,
  annotation TEXT,
  report_filename TEXT
);

CREATE TABLE IF NOT EXISTS cyclic_statistics (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  rterid INTEGER NOT NULL REFERENCES rtevalruns(rterid),
  core INTEGER,
  priority INTEGER,
  samples INTEGER NOT NULL,
  min_us INTEGER NOT NULL,
  max_us INTEGER NOT NULL,
  mean_us REAL NOT NULL,
  median_us REAL,
  mode_us INTEGER,
  range_us INTEGER,
  stddev_us REAL,
  histogram_json TEXT
);

CREATE TABLE IF NOT EXISTS submissionqueue (
  submid INTEGER PRIMARY KEY AUTOINCREMENT,
  filename TEXT NOT NULL,
  status INTEGER NOT NULL DEFAULT 0,
  received_at TEXT NOT NULL,
  parse_start TEXT,
  parse_end TEXT
);
"#;

/// Tables holding registered report data, parents first.
pub const REPORT_TABLES: &[&str] = &["systems", "rtevalruns", "cyclic_statistics"];
