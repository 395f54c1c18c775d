use super::{DbConfig, Session, SqliteOptions};
use crate::errors::{ConnectionError, DbError, TransactionError, TxOp};
use crate::model::{CyclicStat, RunKey, RunRecord, Submission, SystemKey, SystemRecord};
use crate::status::Status;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

/// SQLite-backed session. Owns its connection exclusively.
pub struct Store {
    conn: Option<Connection>,
    database: String,
}

impl Store {
    pub fn connect(config: &DbConfig) -> Result<Self, ConnectionError> {
        let opts = SqliteOptions::from_config(config)?;
        Self::open_with(&opts)
    }

    pub fn open(path: &Path) -> Result<Self, ConnectionError> {
        Self::connect(&DbConfig::sqlite(path.display().to_string()))
    }

    /// Private in-memory database, mostly for tests.
    pub fn memory() -> Result<Self, ConnectionError> {
        Self::connect(&DbConfig::sqlite(":memory:"))
    }

    fn open_with(opts: &SqliteOptions) -> Result<Self, ConnectionError> {
        let open_err = |source| ConnectionError::Open {
            database: opts.database.clone(),
            source,
        };
        let conn = if opts.database == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(&opts.database)
        }
        .map_err(open_err)?;

        conn.busy_timeout(Duration::from_millis(opts.busy_timeout_ms))
            .map_err(open_err)?;
        conn.execute("PRAGMA foreign_keys = ON", []).map_err(open_err)?;
        if let Some(mode) = &opts.journal_mode {
            let applied: String = conn
                .pragma_update_and_check(None, "journal_mode", mode, |row| row.get(0))
                .map_err(open_err)?;
            tracing::debug!(event = "db.journal_mode", requested = %mode, applied = %applied);
        }

        tracing::debug!(event = "db.connected", database = %opts.database);
        Ok(Self {
            conn: Some(conn),
            database: opts.database.clone(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Creates missing tables. Does not migrate existing ones.
    pub fn init_schema(&self) -> Result<(), DbError> {
        self.conn()?.execute_batch(super::schema::DDL)?;
        Ok(())
    }

    fn conn(&self) -> Result<&Connection, DbError> {
        self.conn.as_ref().ok_or(DbError::Closed)
    }

    pub fn count_rows(&self, table: &str) -> Result<i64, DbError> {
        // Allowlist; the name is interpolated.
        if !["systems", "rtevalruns", "cyclic_statistics", "submissionqueue"].contains(&table) {
            return Err(DbError::Sqlite(rusqlite::Error::InvalidParameterName(
                table.to_string(),
            )));
        }
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        Ok(self.conn()?.query_row(&sql, [], |r| r.get(0))?)
    }

    // --- Submission queue ---

    pub fn enqueue(&self, filename: &str) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO submissionqueue(filename, status, received_at) VALUES (?1, ?2, ?3)",
            params![filename, Status::New.code(), now_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// NEW submissions, oldest first.
    pub fn pending(&self, limit: u32) -> Result<Vec<Submission>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT submid, filename, status, received_at, parse_start, parse_end
             FROM submissionqueue
             WHERE status = ?1
             ORDER BY submid ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![Status::New.code(), limit], submission_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn submission(&self, submid: i64) -> Result<Option<Submission>, DbError> {
        let conn = self.conn()?;
        let sub = conn
            .query_row(
                "SELECT submid, filename, status, received_at, parse_start, parse_end
                 FROM submissionqueue WHERE submid = ?1",
                params![submid],
                submission_from_row,
            )
            .optional()?;
        Ok(sub)
    }

    pub fn mark_started(&self, submid: i64) -> Result<(), DbError> {
        self.conn()?.execute(
            "UPDATE submissionqueue SET parse_start = ?1, parse_end = NULL WHERE submid = ?2",
            params![now_rfc3339(), submid],
        )?;
        Ok(())
    }

    pub fn mark_finished(&self, submid: i64, status: Status) -> Result<(), DbError> {
        self.conn()?.execute(
            "UPDATE submissionqueue SET status = ?1, parse_end = ?2 WHERE submid = ?3",
            params![status.code(), now_rfc3339(), submid],
        )?;
        Ok(())
    }

    /// Resets a submission to NEW for a fresh attempt. Returns false if unknown.
    pub fn requeue(&self, submid: i64) -> Result<bool, DbError> {
        let n = self.conn()?.execute(
            "UPDATE submissionqueue SET status = ?1, parse_start = NULL, parse_end = NULL WHERE submid = ?2",
            params![Status::New.code(), submid],
        )?;
        Ok(n == 1)
    }
}

impl Session for Store {
    fn begin(&mut self) -> Result<(), TransactionError> {
        let conn = self.conn().map_err(|e| TransactionError::new(TxOp::Begin, e))?;
        if !conn.is_autocommit() {
            return Err(TransactionError::new(TxOp::Begin, DbError::TransactionActive));
        }
        // IMMEDIATE takes the write lock up front so concurrent attempts
        // queue on the busy timeout instead of failing on lock upgrade.
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| TransactionError::new(TxOp::Begin, e))
    }

    fn commit(&mut self) -> Result<(), TransactionError> {
        let conn = self.conn().map_err(|e| TransactionError::new(TxOp::Commit, e))?;
        if conn.is_autocommit() {
            return Err(TransactionError::new(TxOp::Commit, DbError::NoTransaction));
        }
        conn.execute_batch("COMMIT")
            .map_err(|e| TransactionError::new(TxOp::Commit, e))
    }

    fn rollback(&mut self) -> Result<(), TransactionError> {
        match self.conn.as_ref() {
            Some(conn) if !conn.is_autocommit() => conn
                .execute_batch("ROLLBACK")
                .map_err(|e| TransactionError::new(TxOp::Rollback, e)),
            _ => Ok(()),
        }
    }

    fn in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| !c.is_autocommit())
    }

    fn disconnect(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !conn.is_autocommit() {
            tracing::warn!(
                event = "db.disconnect_open_transaction",
                database = %self.database,
                "rolling back open transaction before disconnect"
            );
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::error!(event = "db.rollback_failed", error = %e);
            }
        }
        if let Err((_, e)) = conn.close() {
            tracing::warn!(event = "db.close_failed", database = %self.database, error = %e);
        }
        tracing::debug!(event = "db.disconnected", database = %self.database);
    }

    fn find_system(&mut self, fingerprint: &str) -> Result<Option<SystemKey>, DbError> {
        let key = self
            .conn()?
            .query_row(
                "SELECT syskey FROM systems WHERE fingerprint = ?1 ORDER BY syskey ASC LIMIT 1",
                params![fingerprint],
                |r| r.get(0),
            )
            .optional()?;
        Ok(key.map(SystemKey))
    }

    fn insert_system(&mut self, s: &SystemRecord) -> Result<SystemKey, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO systems(fingerprint, hostname, ip_address, architecture, kernel_release,
                realtime_kernel, cpu_model, cpu_cores, cpu_sockets, memory_kb, bios_vendor,
                system_manufacturer, system_product, system_serial, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                s.fingerprint,
                s.hostname,
                s.ip_address,
                s.architecture,
                s.kernel_release,
                s.realtime_kernel,
                s.cpu_model,
                s.cpu_cores,
                s.cpu_sockets,
                s.memory_kb,
                s.bios_vendor,
                s.system_manufacturer,
                s.system_product,
                s.system_serial,
                now_rfc3339()
            ],
        )?;
        Ok(SystemKey(conn.last_insert_rowid()))
    }

    fn insert_run(&mut self, system: SystemKey, r: &RunRecord) -> Result<RunKey, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO rtevalruns(syskey, run_start, run_end, duration_secs, rteval_version,
                load_average, loads_json, workload_cmdline, annotation, report_filename)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                system.0,
                r.run_start.to_rfc3339(),
                r.run_end.map(|t| t.to_rfc3339()),
                r.duration_secs,
                r.rteval_version,
                r.load_average,
                serde_json::to_string(&r.loads)?,
                r.workload_cmdline,
                r.annotation,
                r.report_filename
            ],
        )?;
        Ok(RunKey(conn.last_insert_rowid()))
    }

    fn insert_cyclic(&mut self, run: RunKey, c: &CyclicStat) -> Result<usize, DbError> {
        let histogram = c.histogram.as_ref().map(serde_json::to_string).transpose()?;
        let n = self.conn()?.execute(
            "INSERT INTO cyclic_statistics(rterid, core, priority, samples, min_us, max_us,
                mean_us, median_us, mode_us, range_us, stddev_us, histogram_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run.0,
                c.core,
                c.priority,
                c.samples,
                c.min_us,
                c.max_us,
                c.mean_us,
                c.median_us,
                c.mode_us,
                c.range_us,
                c.stddev_us,
                histogram
            ],
        )?;
        Ok(n)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn submission_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Submission> {
    let code: i32 = row.get(2)?;
    let status = Status::from_code(code)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(2, code as i64))?;
    Ok(Submission {
        submid: row.get(0)?,
        filename: row.get(1)?,
        status,
        received_at: row.get(3)?,
        parse_start: row.get(4)?,
        parse_end: row.get(5)?,
    })
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        let s = Store::memory().unwrap();
        s.init_schema().unwrap();
        s
    }

    #[test]
    fn test_nested_begin_rejected() {
        let mut s = store();
        s.begin().unwrap();
        let err = s.begin().unwrap_err();
        assert_eq!(err.op, TxOp::Begin);
        assert!(matches!(err.source, DbError::TransactionActive));
        s.rollback().unwrap();
        assert!(!s.in_transaction());
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let mut s = store();
        s.rollback().unwrap();
        s.begin().unwrap();
        s.rollback().unwrap();
        s.rollback().unwrap();
        s.begin().unwrap();
        s.commit().unwrap();
        s.rollback().unwrap();
        assert!(!s.in_transaction());
    }

    #[test]
    fn test_commit_without_begin_fails() {
        let mut s = store();
        let err = s.commit().unwrap_err();
        assert!(matches!(err.source, DbError::NoTransaction));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut s = store();
        s.begin().unwrap();
        s.disconnect();
        s.disconnect();
        assert!(s.is_closed());
        assert!(s.rollback().is_ok());
        assert!(matches!(
            s.begin().unwrap_err().source,
            DbError::Closed
        ));
    }

    #[test]
    fn test_run_requires_existing_system() {
        let mut s = store();
        let run = RunRecord {
            run_start: chrono::Utc::now(),
            run_end: None,
            duration_secs: 60,
            rteval_version: None,
            load_average: None,
            loads: vec![],
            workload_cmdline: None,
            annotation: None,
            report_filename: None,
        };
        assert!(s.insert_run(SystemKey(42), &run).is_err());
    }

    #[test]
    fn test_queue_lifecycle() {
        let s = store();
        let a = s.enqueue("report-a.json").unwrap();
        let b = s.enqueue("report-b.json").unwrap();
        let pending = s.pending(10).unwrap();
        assert_eq!(pending.iter().map(|p| p.submid).collect::<Vec<_>>(), vec![a, b]);

        s.mark_started(a).unwrap();
        s.mark_finished(a, Status::GeneralDbError).unwrap();
        let sub = s.submission(a).unwrap().unwrap();
        assert_eq!(sub.status, Status::GeneralDbError);
        assert!(sub.parse_start.is_some() && sub.parse_end.is_some());
        assert_eq!(s.pending(10).unwrap().len(), 1);

        assert!(s.requeue(a).unwrap());
        assert!(!s.requeue(999).unwrap());
        assert_eq!(s.pending(1).unwrap()[0].submid, a);
    }

    #[test]
    fn test_count_rows_allowlist() {
        let s = store();
        assert_eq!(s.count_rows("systems").unwrap(), 0);
        assert!(s.count_rows("sqlite_master; DROP TABLE systems").is_err());
    }
}
