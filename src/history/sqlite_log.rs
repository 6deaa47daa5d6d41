//! SQLite Execution Log - durable backing for the history store
//!
//! One row per record: a few indexed columns for housekeeping plus the full
//! record as a JSON payload, so records written by newer versions (extra
//! fields) still load.

use crate::error::{MediatorError, Result};
use crate::history::record::ExecutionRecord;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const LOG_FILE_NAME: &str = "execution_log.db";

pub struct SqliteLog {
    path: PathBuf,
    db: Mutex<Connection>,
}

impl SqliteLog {
    /// Open or create the log inside `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let path = dir.join(LOG_FILE_NAME);
        let db = Connection::open(&path)
            .map_err(|e| MediatorError::Persistence(format!("Failed to open {}: {}", path.display(), e)))?;

        let log = Self {
            path,
            db: Mutex::new(db),
        };
        log.init_schema()?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| MediatorError::Persistence("execution log lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.conn()?;

        db.execute(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                signature TEXT NOT NULL,
                store TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_executions_store ON executions(store)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_executions_signature ON executions(signature)",
            [],
        )?;

        Ok(())
    }

    pub fn append(&self, record: &ExecutionRecord) -> Result<()> {
        self.append_all(std::slice::from_ref(record), usize::MAX)
    }

    /// Insert `records` and cut the log back to the `keep` most recent rows,
    /// in one transaction.
    pub fn append_all(&self, records: &[ExecutionRecord], keep: usize) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO executions (id, signature, store, timestamp, payload)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for record in records {
                insert.execute(params![
                    record.id.to_string(),
                    record.signature.as_str(),
                    record.store,
                    record.timestamp.to_rfc3339(),
                    serde_json::to_string(record)?,
                ])?;
            }
        }
        let removed = Self::truncate_in(&tx, keep)?;
        tx.commit()?;

        if removed > 0 {
            debug!("Truncated {} record(s) from execution log", removed);
        }
        Ok(())
    }

    /// Drop all but the `keep` most recent rows. Returns the number removed.
    pub fn truncate(&self, keep: usize) -> Result<usize> {
        let db = self.conn()?;
        Self::truncate_in(&db, keep)
    }

    fn truncate_in(db: &Connection, keep: usize) -> Result<usize> {
        let offset = i64::try_from(keep).unwrap_or(i64::MAX);
        let removed = db.execute(
            r#"
            DELETE FROM executions
            WHERE seq <= (SELECT seq FROM executions ORDER BY seq DESC LIMIT 1 OFFSET ?1)
            "#,
            params![offset],
        )?;
        Ok(removed)
    }

    /// The `limit` most recent records, oldest first. Unreadable payloads are skipped.
    pub fn load(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT payload FROM (
                SELECT seq, payload FROM executions ORDER BY seq DESC LIMIT ?1
            ) ORDER BY seq ASC
            "#,
        )?;

        let payloads = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match serde_json::from_str::<ExecutionRecord>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable execution record: {}", e),
            }
        }

        info!("Loaded {} execution record(s) from {}", records.len(), self.path.display());
        Ok(records)
    }

    pub fn clear(&self) -> Result<()> {
        let db = self.conn()?;
        db.execute("DELETE FROM executions", [])?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let db = self.conn()?;
        let count: i64 = db.query_row("SELECT COUNT(*) FROM executions", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
