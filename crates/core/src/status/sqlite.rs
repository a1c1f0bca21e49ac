//! SQLite-backed status store implementation.
//!
//! One database holds deposit records, the deposit queue, supervisor locks,
//! job status and the pipeline state flag, so a single `SqliteStatusStore`
//! implements every status trait.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::{
    DepositStore, JobRunState, JobStatus, JobStatusStore, PipelineState, PipelineStateStore,
    StoreError, SupervisorLock,
};
use crate::deposit::{Deposit, DepositField, DepositState};

/// Default lifetime of a supervisor lock.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

/// SQLite-backed status store.
pub struct SqliteStatusStore {
    conn: Mutex<Connection>,
    lock_ttl: Duration,
}

impl SqliteStatusStore {
    /// Create a new store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lock_ttl: DEFAULT_LOCK_TTL,
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lock_ttl: DEFAULT_LOCK_TTL,
        })
    }

    /// Set how long an acquired supervisor lock stays valid.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS deposits (
                id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS deposit_fields (
                deposit_id TEXT NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (deposit_id, name)
            );

            CREATE TABLE IF NOT EXISTS deposit_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                deposit_id TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS supervisor_locks (
                resource_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS job_status (
                job_id TEXT PRIMARY KEY,
                deposit_id TEXT NOT NULL,
                job_class TEXT NOT NULL,
                state TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT
            );

            CREATE TABLE IF NOT EXISTS pipeline_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_deposits_state ON deposits(state);
            CREATE INDEX IF NOT EXISTS idx_job_status_deposit ON job_status(deposit_id);
            "#,
        )?;
        Ok(())
    }

    fn ensure_deposit(tx: &Transaction<'_>, id: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT OR IGNORE INTO deposits (id, state, created_at, updated_at) VALUES (?, ?, ?, ?)",
            params![id, DepositState::Unregistered.as_str(), now, now],
        )?;
        Ok(())
    }

    fn write_state(tx: &Transaction<'_>, id: &str, state: DepositState) -> Result<(), StoreError> {
        Self::ensure_deposit(tx, id)?;
        tx.execute(
            "UPDATE deposits SET state = ?, updated_at = ? WHERE id = ?",
            params![state.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        if state != DepositState::Queued {
            tx.execute("DELETE FROM deposit_queue WHERE deposit_id = ?", params![id])?;
        }
        Ok(())
    }

    fn write_field(
        tx: &Transaction<'_>,
        id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        tx.execute(
            "INSERT INTO deposit_fields (deposit_id, name, value) VALUES (?, ?, ?)
             ON CONFLICT(deposit_id, name) DO UPDATE SET value = excluded.value",
            params![id, field, value],
        )?;
        Ok(())
    }

    fn parse_state(raw: &str) -> Result<DepositState, StoreError> {
        raw.parse::<DepositState>().map_err(StoreError::Corrupt)
    }

    fn read_fields(conn: &Connection, id: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut stmt = conn.prepare("SELECT name, value FROM deposit_fields WHERE deposit_id = ?")?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut fields = HashMap::new();
        for row in rows {
            let (name, value) = row?;
            fields.insert(name, value);
        }
        Ok(fields)
    }

    fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt(format!("invalid timestamp {}: {}", raw, e)))
    }

    fn finish_job(&self, job_id: &str, state: JobRunState) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE job_status SET state = ?, finished_at = ? WHERE job_id = ?",
            params![state.as_str(), Utc::now().to_rfc3339(), job_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("job {}", job_id)));
        }
        Ok(())
    }
}

impl DepositStore for SqliteStatusStore {
    fn get(&self, id: &str) -> Result<Option<Deposit>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM deposits WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(state) = state else {
            return Ok(None);
        };

        Ok(Some(Deposit {
            id: id.to_string(),
            state: Self::parse_state(&state)?,
            fields: Self::read_fields(&conn, id)?,
        }))
    }

    fn get_state(&self, id: &str) -> Result<DepositState, StoreError> {
        let conn = self.conn.lock().unwrap();
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM deposits WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match state {
            Some(raw) => Self::parse_state(&raw),
            None => Ok(DepositState::Unregistered),
        }
    }

    fn set_state(&self, id: &str, state: DepositState) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        Self::write_state(&tx, id, state)?;
        tx.commit()?;
        Ok(())
    }

    fn get_field(&self, id: &str, field: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM deposit_fields WHERE deposit_id = ? AND name = ?",
                params![id, field],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_field(&self, id: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        Self::ensure_deposit(&tx, id)?;
        Self::write_field(&tx, id, field, value)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_field(&self, id: &str, field: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM deposit_fields WHERE deposit_id = ? AND name = ?",
            params![id, field],
        )?;
        Ok(())
    }

    fn save(&self, id: &str, fields: &HashMap<String, String>) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        Self::ensure_deposit(&tx, id)?;
        for (name, value) in fields {
            Self::write_field(&tx, id, name, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn queue_deposit(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        Self::write_state(&tx, id, DepositState::Queued)?;
        tx.execute(
            "INSERT OR IGNORE INTO deposit_queue (deposit_id) VALUES (?)",
            params![id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn first_queued_deposit(&self) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT q.deposit_id FROM deposit_queue q
                 JOIN deposits d ON d.id = q.deposit_id
                 WHERE d.state = ?
                 ORDER BY q.seq ASC LIMIT 1",
                params![DepositState::Queued.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn list(&self) -> Result<Vec<Deposit>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, state FROM deposits ORDER BY rowid ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut raw = Vec::new();
        for row in rows {
            raw.push(row?);
        }

        let mut deposits = Vec::with_capacity(raw.len());
        for (id, state) in raw {
            let fields = Self::read_fields(&conn, &id)?;
            deposits.push(Deposit {
                state: Self::parse_state(&state)?,
                id,
                fields,
            });
        }
        Ok(deposits)
    }

    fn list_ids_in_state(&self, state: DepositState) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM deposits WHERE state = ? ORDER BY rowid ASC")?;
        let rows = stmt.query_map(params![state.as_str()], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn fail(&self, id: &str, message: Option<&str>) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        Self::write_state(&tx, id, DepositState::Failed)?;
        if let Some(message) = message {
            Self::write_field(&tx, id, DepositField::ErrorMessage.as_str(), message)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM deposit_queue WHERE deposit_id = ?", params![id])?;
        tx.execute("DELETE FROM deposit_fields WHERE deposit_id = ?", params![id])?;
        let removed = tx.execute("DELETE FROM deposits WHERE id = ?", params![id])?;
        if removed == 0 {
            return Err(StoreError::NotFound(format!("deposit {}", id)));
        }
        tx.commit()?;
        Ok(())
    }
}

impl SupervisorLock for SqliteStatusStore {
    fn acquire(&self, resource_id: &str, owner: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(self.lock_ttl.as_millis()).unwrap_or(i64::MAX);

        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM supervisor_locks WHERE resource_id = ? AND expires_at <= ?",
            params![resource_id, now],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO supervisor_locks (resource_id, owner, expires_at) VALUES (?, ?, ?)",
            params![resource_id, owner, now.saturating_add(ttl_ms)],
        )?;
        tx.commit()?;
        Ok(inserted == 1)
    }

    fn release(&self, resource_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM supervisor_locks WHERE resource_id = ?",
            params![resource_id],
        )?;
        Ok(())
    }
}

impl JobStatusStore for SqliteStatusStore {
    fn started(&self, job_id: &str, deposit_id: &str, job_class: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO job_status (job_id, deposit_id, job_class, state, started_at, finished_at)
             VALUES (?, ?, ?, ?, ?, NULL)",
            params![
                job_id,
                deposit_id,
                job_class,
                JobRunState::Running.as_str(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn completed(&self, job_id: &str) -> Result<(), StoreError> {
        self.finish_job(job_id, JobRunState::Completed)
    }

    fn failed(&self, job_id: &str) -> Result<(), StoreError> {
        self.finish_job(job_id, JobRunState::Failed)
    }

    fn interrupted(&self, job_id: &str) -> Result<(), StoreError> {
        self.finish_job(job_id, JobRunState::Interrupted)
    }

    fn clear_stale(&self, deposit_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM job_status WHERE deposit_id = ? AND state != ?",
            params![deposit_id, JobRunState::Completed.as_str()],
        )?;
        Ok(())
    }

    fn completed_job_classes(&self, deposit_id: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT job_class FROM job_status WHERE deposit_id = ? AND state = ?
             ORDER BY finished_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(
            params![deposit_id, JobRunState::Completed.as_str()],
            |row| row.get::<_, String>(0),
        )?;

        let mut classes = Vec::new();
        for row in rows {
            classes.push(row?);
        }
        Ok(classes)
    }

    fn list_for_deposit(&self, deposit_id: &str) -> Result<Vec<JobStatus>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT job_id, deposit_id, job_class, state, started_at, finished_at
             FROM job_status WHERE deposit_id = ? ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![deposit_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut statuses = Vec::new();
        for row in rows {
            let (job_id, deposit_id, job_class, state, started_at, finished_at) = row?;
            statuses.push(JobStatus {
                job_id,
                deposit_id,
                job_class,
                state: state.parse().map_err(StoreError::Corrupt)?,
                started_at: Self::parse_time(&started_at)?,
                finished_at: finished_at.as_deref().map(Self::parse_time).transpose()?,
            });
        }
        Ok(statuses)
    }

    fn delete_for_deposit(&self, deposit_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM job_status WHERE deposit_id = ?",
            params![deposit_id],
        )?;
        Ok(())
    }
}

impl PipelineStateStore for SqliteStatusStore {
    fn get_pipeline_state(&self) -> Result<Option<PipelineState>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row("SELECT state FROM pipeline_state WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        raw.map(|s| s.parse::<PipelineState>().map_err(StoreError::Corrupt))
            .transpose()
    }

    fn set_pipeline_state(&self, state: PipelineState) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pipeline_state (id, state, updated_at) VALUES (1, ?, ?)
             ON CONFLICT(id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            params![state.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
impl SqliteStatusStore {
    /// Overwrite a deposit's stored state with a value that does not parse.
    pub(crate) fn corrupt_state(&self, id: &str) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE deposits SET state = 'garbled' WHERE id = ?",
            params![id],
        )
        .unwrap();
    }
}
