use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{AuditError, AuditEvent, AuditFilter, AuditRecord, AuditStore};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS audit_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        event_type TEXT NOT NULL,
        deposit_id TEXT,
        user_id TEXT,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
    CREATE INDEX IF NOT EXISTS idx_audit_events_deposit_id ON audit_events(deposit_id);
    CREATE INDEX IF NOT EXISTS idx_audit_events_event_type ON audit_events(event_type);
    CREATE INDEX IF NOT EXISTS idx_audit_events_user_id ON audit_events(user_id);
"#;

/// SQLite-backed audit store
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    /// Open (or create) the audit database at `path`
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        Self::init(Connection::open(path)?)
    }

    /// Create an in-memory SQLite audit store (useful for testing)
    pub fn in_memory() -> Result<Self, AuditError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn build_where_clause(filter: &AuditFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref deposit_id) = filter.deposit_id {
            conditions.push("deposit_id = ?".to_string());
            params.push(Box::new(deposit_id.clone()));
        }

        if !filter.event_types.is_empty() {
            let placeholders = vec!["?"; filter.event_types.len()].join(", ");
            conditions.push(format!("event_type IN ({})", placeholders));
            for event_type in &filter.event_types {
                params.push(Box::new(event_type.clone()));
            }
        }

        if let Some(ref user_id) = filter.user_id {
            conditions.push("user_id = ?".to_string());
            params.push(Box::new(user_id.clone()));
        }

        if let Some(ref from) = filter.from {
            conditions.push("timestamp >= ?".to_string());
            params.push(Box::new(from.to_rfc3339()));
        }

        if let Some(ref to) = filter.to {
            conditions.push("timestamp <= ?".to_string());
            params.push(Box::new(to.to_rfc3339()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn decode_row(
        id: i64,
        timestamp: String,
        event_type: String,
        deposit_id: Option<String>,
        user_id: Option<String>,
        data: String,
    ) -> Result<AuditRecord, AuditError> {
        let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| AuditError::Corrupt {
                id,
                reason: format!("invalid timestamp: {}", e),
            })?
            .into();
        let data: AuditEvent = serde_json::from_str(&data)?;

        Ok(AuditRecord {
            id,
            timestamp,
            event_type,
            deposit_id,
            user_id,
            data,
        })
    }
}

impl AuditStore for SqliteAuditStore {
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let conn = self.conn.lock().unwrap();

        let data_json = serde_json::to_string(&record.data)?;

        conn.execute(
            "INSERT INTO audit_events (timestamp, event_type, deposit_id, user_id, data) VALUES (?, ?, ?, ?, ?)",
            params![
                record.timestamp.to_rfc3339(),
                record.event_type,
                record.deposit_id,
                record.user_id,
                data_json,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, mut params) = Self::build_where_clause(filter);
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let sql = format!(
            "SELECT id, timestamp, event_type, deposit_id, user_id, data FROM audit_events {} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        type Row = (i64, String, String, Option<String>, Option<String>, String);
        let rows = stmt
            .query_map(param_refs.as_slice(), |row| -> rusqlite::Result<Row> {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, timestamp, event_type, deposit_id, user_id, data) = row?;
            records.push(Self::decode_row(
                id, timestamp, event_type, deposit_id, user_id, data,
            )?);
        }
        Ok(records)
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM audit_events {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let count = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_store() -> SqliteAuditStore {
        SqliteAuditStore::in_memory().unwrap()
    }

    fn record(event: AuditEvent) -> AuditRecord {
        AuditRecord {
            id: 0,
            timestamp: Utc::now(),
            event_type: event.event_type().to_string(),
            deposit_id: event.deposit_id().map(String::from),
            user_id: event.user_id().map(String::from),
            data: event,
        }
    }

    fn service_started() -> AuditRecord {
        record(AuditEvent::ServiceStarted {
            version: "0.1.0".to_string(),
            config_hash: "abc123".to_string(),
        })
    }

    fn state_changed(deposit_id: &str, user_id: &str) -> AuditRecord {
        record(AuditEvent::DepositStateChanged {
            deposit_id: deposit_id.to_string(),
            from_state: "running".to_string(),
            to_state: "paused".to_string(),
            reason: Some("pause".to_string()),
            user_id: Some(user_id.to_string()),
        })
    }

    #[test]
    fn test_insert_and_query() {
        let store = create_test_store();

        let id = store.insert(&service_started()).unwrap();
        assert!(id > 0);

        let results = store.query(&AuditFilter::new()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        assert_eq!(results[0].event_type, "service_started");
    }

    #[test]
    fn test_query_by_event_type() {
        let store = create_test_store();
        store.insert(&service_started()).unwrap();
        store.insert(&state_changed("d-1", "user-1")).unwrap();
        store.insert(&state_changed("d-2", "user-2")).unwrap();

        let filter = AuditFilter::new().with_event_type("deposit_state_changed");
        assert_eq!(store.query(&filter).unwrap().len(), 2);

        let filter = AuditFilter::new().with_event_type("service_started");
        assert_eq!(store.query(&filter).unwrap().len(), 1);

        let filter = filter.with_event_type("deposit_state_changed");
        assert_eq!(store.count(&filter).unwrap(), 3);
    }

    #[test]
    fn test_query_by_deposit_and_user() {
        let store = create_test_store();
        store.insert(&state_changed("d-1", "user-1")).unwrap();
        store.insert(&state_changed("d-2", "user-1")).unwrap();
        store.insert(&state_changed("d-3", "user-2")).unwrap();

        let results = store
            .query(&AuditFilter::new().with_deposit_id("d-1"))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].deposit_id.as_deref(), Some("d-1"));

        let results = store
            .query(&AuditFilter::new().with_user_id("user-1"))
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_query_with_time_range() {
        let store = create_test_store();

        let now = Utc::now();
        let mut old_record = service_started();
        old_record.timestamp = now - Duration::hours(2);
        store.insert(&old_record).unwrap();

        let mut new_record = service_started();
        new_record.timestamp = now;
        store.insert(&new_record).unwrap();

        let filter = AuditFilter::new().with_time_range(Some(now - Duration::hours(1)), None);
        assert_eq!(store.query(&filter).unwrap().len(), 1);
    }

    #[test]
    fn test_pagination_and_count() {
        let store = create_test_store();
        for i in 0..5 {
            store
                .insert(&state_changed(&format!("d-{}", i), "user"))
                .unwrap();
        }

        let filter = AuditFilter::new().with_limit(2).with_offset(4);
        assert_eq!(store.query(&filter).unwrap().len(), 1);

        assert_eq!(store.count(&AuditFilter::new()).unwrap(), 5);
        assert_eq!(
            store
                .count(&AuditFilter::new().with_deposit_id("d-3"))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("audit.db");

        let store = SqliteAuditStore::new(&db_path).unwrap();
        store.insert(&service_started()).unwrap();
        assert!(db_path.exists());

        let reopened = SqliteAuditStore::new(&db_path).unwrap();
        assert_eq!(reopened.count(&AuditFilter::new()).unwrap(), 1);
    }
}
