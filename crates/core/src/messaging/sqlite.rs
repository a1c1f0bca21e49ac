//! SQLite-backed queue transport.
//!
//! Messages stay in the `queued_messages` table until acknowledged, so both
//! pending and unacknowledged deliveries survive a process restart. Opening a
//! channel makes every delivery a previous process left unacknowledged
//! visible again, oldest first.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::transport::{Acknowledger, Delivery, MessageSender, MessageSource, TransportError};

/// Longest a waiting consumer sleeps before looking at the table again.
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MIN_WAIT: Duration = Duration::from_millis(5);

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

struct SqliteQueueInner {
    name: String,
    conn: Mutex<Connection>,
    notify: Notify,
}

impl SqliteQueueInner {
    fn insert(&self, payload: &str, visible_at: i64) -> Result<(), TransportError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO queued_messages (channel, payload, visible_at, delivered)
             VALUES (?, ?, ?, 0)",
            params![self.name, payload, visible_at],
        )?;
        Ok(())
    }
}

impl Acknowledger for SqliteQueueInner {
    fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM queued_messages WHERE id = ? AND channel = ? AND delivered = 1",
            params![delivery_tag as i64, self.name],
        )?;
        if deleted == 0 {
            return Err(TransportError::Ack(format!(
                "unknown delivery tag {} on {}",
                delivery_tag, self.name
            )));
        }
        Ok(())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Durable queue usable as both sender and source.
///
/// Each channel name is an independent queue within the database. Cloning
/// yields another handle to the same channel.
#[derive(Clone)]
pub struct SqliteQueue {
    inner: Arc<SqliteQueueInner>,
}

impl SqliteQueue {
    /// Open the channel `name` in the database at `path`, creating the table
    /// if needed.
    pub fn open(path: &Path, name: impl Into<String>) -> Result<Self, TransportError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::with_connection(conn, name.into())
    }

    /// Open a channel in a private in-memory database (useful for testing).
    pub fn in_memory(name: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_connection(Connection::open_in_memory()?, name.into())
    }

    fn with_connection(conn: Connection, name: String) -> Result<Self, TransportError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queued_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT NOT NULL,
                payload TEXT NOT NULL,
                visible_at INTEGER NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_queued_messages_channel
                ON queued_messages(channel, delivered, id);
            "#,
        )?;

        let restored = conn.execute(
            "UPDATE queued_messages SET delivered = 0 WHERE channel = ? AND delivered = 1",
            params![name],
        )?;
        if restored > 0 {
            info!(
                "Restored {} unacknowledged messages on {}",
                restored, name
            );
        }

        Ok(Self {
            inner: Arc::new(SqliteQueueInner {
                name,
                conn: Mutex::new(conn),
                notify: Notify::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn count<P: rusqlite::Params>(&self, sql: &str, params: P) -> usize {
        let conn = self.inner.conn.lock().unwrap();
        match conn.query_row(sql, params, |row| row.get::<_, i64>(0)) {
            Ok(count) => count as usize,
            Err(e) => {
                warn!("Failed to count messages on {}: {}", self.inner.name, e);
                0
            }
        }
    }

    /// Messages visible and waiting to be delivered.
    pub fn ready_count(&self) -> usize {
        self.count(
            "SELECT COUNT(*) FROM queued_messages
             WHERE channel = ? AND delivered = 0 AND visible_at <= ?",
            params![self.inner.name, now_millis()],
        )
    }

    /// Messages delivered but not yet acknowledged.
    pub fn unacked_count(&self) -> usize {
        self.count(
            "SELECT COUNT(*) FROM queued_messages WHERE channel = ? AND delivered = 1",
            params![self.inner.name],
        )
    }

    /// Payloads visible and waiting to be delivered, oldest first.
    pub fn ready_payloads(&self) -> Result<Vec<String>, TransportError> {
        let conn = self.inner.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT payload FROM queued_messages
             WHERE channel = ? AND delivered = 0 AND visible_at <= ?
             ORDER BY id",
        )?;
        let payloads = stmt
            .query_map(params![self.inner.name, now_millis()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(payloads)
    }

    /// Take the oldest visible message without waiting.
    pub fn try_receive(&self) -> Result<Option<Delivery>, TransportError> {
        let conn = self.inner.conn.lock().unwrap();
        let next: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, payload FROM queued_messages
                 WHERE channel = ? AND delivered = 0 AND visible_at <= ?
                 ORDER BY id LIMIT 1",
                params![self.inner.name, now_millis()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, payload)) = next else {
            return Ok(None);
        };
        conn.execute(
            "UPDATE queued_messages SET delivered = 1 WHERE id = ?",
            params![id],
        )?;
        Ok(Some(Delivery::new(
            id as u64,
            payload,
            Arc::clone(&self.inner) as Arc<dyn Acknowledger>,
        )))
    }

    /// How long until the next delayed message becomes visible.
    fn next_due(&self) -> Option<Duration> {
        let conn = self.inner.conn.lock().unwrap();
        let due: Option<i64> = conn
            .query_row(
                "SELECT MIN(visible_at) FROM queued_messages WHERE channel = ? AND delivered = 0",
                params![self.inner.name],
                |row| row.get(0),
            )
            .ok()
            .flatten();
        due.map(|at| Duration::from_millis((at - now_millis()).max(0) as u64))
    }
}

#[async_trait]
impl MessageSender for SqliteQueue {
    async fn send(&self, payload: String, delay: Option<Duration>) -> Result<(), TransportError> {
        let delay_ms = delay.map(|d| d.as_millis() as i64).unwrap_or(0);
        self.inner.insert(&payload, now_millis() + delay_ms)?;
        self.inner.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl MessageSource for SqliteQueue {
    async fn receive(&self) -> Option<Delivery> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_receive() {
                Ok(Some(delivery)) => return Some(delivery),
                Ok(None) => {}
                Err(e) => warn!("Failed to read from {}: {}", self.inner.name, e),
            }

            let wait = self
                .next_due()
                .map_or(POLL_INTERVAL, |due| due.clamp(MIN_WAIT, POLL_INTERVAL));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn recover(&self) {
        let recovered = {
            let conn = self.inner.conn.lock().unwrap();
            conn.execute(
                "UPDATE queued_messages SET delivered = 0 WHERE channel = ? AND delivered = 1",
                params![self.inner.name],
            )
        };

        match recovered {
            Ok(0) => {}
            Ok(count) => {
                debug!("Recovered {} unacked messages on {}", count, self.inner.name);
                for _ in 0..count {
                    self.inner.notify.notify_one();
                }
            }
            Err(e) => warn!("Failed to recover messages on {}: {}", self.inner.name, e),
        }
    }
}
