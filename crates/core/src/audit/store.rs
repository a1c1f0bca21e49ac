use chrono::{DateTime, Utc};
use thiserror::Error;

use super::AuditRecord;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row that cannot be turned back into a record.
    #[error("Corrupt audit record {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

/// Which audit records a query selects.
///
/// Every criterion that is set must match. Several event types select the
/// records of any of them.
#[derive(Debug, Clone)]
pub struct AuditFilter {
    pub deposit_id: Option<String>,
    pub event_types: Vec<String>,
    pub user_id: Option<String>,
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            deposit_id: None,
            event_types: Vec::new(),
            user_id: None,
            from: None,
            to: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deposit_id(mut self, deposit_id: impl Into<String>) -> Self {
        self.deposit_id = Some(deposit_id.into());
        self
    }

    /// Add an event type to the accepted set.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_time_range(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    /// Whether `record` satisfies the criteria. Paging is not considered.
    pub fn matches(&self, record: &AuditRecord) -> bool {
        let same = |wanted: &Option<String>, actual: &Option<String>| match wanted {
            Some(wanted) => actual.as_deref() == Some(wanted.as_str()),
            None => true,
        };

        same(&self.deposit_id, &record.deposit_id)
            && same(&self.user_id, &record.user_id)
            && (self.event_types.is_empty() || self.event_types.contains(&record.event_type))
            && self.from.is_none_or(|from| record.timestamp >= from)
            && self.to.is_none_or(|to| record.timestamp <= to)
    }
}

/// Append-only storage of audit records
pub trait AuditStore: Send + Sync {
    /// Insert a record, returning its assigned id
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError>;

    /// Matching records, newest first, paged by the filter
    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError>;

    /// Number of matching records, ignoring paging
    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError>;
}
