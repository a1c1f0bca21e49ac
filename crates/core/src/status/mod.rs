//! Persistent status stores.
//!
//! The stores are the single source of truth for deposit, job and pipeline
//! state. Coordinators never cache what they read here beyond one message.

mod deposit;
mod job;
mod lock;
mod pipeline;
mod sqlite;

pub use deposit::DepositStore;
pub use job::{JobRunState, JobStatus, JobStatusStore};
pub use lock::{SupervisorLock, SupervisorLockGuard};
pub use pipeline::{PipelineState, PipelineStateStore};
pub use sqlite::{SqliteStatusStore, DEFAULT_LOCK_TTL};

use thiserror::Error;

/// Errors raised by status store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Stored data could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}
