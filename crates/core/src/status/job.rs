//! Job status tracking.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;

/// Outcome recorded for a single job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunState {
    Running,
    Completed,
    Failed,
    Interrupted,
}

impl JobRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunState::Running => "running",
            JobRunState::Completed => "completed",
            JobRunState::Failed => "failed",
            JobRunState::Interrupted => "interrupted",
        }
    }
}

impl FromStr for JobRunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(JobRunState::Running),
            "completed" => Ok(JobRunState::Completed),
            "failed" => Ok(JobRunState::Failed),
            "interrupted" => Ok(JobRunState::Interrupted),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

/// Status record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub deposit_id: String,
    pub job_class: String,
    pub state: JobRunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Storage backend for job execution status.
pub trait JobStatusStore: Send + Sync {
    /// Record that a job began executing.
    fn started(&self, job_id: &str, deposit_id: &str, job_class: &str) -> Result<(), StoreError>;

    fn completed(&self, job_id: &str) -> Result<(), StoreError>;

    fn failed(&self, job_id: &str) -> Result<(), StoreError>;

    fn interrupted(&self, job_id: &str) -> Result<(), StoreError>;

    /// Forget every job of the deposit that did not complete, so it runs again.
    fn clear_stale(&self, deposit_id: &str) -> Result<(), StoreError>;

    /// Classes of the deposit's completed jobs, in completion order.
    fn completed_job_classes(&self, deposit_id: &str) -> Result<Vec<String>, StoreError>;

    /// All job records of the deposit, oldest first.
    fn list_for_deposit(&self, deposit_id: &str) -> Result<Vec<JobStatus>, StoreError>;

    fn delete_for_deposit(&self, deposit_id: &str) -> Result<(), StoreError>;
}
