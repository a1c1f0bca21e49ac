//! Coordinator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the deposit, job and pipeline coordinators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Maximum deposits holding a processing slot at once, per process.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_deposits: usize,

    /// Lifetime of a supervisor lock (seconds).
    /// An expired lock can be taken by anyone, so a crashed holder never
    /// blocks a deposit for longer than this.
    #[serde(default = "default_lock_ttl")]
    pub supervisor_lock_ttl_secs: u64,

    /// Delay between a deposit finishing and its cleanup job running (seconds).
    #[serde(default = "default_cleanup_delay")]
    pub cleanup_delay_secs: u64,

    /// Concurrent consumers of the operations channel.
    #[serde(default = "default_operation_workers")]
    pub operation_workers: usize,

    /// Concurrent consumers of the jobs channel.
    /// Each worker runs one job at a time.
    #[serde(default = "default_job_workers")]
    pub job_workers: usize,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_lock_ttl() -> u64 {
    300 // 5 minutes
}

fn default_cleanup_delay() -> u64 {
    3600 // 1 hour
}

fn default_operation_workers() -> usize {
    2
}

fn default_job_workers() -> usize {
    4
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_deposits: default_max_concurrent(),
            supervisor_lock_ttl_secs: default_lock_ttl(),
            cleanup_delay_secs: default_cleanup_delay(),
            operation_workers: default_operation_workers(),
            job_workers: default_job_workers(),
        }
    }
}

impl CoordinatorConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.supervisor_lock_ttl_secs)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_delay_secs)
    }
}
