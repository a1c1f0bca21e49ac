//! Trait definitions for the job module.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::messaging::JobMessage;
use crate::status::StoreError;

use super::error::JobError;

/// A unit of work executed against one deposit.
#[async_trait]
pub trait DepositJob: Send + Sync {
    /// Run the job to completion.
    ///
    /// Return [`JobError::Interrupted`] to stop cooperatively.
    async fn run(&self) -> Result<(), JobError>;
}

/// Maps a job message to a runnable job.
pub trait JobResolver: Send + Sync {
    fn resolve(&self, job: &JobMessage) -> Result<Box<dyn DepositJob>, JobError>;
}

/// Decides which job a deposit runs next.
pub trait JobSequencer: Send + Sync {
    /// Build the next job message for the deposit.
    ///
    /// `fields` is the deposit's current field map.
    fn next_job(
        &self,
        deposit_id: &str,
        fields: &HashMap<String, String>,
    ) -> Result<JobMessage, StoreError>;

    /// Returns true if `job_class_name` is the terminal cleanup job.
    fn is_cleanup(&self, job_class_name: &str) -> bool;
}
