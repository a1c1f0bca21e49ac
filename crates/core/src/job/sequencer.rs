//! Fixed-order job sequencing.

use std::collections::HashMap;
use std::sync::Arc;

use crate::messaging::JobMessage;
use crate::status::{JobStatusStore, StoreError};

use super::config::JobsConfig;
use super::traits::JobSequencer;

/// Runs a configured list of jobs in order, then the cleanup job.
///
/// A job counts as done once the job status store has recorded it completed,
/// so a resumed deposit picks up at its first unfinished job.
pub struct OrderedJobSequencer {
    sequence: Vec<String>,
    cleanup: String,
    jobs: Arc<dyn JobStatusStore>,
}

impl OrderedJobSequencer {
    pub fn new(sequence: Vec<String>, cleanup: impl Into<String>, jobs: Arc<dyn JobStatusStore>) -> Self {
        Self {
            sequence,
            cleanup: cleanup.into(),
            jobs,
        }
    }

    pub fn from_config(config: &JobsConfig, jobs: Arc<dyn JobStatusStore>) -> Self {
        Self::new(
            config.sequence.iter().map(|job| job.class.clone()).collect(),
            config.cleanup.class.clone(),
            jobs,
        )
    }
}

impl JobSequencer for OrderedJobSequencer {
    fn next_job(
        &self,
        deposit_id: &str,
        _fields: &HashMap<String, String>,
    ) -> Result<JobMessage, StoreError> {
        let completed = self.jobs.completed_job_classes(deposit_id)?;
        let next = self
            .sequence
            .iter()
            .find(|class| !completed.contains(*class))
            .unwrap_or(&self.cleanup);
        Ok(JobMessage::new(deposit_id, next.clone()))
    }

    fn is_cleanup(&self, job_class_name: &str) -> bool {
        job_class_name == self.cleanup
    }
}
