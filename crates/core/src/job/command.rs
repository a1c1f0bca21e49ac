//! Jobs backed by an external program.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::messaging::JobMessage;

use super::config::JobDefinition;
use super::error::JobError;
use super::traits::DepositJob;

/// Longest stderr excerpt carried into a failure message.
const STDERR_EXCERPT_LEN: usize = 512;

/// Runs the job definition's program with the deposit and job ids in its
/// environment (`DEPOSIT_ID`, `JOB_ID`, `JOB_CLASS`).
///
/// A non-zero exit fails the job. A program killed by a signal counts as
/// interrupted so the deposit can be resumed.
pub struct CommandJob {
    job: JobMessage,
    definition: JobDefinition,
}

impl CommandJob {
    pub fn new(job: JobMessage, definition: JobDefinition) -> Self {
        Self { job, definition }
    }
}

#[async_trait]
impl DepositJob for CommandJob {
    async fn run(&self) -> Result<(), JobError> {
        let Some(program) = &self.definition.program else {
            debug!(
                "{} has no program, nothing to run for deposit {}",
                self.definition.class, self.job.deposit_id
            );
            return Ok(());
        };

        info!(
            "Running {} ({}) for deposit {}",
            self.definition.class,
            program.display(),
            self.job.deposit_id
        );

        let output = Command::new(program)
            .args(&self.definition.args)
            .env("DEPOSIT_ID", &self.job.deposit_id)
            .env("JOB_ID", &self.job.job_id)
            .env("JOB_CLASS", &self.job.job_class_name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| JobError::unexpected(&e))?;

        if output.status.success() {
            return Ok(());
        }

        match output.status.code() {
            Some(code) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stderr = stderr.trim();
                let excerpt: String = stderr.chars().take(STDERR_EXCERPT_LEN).collect();
                let message = if excerpt.is_empty() {
                    format!("{} exited with code {}", self.definition.class, code)
                } else {
                    format!(
                        "{} exited with code {}: {}",
                        self.definition.class, code, excerpt
                    )
                };
                Err(JobError::failed(message))
            }
            None => Err(JobError::interrupted(format!(
                "{} terminated by signal",
                self.definition.class
            ))),
        }
    }
}
