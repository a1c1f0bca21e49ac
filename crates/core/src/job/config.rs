//! Configuration for the job sequence.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One job in the processing sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Class name carried in job messages.
    pub class: String,

    /// External program to run for this job. Jobs without one succeed
    /// immediately.
    #[serde(default)]
    pub program: Option<PathBuf>,

    #[serde(default)]
    pub args: Vec<String>,
}

impl JobDefinition {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            program: None,
            args: Vec::new(),
        }
    }
}

/// Ordered jobs every deposit goes through, then the cleanup job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_sequence")]
    pub sequence: Vec<JobDefinition>,

    /// Runs after the deposit finished, delayed by the coordinator's
    /// cleanup delay.
    #[serde(default = "default_cleanup")]
    pub cleanup: JobDefinition,
}

fn default_sequence() -> Vec<JobDefinition> {
    ["ParseBagJob", "ValidateContentJob", "IngestContentJob"]
        .into_iter()
        .map(JobDefinition::new)
        .collect()
}

fn default_cleanup() -> JobDefinition {
    JobDefinition::new("CleanupDepositJob")
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            sequence: default_sequence(),
            cleanup: default_cleanup(),
        }
    }
}

impl JobsConfig {
    /// Every configured job, the cleanup job last.
    pub fn all(&self) -> impl Iterator<Item = &JobDefinition> {
        self.sequence.iter().chain(std::iter::once(&self.cleanup))
    }
}
