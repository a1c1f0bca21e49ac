//! Scripted jobs for testing the job coordinator.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::job::{DepositJob, JobError, JobResolver};
use crate::messaging::JobMessage;

/// How a scripted job ends.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JobScript {
    #[default]
    Succeed,
    /// End with [`JobError::Failed`].
    Fail(String),
    /// End with [`JobError::Interrupted`].
    Interrupt(String),
    /// End with [`JobError::Unexpected`].
    Error { kind: String, message: String },
    /// Succeed after sleeping.
    Sleep(Duration),
}

impl JobScript {
    fn outcome(&self) -> Result<(), JobError> {
        match self {
            JobScript::Succeed | JobScript::Sleep(_) => Ok(()),
            JobScript::Fail(message) => Err(JobError::failed(message.clone())),
            JobScript::Interrupt(reason) => Err(JobError::interrupted(reason.clone())),
            JobScript::Error { kind, message } => Err(JobError::Unexpected {
                kind: kind.clone(),
                message: message.clone(),
                trace: Some(format!("at {}", kind)),
            }),
        }
    }
}

/// A job that records its run and ends as scripted.
pub struct ScriptedJob {
    job: JobMessage,
    script: JobScript,
    runs: Arc<RwLock<Vec<JobMessage>>>,
}

#[async_trait]
impl DepositJob for ScriptedJob {
    async fn run(&self) -> Result<(), JobError> {
        self.runs.write().unwrap().push(self.job.clone());
        if let JobScript::Sleep(duration) = self.script {
            tokio::time::sleep(duration).await;
        }
        self.script.outcome()
    }
}

/// Resolver handing out [`ScriptedJob`]s.
///
/// Classes without a script succeed. Classes marked unresolvable fail
/// resolution with an unexpected error.
///
/// # Example
///
/// ```rust,ignore
/// let resolver = ScriptedResolver::new();
/// resolver.set_script("ValidateContentJob", JobScript::Fail("bad checksum".into()));
///
/// // ... drive the job coordinator ...
/// assert_eq!(resolver.runs().len(), 2);
/// ```
#[derive(Debug)]
pub struct ScriptedResolver {
    scripts: Arc<RwLock<HashMap<String, JobScript>>>,
    unresolvable: Arc<RwLock<Vec<String>>>,
    runs: Arc<RwLock<Vec<JobMessage>>>,
}

impl Default for ScriptedResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(RwLock::new(HashMap::new())),
            unresolvable: Arc::new(RwLock::new(Vec::new())),
            runs: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Script how jobs of `class` end.
    pub fn set_script(&self, class: impl Into<String>, script: JobScript) {
        self.scripts.write().unwrap().insert(class.into(), script);
    }

    /// Make resolution of `class` fail.
    pub fn set_unresolvable(&self, class: impl Into<String>) {
        self.unresolvable.write().unwrap().push(class.into());
    }

    /// Jobs that actually ran, in order.
    pub fn runs(&self) -> Vec<JobMessage> {
        self.runs.read().unwrap().clone()
    }

    /// Classes of the jobs that ran, in order.
    pub fn run_classes(&self) -> Vec<String> {
        self.runs
            .read()
            .unwrap()
            .iter()
            .map(|job| job.job_class_name.clone())
            .collect()
    }
}

impl JobResolver for ScriptedResolver {
    fn resolve(&self, job: &JobMessage) -> Result<Box<dyn DepositJob>, JobError> {
        if self
            .unresolvable
            .read()
            .unwrap()
            .contains(&job.job_class_name)
        {
            return Err(JobError::Unexpected {
                kind: "UnknownJobClass".to_string(),
                message: format!("no job registered for class {}", job.job_class_name),
                trace: None,
            });
        }

        let script = self
            .scripts
            .read()
            .unwrap()
            .get(&job.job_class_name)
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(ScriptedJob {
            job: job.clone(),
            script,
            runs: Arc::clone(&self.runs),
        }))
    }
}
