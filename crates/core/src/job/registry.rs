//! Job class registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::messaging::JobMessage;

use super::command::CommandJob;
use super::config::JobsConfig;
use super::error::JobError;
use super::traits::{DepositJob, JobResolver};

/// Builds a job instance for a message.
pub type JobFactory = Arc<dyn Fn(&JobMessage) -> Box<dyn DepositJob> + Send + Sync>;

/// [`JobResolver`] backed by a map of class name to factory.
#[derive(Default, Clone)]
pub struct JobRegistry {
    factories: HashMap<String, JobFactory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a [`CommandJob`] for every configured job.
    pub fn from_config(config: &JobsConfig) -> Self {
        let mut registry = Self::new();
        for definition in config.all() {
            let definition = definition.clone();
            registry.register(definition.class.clone(), move |job: &JobMessage| {
                Box::new(CommandJob::new(job.clone(), definition.clone())) as Box<dyn DepositJob>
            });
        }
        registry
    }

    /// Register a factory, replacing any previous one for the class.
    pub fn register<F>(&mut self, class: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&JobMessage) -> Box<dyn DepositJob> + Send + Sync + 'static,
    {
        self.factories.insert(class.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }

    pub fn classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }
}

impl JobResolver for JobRegistry {
    fn resolve(&self, job: &JobMessage) -> Result<Box<dyn DepositJob>, JobError> {
        let factory = self
            .factories
            .get(&job.job_class_name)
            .ok_or_else(|| JobError::Unexpected {
                kind: "UnknownJobClass".to_string(),
                message: format!("no job registered for class {}", job.job_class_name),
                trace: None,
            })?;
        Ok(factory(job))
    }
}
