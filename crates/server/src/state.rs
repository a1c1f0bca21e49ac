use std::sync::Arc;

use deposit_core::{
    AuditStore, Config, DepositStore, JobStatusStore, MessageSender, PipelineCoordinator,
    SanitizedConfig,
};

/// Shared application state
pub struct AppState {
    config: Config,
    deposits: Arc<dyn DepositStore>,
    jobs: Arc<dyn JobStatusStore>,
    audit_store: Arc<dyn AuditStore>,
    pipeline: Arc<PipelineCoordinator>,
    /// Producer side of the pipeline control channel.
    pipeline_channel: Arc<dyn MessageSender>,
}

impl AppState {
    pub fn new(
        config: Config,
        deposits: Arc<dyn DepositStore>,
        jobs: Arc<dyn JobStatusStore>,
        audit_store: Arc<dyn AuditStore>,
        pipeline: Arc<PipelineCoordinator>,
        pipeline_channel: Arc<dyn MessageSender>,
    ) -> Self {
        Self {
            config,
            deposits,
            jobs,
            audit_store,
            pipeline,
            pipeline_channel,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn deposits(&self) -> &dyn DepositStore {
        self.deposits.as_ref()
    }

    pub fn jobs(&self) -> &dyn JobStatusStore {
        self.jobs.as_ref()
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn pipeline(&self) -> &PipelineCoordinator {
        &self.pipeline
    }

    pub fn pipeline_channel(&self) -> &dyn MessageSender {
        self.pipeline_channel.as_ref()
    }
}
