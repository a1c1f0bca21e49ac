//! Wiring of the three coordinators onto the durable queues.

use std::sync::Arc;

use tracing::{error, info};

use deposit_core::{
    ActiveDepositsService, AuditHandle, AuditNotifier, Config, CoordinatorError,
    DepositCoordinator, DepositHandlers, HandlerContext, JobCoordinator, JobResolver,
    ListenerContainer, OrderedJobSequencer, PipelineCoordinator, QueueListenerContainer,
    SqliteQueue, SqliteStatusStore, TransportError,
};

/// The running control plane: channels, coordinators and their listeners.
pub struct ControlPlane {
    pub store: Arc<SqliteStatusStore>,
    pub active: Arc<ActiveDepositsService>,
    pub operations: SqliteQueue,
    pub jobs: SqliteQueue,
    pub pipeline_channel: SqliteQueue,
    pub deposits: Arc<DepositCoordinator>,
    pub pipeline: Arc<PipelineCoordinator>,
    operations_listener: Arc<QueueListenerContainer>,
    jobs_listener: Arc<QueueListenerContainer>,
    pipeline_listener: Arc<QueueListenerContainer>,
}

impl ControlPlane {
    /// Open the channels and build every component without starting anything.
    pub fn build(
        config: &Config,
        store: Arc<SqliteStatusStore>,
        resolver: Arc<dyn JobResolver>,
        audit: Option<AuditHandle>,
    ) -> Result<Self, TransportError> {
        let coordinator = &config.coordinator;
        let active = Arc::new(ActiveDepositsService::new(
            coordinator.max_concurrent_deposits,
        ));
        let sequencer = Arc::new(OrderedJobSequencer::from_config(
            &config.jobs,
            store.clone(),
        ));

        let queue_path = &config.database.queue_path;
        let operations = SqliteQueue::open(queue_path, "operations")?;
        let jobs = SqliteQueue::open(queue_path, "jobs")?;
        let pipeline_channel = SqliteQueue::open(queue_path, "pipeline")?;

        let ctx = HandlerContext {
            deposits: store.clone(),
            jobs: store.clone(),
            locks: store.clone(),
            active: Arc::clone(&active),
            job_sender: Arc::new(jobs.clone()),
            sequencer: sequencer.clone(),
            notifier: Arc::new(AuditNotifier::new(audit.clone())),
            audit: audit.clone(),
            cleanup_delay: coordinator.cleanup_delay(),
        };
        let deposits = Arc::new(DepositCoordinator::new(
            Arc::new(DepositHandlers::new(ctx)),
            store.clone(),
        ));
        let job_coordinator = Arc::new(JobCoordinator::new(
            store.clone(),
            Arc::clone(&active),
            store.clone(),
            resolver,
            sequencer,
            Arc::new(operations.clone()),
            audit.clone(),
        ));

        let operations_listener = Arc::new(QueueListenerContainer::new(
            "operations",
            Arc::new(operations.clone()),
            deposits.clone(),
            coordinator.operation_workers,
        ));
        let jobs_listener = Arc::new(QueueListenerContainer::new(
            "jobs",
            Arc::new(jobs.clone()),
            job_coordinator,
            coordinator.job_workers,
        ));
        let pipeline = Arc::new(PipelineCoordinator::new(
            store.clone(),
            deposits.clone(),
            operations_listener.clone(),
            jobs_listener.clone(),
            audit,
        ));
        let pipeline_listener = Arc::new(QueueListenerContainer::new(
            "pipeline",
            Arc::new(pipeline_channel.clone()),
            pipeline.clone(),
            1,
        ));

        Ok(Self {
            store,
            active,
            operations,
            jobs,
            pipeline_channel,
            deposits,
            pipeline,
            operations_listener,
            jobs_listener,
            pipeline_listener,
        })
    }

    /// Recover state from the store, then start consuming all three channels.
    pub async fn start(&self) -> Result<(), CoordinatorError> {
        self.deposits.init().await?;
        for listener in self.listeners() {
            listener.start().await?;
        }
        info!(
            "Control plane started ({} of {} slots in use)",
            self.active.active_count(),
            self.active.max_concurrent()
        );
        Ok(())
    }

    /// Stop every listener for good, waiting for in-flight messages.
    pub async fn shutdown(&self) {
        for listener in self.listeners() {
            if let Err(e) = listener.shutdown().await {
                error!("Failed to shut down {} listener: {}", listener.name(), e);
            }
        }
        info!("Control plane stopped");
    }

    /// Pipeline first so no control action races the others' shutdown.
    fn listeners(&self) -> [&Arc<QueueListenerContainer>; 3] {
        [
            &self.pipeline_listener,
            &self.operations_listener,
            &self.jobs_listener,
        ]
    }
}
