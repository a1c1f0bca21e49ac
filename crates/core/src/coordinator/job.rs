//! Consumer of the jobs channel.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::active::ActiveDepositsService;
use crate::audit::{AuditEvent, AuditHandle};
use crate::job::{JobError, JobResolver, JobSequencer};
use crate::messaging::{
    publish, Delivery, DepositAction, JobMessage, MessageListener, MessageSender,
    OperationMessage,
};
use crate::metrics;
use crate::status::{JobStatusStore, PipelineState, PipelineStateStore};

/// Executes jobs and reports their outcome on the operations channel.
///
/// Jobs run inline on the consuming worker, one at a time per worker. There
/// is no automatic retry: every outcome goes back to the deposit coordinator.
pub struct JobCoordinator {
    pipeline: Arc<dyn PipelineStateStore>,
    active: Arc<ActiveDepositsService>,
    jobs: Arc<dyn JobStatusStore>,
    resolver: Arc<dyn JobResolver>,
    sequencer: Arc<dyn JobSequencer>,
    operations: Arc<dyn MessageSender>,
    audit: Option<AuditHandle>,
}

impl JobCoordinator {
    pub fn new(
        pipeline: Arc<dyn PipelineStateStore>,
        active: Arc<ActiveDepositsService>,
        jobs: Arc<dyn JobStatusStore>,
        resolver: Arc<dyn JobResolver>,
        sequencer: Arc<dyn JobSequencer>,
        operations: Arc<dyn MessageSender>,
        audit: Option<AuditHandle>,
    ) -> Self {
        Self {
            pipeline,
            active,
            jobs,
            resolver,
            sequencer,
            operations,
            audit,
        }
    }

    fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.try_emit(event);
        }
    }

    fn pipeline_active(&self) -> bool {
        match self.pipeline.get_pipeline_state() {
            Ok(Some(PipelineState::Active)) => true,
            Ok(state) => {
                debug!("Pipeline is {:?}, leaving job message pending", state);
                false
            }
            Err(e) => {
                error!("Failed to read pipeline state: {}", e);
                false
            }
        }
    }

    fn drop_message(&self, deposit_id: Option<String>, reason: &str) {
        metrics::MESSAGES_DROPPED
            .with_label_values(&["job", reason])
            .inc();
        self.emit(AuditEvent::MessageDropped {
            channel: "job".to_string(),
            deposit_id,
            reason: reason.to_string(),
        });
    }

    /// Resolve, record and run the job.
    ///
    /// A job that cannot be resolved never gets a status record.
    async fn execute(&self, job: &JobMessage) -> Result<(), JobError> {
        let runnable = self.resolver.resolve(job)?;
        self.jobs
            .started(&job.job_id, &job.deposit_id, &job.job_class_name)
            .map_err(|e| JobError::unexpected(&e))?;
        self.emit(AuditEvent::JobStarted {
            deposit_id: job.deposit_id.clone(),
            job_id: job.job_id.clone(),
            job_class: job.job_class_name.clone(),
        });

        let result = runnable.run().await;
        let recorded = match &result {
            Ok(()) => self.jobs.completed(&job.job_id),
            Err(e) if e.is_interrupted() => self.jobs.interrupted(&job.job_id),
            Err(_) => self.jobs.failed(&job.job_id),
        };
        match (result, recorded) {
            // A completion the sequencer cannot see would re-run the job.
            (Ok(()), Err(e)) => Err(JobError::unexpected(&e)),
            (result, Err(e)) => {
                error!("Failed to record outcome of job {}: {}", job.job_id, e);
                result
            }
            (result, Ok(())) => result,
        }
    }

    /// Run a decoded job and send its outcome.
    pub async fn run_job(&self, job: &JobMessage) {
        info!(
            "Running {} ({}) for deposit {}",
            job.job_class_name, job.job_id, job.deposit_id
        );
        let started = Instant::now();
        let result = self.execute(job).await;
        let elapsed = started.elapsed();

        let (action, outcome) = match &result {
            Ok(()) => (DepositAction::JobSuccess, "completed"),
            Err(e) if e.is_interrupted() => (DepositAction::JobInterrupted, "interrupted"),
            Err(_) => (DepositAction::JobFailure, "failed"),
        };
        metrics::JOBS_EXECUTED
            .with_label_values(&[job.job_class_name.as_str(), outcome])
            .inc();
        metrics::JOB_DURATION
            .with_label_values(&[job.job_class_name.as_str()])
            .observe(elapsed.as_secs_f64());

        let mut message = OperationMessage::job_outcome(job, action);
        match &result {
            Ok(()) => info!("Job {} completed in {:?}", job.job_id, elapsed),
            Err(e) => {
                warn!("Job {} {}: {}", job.job_id, outcome, e);
                message = message.with_failure(e.to_failure_info());
            }
        }
        self.emit(AuditEvent::JobFinished {
            deposit_id: job.deposit_id.clone(),
            job_id: job.job_id.clone(),
            job_class: job.job_class_name.clone(),
            outcome: outcome.to_string(),
            duration_ms: elapsed.as_millis() as u64,
            error: result.as_ref().err().map(|e| e.to_string()),
        });

        if let Err(e) = publish(self.operations.as_ref(), &message).await {
            error!(
                "Failed to report {} of job {}: {}",
                message.action.as_str(),
                job.job_id,
                e
            );
        }
    }
}

#[async_trait]
impl MessageListener for JobCoordinator {
    async fn on_message(&self, delivery: Delivery) {
        // Dropping the delivery unacknowledged keeps it pending until the
        // listener is restarted.
        if !self.pipeline_active() {
            metrics::MESSAGES_DEFERRED.inc();
            return;
        }

        let job: JobMessage = match serde_json::from_str(delivery.payload()) {
            Ok(job) => job,
            Err(e) => {
                warn!("Dropping malformed job message: {}", e);
                self.drop_message(None, "malformed");
                acknowledge(&delivery);
                return;
            }
        };

        if !self.active.is_deposit_active(&job.deposit_id)
            && !self.sequencer.is_cleanup(&job.job_class_name)
        {
            debug!(
                "Dropping {} for inactive deposit {}",
                job.job_class_name, job.deposit_id
            );
            self.drop_message(Some(job.deposit_id.clone()), "stale");
            acknowledge(&delivery);
            return;
        }

        acknowledge(&delivery);
        self.run_job(&job).await;
    }
}

fn acknowledge(delivery: &Delivery) {
    if let Err(e) = delivery.ack() {
        error!(
            "Failed to acknowledge job message {}: {}",
            delivery.delivery_tag(),
            e
        );
    }
}
