//! Consumer of the operations channel.
//!
//! Each message is handled, then the deposit's slot is released, then the
//! coordinator tries to promote the oldest queued deposit into the freed
//! slot. The message is acknowledged whatever happens along the way.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::audit::AuditEvent;
use crate::deposit::{DepositField, DepositState};
use crate::handler::{
    unexpected_error_message, DepositHandlers, HandlerContext, HandlerError, HandlerOutcome,
};
use crate::messaging::{publish, Delivery, DepositOperation, MessageListener, OperationMessage};
use crate::metrics;
use crate::status::{PipelineState, PipelineStateStore};

use super::types::{CoordinatorError, Promotion};

/// Drives deposits through their lifecycle from operation messages.
pub struct DepositCoordinator {
    handlers: Arc<DepositHandlers>,
    pipeline: Arc<dyn PipelineStateStore>,
}

impl DepositCoordinator {
    pub fn new(handlers: Arc<DepositHandlers>, pipeline: Arc<dyn PipelineStateStore>) -> Self {
        Self { handlers, pipeline }
    }

    pub fn handlers(&self) -> &Arc<DepositHandlers> {
        &self.handlers
    }

    fn ctx(&self) -> &HandlerContext {
        self.handlers.context()
    }

    /// Recover in-memory state after a restart.
    ///
    /// Running deposits get their slot back without a job being re-sent (a
    /// job or outcome still on a durable channel is redelivered), quieted
    /// deposits are resumed, and the freed slots are then filled from the
    /// queue.
    pub async fn init(&self) -> Result<(), CoordinatorError> {
        let previous = self.pipeline.get_pipeline_state()?;
        self.set_pipeline_state(previous, PipelineState::Starting)?;

        let ctx = self.ctx();
        for deposit in ctx.deposits.list()? {
            match deposit.state {
                DepositState::Running => {
                    ctx.locks.release(&deposit.id)?;
                    if ctx.active.mark_active(&deposit.id) {
                        debug!("Restored slot of running deposit {}", deposit.id);
                    } else {
                        warn!(
                            "No free slot for running deposit {} ({} of {} in use)",
                            deposit.id,
                            ctx.active.active_count(),
                            ctx.active.max_concurrent()
                        );
                    }
                }
                DepositState::Quieted => {
                    ctx.locks.release(&deposit.id)?;
                    match self.handlers.resume(&deposit.id, None).await {
                        Ok(outcome) => {
                            debug!("Resumed quieted deposit {}: {}", deposit.id, outcome.label())
                        }
                        Err(e) => error!("Failed to resume deposit {}: {}", deposit.id, e),
                    }
                }
                _ => {}
            }
        }
        metrics::ACTIVE_DEPOSITS.set(ctx.active.active_count() as i64);

        self.set_pipeline_state(Some(PipelineState::Starting), PipelineState::Active)?;
        info!(
            "Deposit coordinator initialised with {} active deposits",
            ctx.active.active_count()
        );

        let promoted = self.fill_open_slots().await;
        if promoted > 0 {
            info!("Promoted {} queued deposits after init", promoted);
        }
        Ok(())
    }

    fn set_pipeline_state(
        &self,
        from: Option<PipelineState>,
        to: PipelineState,
    ) -> Result<(), CoordinatorError> {
        self.pipeline.set_pipeline_state(to)?;
        self.ctx().emit(AuditEvent::PipelineStateChanged {
            from_state: from.map(|s| s.to_string()),
            to_state: to.to_string(),
            user_id: None,
        });
        Ok(())
    }

    /// Handle one decoded operation message, then release its deposit's slot
    /// unless the deposit is still running.
    pub async fn dispatch(&self, message: &OperationMessage) {
        let ctx = self.ctx();
        let deposit_id = message.deposit_id.as_str();
        let operation = message.operation();
        debug!(
            "Deposit {}: handling {} from {}",
            deposit_id,
            message.action.as_str(),
            message.username.as_deref().unwrap_or("system")
        );

        let result = self
            .handlers
            .handle(deposit_id, message.username.as_deref(), &operation)
            .await;

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "error",
        };
        metrics::OPERATIONS_HANDLED
            .with_label_values(&[operation.name(), label])
            .inc();

        let handled_state = settled_state(&result);
        if let Err(e) = result {
            error!(
                "Deposit {}: {} failed: {}",
                deposit_id,
                operation.name(),
                e
            );
            self.fail_deposit(deposit_id, &unexpected_error_message(e.kind()));
        }

        // JOB_INTERRUPTED releases its own slot.
        if matches!(operation, DepositOperation::JobInterrupted { .. }) {
            return;
        }
        let state = match handled_state {
            Some(state) => Ok(state),
            None => ctx.deposits.get_state(deposit_id),
        };
        match state {
            Ok(DepositState::Running) => {}
            Ok(_) => ctx.release_slot(deposit_id),
            Err(e) => {
                error!("Deposit {}: failed to read state: {}", deposit_id, e);
                ctx.release_slot(deposit_id);
            }
        }
    }

    /// Mark a deposit failed outside of any handler.
    fn fail_deposit(&self, deposit_id: &str, message: &str) {
        let ctx = self.ctx();
        let from = ctx
            .deposits
            .get_state(deposit_id)
            .unwrap_or(DepositState::Unregistered);
        match ctx.deposits.fail(deposit_id, Some(message)) {
            Ok(()) => {
                metrics::DEPOSITS_FINISHED.with_label_values(&["failed"]).inc();
                ctx.audit_transition(deposit_id, from, DepositState::Failed, "error", None);
            }
            Err(e) => error!("Failed to mark deposit {} failed: {}", deposit_id, e),
        }
    }

    /// Promote the oldest queued deposit if a slot is free.
    ///
    /// The candidate's lock is taken once; losing the race abandons the
    /// promotion without retrying.
    pub async fn promote_next(&self) -> Result<Promotion, CoordinatorError> {
        let ctx = self.ctx();
        if !ctx.active.accepting_new_deposits() {
            return Ok(Promotion::Idle);
        }
        let Some(candidate) = ctx.deposits.first_queued_deposit()? else {
            return Ok(Promotion::Idle);
        };

        let Some(_guard) = ctx.lock_deposit(&candidate, None)? else {
            metrics::LOCK_CONTENTION.with_label_values(&["promote"]).inc();
            debug!("Promotion of deposit {} abandoned, lock held", candidate);
            return Ok(Promotion::Abandoned(candidate));
        };

        let state = ctx.deposits.get_state(&candidate)?;
        if state != DepositState::Queued {
            debug!(
                "Promotion of deposit {} abandoned, state is {}",
                candidate, state
            );
            return Ok(Promotion::Abandoned(candidate));
        }
        if !ctx.active.mark_active(&candidate) {
            return Ok(Promotion::Abandoned(candidate));
        }
        metrics::ACTIVE_DEPOSITS.set(ctx.active.active_count() as i64);

        match self.start_deposit(&candidate).await {
            Ok(()) => {
                metrics::DEPOSITS_PROMOTED.inc();
                ctx.audit_transition(
                    &candidate,
                    DepositState::Queued,
                    DepositState::Running,
                    "promote",
                    None,
                );
                Ok(Promotion::Promoted(candidate))
            }
            Err(e) => {
                error!("Failed to start deposit {}: {}", candidate, e);
                metrics::PROMOTION_FAILURES.inc();
                let kind = match &e {
                    CoordinatorError::Store(_) => "StoreError",
                    CoordinatorError::Transport(_) => "TransportError",
                    CoordinatorError::Handler(inner) => inner.kind(),
                };
                self.fail_deposit(&candidate, &unexpected_error_message(kind));
                ctx.release_slot(&candidate);
                Ok(Promotion::Failed(candidate))
            }
        }
    }

    /// Set the claimed candidate running and send its next job.
    async fn start_deposit(&self, deposit_id: &str) -> Result<(), CoordinatorError> {
        let ctx = self.ctx();
        ctx.deposits.set_state(deposit_id, DepositState::Running)?;
        let start_time = DepositField::StartTime.as_str();
        if ctx.deposits.get_field(deposit_id, start_time)?.is_none() {
            ctx.deposits
                .set_field(deposit_id, start_time, &Utc::now().to_rfc3339())?;
        }

        let fields = ctx
            .deposits
            .get(deposit_id)?
            .map(|deposit| deposit.fields)
            .unwrap_or_default();
        let job = ctx.sequencer.next_job(deposit_id, &fields)?;
        publish(ctx.job_sender.as_ref(), &job).await?;
        info!(
            "Promoted deposit {}, sent {} ({})",
            deposit_id, job.job_class_name, job.job_id
        );
        Ok(())
    }

    /// Promote queued deposits until the slots are full or the queue is empty.
    ///
    /// Returns the number of deposits promoted.
    pub async fn fill_open_slots(&self) -> usize {
        let mut promoted = 0;
        loop {
            match self.promote_next().await {
                Ok(Promotion::Promoted(_)) => promoted += 1,
                Ok(step) if step.made_progress() => {}
                Ok(_) => break,
                Err(e) => {
                    error!("Promotion failed: {}", e);
                    break;
                }
            }
        }
        promoted
    }

    fn drop_message(&self, deposit_id: Option<String>, reason: &str) {
        metrics::MESSAGES_DROPPED
            .with_label_values(&["operation", reason])
            .inc();
        self.ctx().emit(AuditEvent::MessageDropped {
            channel: "operation".to_string(),
            deposit_id,
            reason: reason.to_string(),
        });
    }
}

/// State the handler read back right after applying its effects.
fn settled_state(result: &Result<HandlerOutcome, HandlerError>) -> Option<DepositState> {
    match result {
        Ok(HandlerOutcome::Applied { to, .. }) => Some(*to),
        _ => None,
    }
}

fn acknowledge(delivery: &Delivery) {
    if let Err(e) = delivery.ack() {
        error!(
            "Failed to acknowledge operation message {}: {}",
            delivery.delivery_tag(),
            e
        );
    }
}

#[async_trait]
impl MessageListener for DepositCoordinator {
    async fn on_message(&self, delivery: Delivery) {
        let message: OperationMessage = match serde_json::from_str(delivery.payload()) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed operation message: {}", e);
                self.drop_message(None, "malformed");
                acknowledge(&delivery);
                return;
            }
        };

        self.dispatch(&message).await;

        if let Err(e) = self.promote_next().await {
            error!("Promotion after {} failed: {}", message.deposit_id, e);
        }

        acknowledge(&delivery);
    }
}
