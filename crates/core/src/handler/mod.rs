//! Operation and job-outcome handlers.
//!
//! Every handler targets one deposit and follows the same shape: take the
//! deposit's supervisor lock (tagged with the requesting user), re-read its
//! state from the store, decide through [`transition`], apply the effects, and
//! release the lock. Losing the lock race abandons the operation.

mod context;
mod job_failure;
mod job_success;
mod pipeline_quiet;
mod transition;
mod types;

pub use context::{HandlerContext, SYSTEM_OWNER};
pub use job_failure::{failure_message, unexpected_error_message};
pub use pipeline_quiet::PipelineQuietHandler;
pub use transition::{requires_lock, transition, Effect, Transition};
pub use types::{HandlerError, HandlerOutcome};

use std::collections::HashMap;

use tracing::debug;

use crate::audit::AuditEvent;
use crate::messaging::{DepositOperation, JobFailureInfo};
use crate::metrics;

/// The per-action handlers over a shared [`HandlerContext`].
pub struct DepositHandlers {
    ctx: HandlerContext,
}

impl DepositHandlers {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    /// Route an operation to its handler.
    pub async fn handle(
        &self,
        deposit_id: &str,
        username: Option<&str>,
        operation: &DepositOperation,
    ) -> Result<HandlerOutcome, HandlerError> {
        match operation {
            DepositOperation::Register { additional_info } => {
                self.register(deposit_id, username, additional_info).await
            }
            DepositOperation::Pause => self.pause(deposit_id, username).await,
            DepositOperation::Resume => self.resume(deposit_id, username).await,
            DepositOperation::Quiet => self.quiet(deposit_id, username).await,
            DepositOperation::Destroy => self.destroy(deposit_id, username).await,
            DepositOperation::JobSuccess { job_id } => {
                self.job_success(deposit_id, username, job_id.as_deref())
                    .await
            }
            DepositOperation::JobFailure { job_id, failure } => {
                self.job_failure(deposit_id, username, job_id.as_deref(), failure)
                    .await
            }
            DepositOperation::JobInterrupted { job_id, failure } => {
                self.job_interrupted(deposit_id, username, job_id.as_deref(), failure)
                    .await
            }
            DepositOperation::Unsupported { action } => {
                self.unsupported(deposit_id, username, action).await
            }
        }
    }

    /// Persist the registration fields and queue the deposit. A deposit that
    /// is already known is left alone.
    pub async fn register(
        &self,
        deposit_id: &str,
        username: Option<&str>,
        additional_info: &HashMap<String, String>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let operation = DepositOperation::Register {
            additional_info: additional_info.clone(),
        };
        let outcome = self.apply(deposit_id, username, &operation).await?;
        if let HandlerOutcome::Applied { .. } = outcome {
            let mut fields: Vec<String> = additional_info.keys().cloned().collect();
            fields.sort();
            self.ctx.emit(AuditEvent::DepositRegistered {
                deposit_id: deposit_id.to_string(),
                registered_by: username.map(String::from),
                fields,
            });
        }
        Ok(outcome)
    }

    pub async fn pause(
        &self,
        deposit_id: &str,
        username: Option<&str>,
    ) -> Result<HandlerOutcome, HandlerError> {
        self.apply(deposit_id, username, &DepositOperation::Pause)
            .await
    }

    /// Quiet one deposit. Its processing slot is released by the caller.
    pub async fn quiet(
        &self,
        deposit_id: &str,
        username: Option<&str>,
    ) -> Result<HandlerOutcome, HandlerError> {
        self.apply(deposit_id, username, &DepositOperation::Quiet)
            .await
    }

    pub async fn resume(
        &self,
        deposit_id: &str,
        username: Option<&str>,
    ) -> Result<HandlerOutcome, HandlerError> {
        self.apply(deposit_id, username, &DepositOperation::Resume)
            .await
    }

    pub async fn destroy(
        &self,
        deposit_id: &str,
        username: Option<&str>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let outcome = self
            .apply(deposit_id, username, &DepositOperation::Destroy)
            .await?;
        if let HandlerOutcome::Applied { from, .. } = outcome {
            self.ctx.emit(AuditEvent::DepositDestroyed {
                deposit_id: deposit_id.to_string(),
                destroyed_by: username.map(String::from),
                previous_state: from.to_string(),
            });
        }
        Ok(outcome)
    }

    pub async fn job_success(
        &self,
        deposit_id: &str,
        username: Option<&str>,
        job_id: Option<&str>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let operation = DepositOperation::JobSuccess {
            job_id: job_id.map(String::from),
        };
        self.apply(deposit_id, username, &operation).await
    }

    pub async fn job_failure(
        &self,
        deposit_id: &str,
        username: Option<&str>,
        job_id: Option<&str>,
        failure: &JobFailureInfo,
    ) -> Result<HandlerOutcome, HandlerError> {
        let operation = DepositOperation::JobFailure {
            job_id: job_id.map(String::from),
            failure: failure.clone(),
        };
        self.apply(deposit_id, username, &operation).await
    }

    /// Demote a running deposit to quieted. Always releases the slot.
    pub async fn job_interrupted(
        &self,
        deposit_id: &str,
        username: Option<&str>,
        job_id: Option<&str>,
        failure: &JobFailureInfo,
    ) -> Result<HandlerOutcome, HandlerError> {
        let operation = DepositOperation::JobInterrupted {
            job_id: job_id.map(String::from),
            failure: failure.clone(),
        };
        let result = self.apply(deposit_id, username, &operation).await;
        self.ctx.release_slot(deposit_id);
        result
    }

    /// Fail the deposit for an action the coordinator does not know.
    pub async fn unsupported(
        &self,
        deposit_id: &str,
        username: Option<&str>,
        action: &str,
    ) -> Result<HandlerOutcome, HandlerError> {
        let operation = DepositOperation::Unsupported {
            action: action.to_string(),
        };
        self.apply(deposit_id, username, &operation).await
    }

    async fn apply(
        &self,
        deposit_id: &str,
        username: Option<&str>,
        operation: &DepositOperation,
    ) -> Result<HandlerOutcome, HandlerError> {
        let _guard = if requires_lock(operation) {
            match self.ctx.lock_deposit(deposit_id, username)? {
                Some(guard) => Some(guard),
                None => {
                    metrics::LOCK_CONTENTION
                        .with_label_values(&[operation.name()])
                        .inc();
                    return Ok(HandlerOutcome::LockUnavailable);
                }
            }
        } else {
            None
        };

        let from = self.ctx.deposits.get_state(deposit_id)?;
        let decided = transition(from, operation);
        if decided.is_noop() {
            debug!(
                "Deposit {}: {} does not apply in state {}",
                deposit_id,
                operation.name(),
                from
            );
            return Ok(HandlerOutcome::Skipped { state: from });
        }

        self.ctx.execute(deposit_id, &decided.effects).await?;

        let to = self.ctx.deposits.get_state(deposit_id)?;
        if !matches!(operation, DepositOperation::Destroy) {
            self.ctx
                .audit_transition(deposit_id, from, to, operation.name(), username);
        }
        Ok(HandlerOutcome::Applied { from, to })
    }
}
