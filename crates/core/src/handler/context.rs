//! Collaborators shared by the handlers, and the effect executor.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::active::ActiveDepositsService;
use crate::audit::{AuditEvent, AuditHandle};
use crate::deposit::{Deposit, DepositField, DepositState};
use crate::job::JobSequencer;
use crate::messaging::MessageSender;
use crate::metrics;
use crate::notify::DepositNotifier;
use crate::status::{DepositStore, JobStatusStore, SupervisorLock, SupervisorLockGuard};

use super::transition::Effect;
use super::types::HandlerError;

/// Lock owner recorded when a message carries no username.
pub const SYSTEM_OWNER: &str = "deposit-coordinator";

/// Everything a handler may touch. Cloning is cheap.
#[derive(Clone)]
pub struct HandlerContext {
    pub deposits: Arc<dyn DepositStore>,
    pub jobs: Arc<dyn JobStatusStore>,
    pub locks: Arc<dyn SupervisorLock>,
    pub active: Arc<ActiveDepositsService>,
    pub job_sender: Arc<dyn MessageSender>,
    pub sequencer: Arc<dyn JobSequencer>,
    pub notifier: Arc<dyn DepositNotifier>,
    pub audit: Option<AuditHandle>,
    /// Delay before the cleanup job of a finished deposit runs.
    pub cleanup_delay: Duration,
}

impl HandlerContext {
    /// Try once to take the deposit's supervisor lock for `username`.
    pub fn lock_deposit(
        &self,
        deposit_id: &str,
        username: Option<&str>,
    ) -> Result<Option<SupervisorLockGuard>, HandlerError> {
        let owner = username.unwrap_or(SYSTEM_OWNER);
        Ok(SupervisorLockGuard::try_acquire(&self.locks, deposit_id, owner)?)
    }

    /// Release the deposit's processing slot.
    pub fn release_slot(&self, deposit_id: &str) {
        self.active.mark_inactive(deposit_id);
        metrics::ACTIVE_DEPOSITS.set(self.active.active_count() as i64);
    }

    pub(crate) fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.try_emit(event);
        }
    }

    fn load(&self, deposit_id: &str) -> Result<Deposit, HandlerError> {
        self.deposits
            .get(deposit_id)?
            .ok_or_else(|| HandlerError::NotFound(deposit_id.to_string()))
    }

    /// Set endTime to now if the deposit has a startTime.
    pub(crate) fn stamp_end_time(&self, deposit_id: &str) -> Result<(), HandlerError> {
        let start = self
            .deposits
            .get_field(deposit_id, DepositField::StartTime.as_str())?;
        if start.is_some() {
            self.deposits.set_field(
                deposit_id,
                DepositField::EndTime.as_str(),
                &Utc::now().to_rfc3339(),
            )?;
        }
        Ok(())
    }

    /// Notify the depositor of the deposit's current outcome.
    pub(crate) fn send_results(&self, deposit_id: &str) -> Result<(), HandlerError> {
        let deposit = self.load(deposit_id)?;
        self.notifier.send_results(&deposit);
        Ok(())
    }

    pub(crate) fn send_complete_event(&self, deposit_id: &str) -> Result<(), HandlerError> {
        let deposit = self.load(deposit_id)?;
        self.notifier.send_complete_event(&deposit);
        Ok(())
    }

    /// Apply `effects` in order. The caller holds the supervisor lock when
    /// the operation requires one.
    pub(crate) async fn execute(
        &self,
        deposit_id: &str,
        effects: &[Effect],
    ) -> Result<(), HandlerError> {
        for effect in effects {
            debug!("Deposit {}: applying {:?}", deposit_id, effect);
            match effect {
                Effect::SaveFields(fields) => self.deposits.save(deposit_id, fields)?,
                Effect::Queue => self.deposits.queue_deposit(deposit_id)?,
                Effect::SetState(state) => self.deposits.set_state(deposit_id, *state)?,
                Effect::ClearStaleJobs => self.jobs.clear_stale(deposit_id)?,
                Effect::ClearErrorMessage => self
                    .deposits
                    .delete_field(deposit_id, DepositField::ErrorMessage.as_str())?,
                Effect::AdvanceJobs => self.advance_jobs(deposit_id).await?,
                Effect::Fail(message) => {
                    warn!("Failing deposit {}: {}", deposit_id, message);
                    self.deposits.fail(deposit_id, Some(message.as_str()))?;
                    metrics::DEPOSITS_FINISHED.with_label_values(&["failed"]).inc();
                }
                Effect::StampEndTime => self.stamp_end_time(deposit_id)?,
                Effect::SendResults => self.send_results(deposit_id)?,
                Effect::ReleaseSlot => self.release_slot(deposit_id),
                Effect::Destroy => {
                    self.jobs.delete_for_deposit(deposit_id)?;
                    self.deposits.delete(deposit_id)?;
                    info!("Destroyed deposit {}", deposit_id);
                }
            }
        }
        Ok(())
    }

    /// Record the state change in the audit log.
    pub(crate) fn audit_transition(
        &self,
        deposit_id: &str,
        from: DepositState,
        to: DepositState,
        reason: &str,
        username: Option<&str>,
    ) {
        if from == to {
            return;
        }
        info!("Deposit {}: {} -> {} ({})", deposit_id, from, to, reason);
        self.emit(AuditEvent::DepositStateChanged {
            deposit_id: deposit_id.to_string(),
            from_state: from.to_string(),
            to_state: to.to_string(),
            reason: Some(reason.to_string()),
            user_id: username.map(String::from),
        });
    }
}
