//! Notifications sent when a deposit reaches a terminal state.

use tracing::info;

use crate::audit::{AuditEvent, AuditHandle};
use crate::deposit::{Deposit, DepositField};

/// Fire-and-forget notification side effects.
///
/// Implementations must not block and must not fail the caller; delivery
/// problems are theirs to log.
pub trait DepositNotifier: Send + Sync {
    /// Tell the depositor how the deposit ended.
    fn send_results(&self, deposit: &Deposit);

    /// Announce that the deposit finished successfully.
    fn send_complete_event(&self, deposit: &Deposit);
}

/// Records notifications in the audit log.
pub struct AuditNotifier {
    audit: Option<AuditHandle>,
}

impl AuditNotifier {
    pub fn new(audit: Option<AuditHandle>) -> Self {
        Self { audit }
    }

    fn emit(&self, event: AuditEvent) {
        if let Some(ref audit) = self.audit {
            audit.try_emit(event);
        }
    }
}

impl DepositNotifier for AuditNotifier {
    fn send_results(&self, deposit: &Deposit) {
        info!("Sending results for deposit {} ({})", deposit.id, deposit.state);
        self.emit(AuditEvent::DepositResultsSent {
            deposit_id: deposit.id.clone(),
            state: deposit.state.to_string(),
            error_message: deposit.field(DepositField::ErrorMessage).map(String::from),
        });
    }

    fn send_complete_event(&self, deposit: &Deposit) {
        info!("Deposit {} complete", deposit.id);
        self.emit(AuditEvent::DepositCompleted {
            deposit_id: deposit.id.clone(),
            start_time: deposit.field(DepositField::StartTime).map(String::from),
            end_time: deposit.field(DepositField::EndTime).map(String::from),
        });
    }
}
