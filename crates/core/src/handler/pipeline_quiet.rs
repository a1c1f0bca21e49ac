//! Pipeline-wide quiet and unquiet sweeps.

use std::sync::Arc;

use tracing::{error, info};

use crate::deposit::DepositState;

use super::{DepositHandlers, HandlerOutcome};

/// Applies the single-deposit Quiet and Resume rules across the pipeline.
pub struct PipelineQuietHandler {
    handlers: Arc<DepositHandlers>,
}

impl PipelineQuietHandler {
    pub fn new(handlers: Arc<DepositHandlers>) -> Self {
        Self { handlers }
    }

    /// Quiet every running deposit and release its slot.
    ///
    /// Returns the ids that were quieted. Deposits whose lock is held
    /// elsewhere are left alone.
    pub async fn quiet_all(&self, username: &str) -> Vec<String> {
        let ctx = self.handlers.context();
        let running = match ctx.deposits.list_ids_in_state(DepositState::Running) {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to list running deposits: {}", e);
                return Vec::new();
            }
        };

        let mut quieted = Vec::new();
        for deposit_id in running {
            match self.handlers.quiet(&deposit_id, Some(username)).await {
                Ok(outcome) if outcome.is_applied() => {
                    ctx.release_slot(&deposit_id);
                    quieted.push(deposit_id);
                }
                Ok(outcome) => {
                    info!("Deposit {} not quieted: {}", deposit_id, outcome.label());
                }
                Err(e) => error!("Failed to quiet deposit {}: {}", deposit_id, e),
            }
        }

        info!("Quieted {} running deposits", quieted.len());
        quieted
    }

    /// Resume every quieted deposit, clearing any lock left behind.
    ///
    /// Returns the ids that were re-queued.
    pub async fn unquiet_all(&self, username: &str) -> Vec<String> {
        let ctx = self.handlers.context();
        let quieted = match ctx.deposits.list_ids_in_state(DepositState::Quieted) {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to list quieted deposits: {}", e);
                return Vec::new();
            }
        };

        let mut resumed = Vec::new();
        for deposit_id in quieted {
            if let Err(e) = ctx.locks.release(&deposit_id) {
                error!("Failed to clear lock of deposit {}: {}", deposit_id, e);
                continue;
            }
            match self.handlers.resume(&deposit_id, Some(username)).await {
                Ok(HandlerOutcome::Applied { .. }) => resumed.push(deposit_id),
                Ok(outcome) => {
                    info!("Deposit {} not resumed: {}", deposit_id, outcome.label());
                }
                Err(e) => error!("Failed to resume deposit {}: {}", deposit_id, e),
            }
        }

        info!("Resumed {} quieted deposits", resumed.len());
        resumed
    }
}
