//! Advancing a running deposit after one of its jobs succeeded.

use tracing::info;

use crate::deposit::DepositState;
use crate::messaging::{publish, publish_delayed};
use crate::metrics;

use super::context::HandlerContext;
use super::types::HandlerError;

impl HandlerContext {
    /// Send the deposit's next job. When only the cleanup job is left, finish
    /// the deposit instead and schedule cleanup after the configured delay.
    pub(crate) async fn advance_jobs(&self, deposit_id: &str) -> Result<(), HandlerError> {
        let fields = self
            .deposits
            .get(deposit_id)?
            .map(|deposit| deposit.fields)
            .unwrap_or_default();
        let next = self.sequencer.next_job(deposit_id, &fields)?;

        if !self.sequencer.is_cleanup(&next.job_class_name) {
            info!(
                "Deposit {}: sending next job {} ({})",
                deposit_id, next.job_class_name, next.job_id
            );
            publish(self.job_sender.as_ref(), &next).await?;
            return Ok(());
        }

        self.deposits.set_state(deposit_id, DepositState::Finished)?;
        self.stamp_end_time(deposit_id)?;
        metrics::DEPOSITS_FINISHED
            .with_label_values(&["finished"])
            .inc();
        info!("Deposit {} finished", deposit_id);

        self.send_results(deposit_id)?;
        self.send_complete_event(deposit_id)?;

        info!(
            "Deposit {}: cleanup {} scheduled in {:?}",
            deposit_id, next.job_class_name, self.cleanup_delay
        );
        publish_delayed(self.job_sender.as_ref(), &next, self.cleanup_delay).await?;
        Ok(())
    }
}
