//! Consumer of the pipeline control channel.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::handler::PipelineQuietHandler;
use crate::messaging::{
    Delivery, ListenerContainer, MessageListener, PipelineAction, PipelineMessage,
};
use crate::metrics;
use crate::status::{PipelineState, PipelineStateStore};

use super::deposit::DepositCoordinator;
use super::types::{CoordinatorError, PipelineStatus, PipelineTransition};

/// Quiesces, resumes and stops the operations and jobs listeners.
///
/// | action  | allowed from      | to       | listeners | deposits            |
/// |---------|-------------------|----------|-----------|---------------------|
/// | QUIET   | active            | quieted  | stop      | running -> quieted  |
/// | UNQUIET | quieted           | active   | start     | quieted -> queued   |
/// | STOP    | active, quieted   | stopped  | shutdown  | untouched           |
///
/// Any other combination is ignored.
pub struct PipelineCoordinator {
    pipeline: Arc<dyn PipelineStateStore>,
    deposits: Arc<DepositCoordinator>,
    quiet: PipelineQuietHandler,
    operations: Arc<dyn ListenerContainer>,
    jobs: Arc<dyn ListenerContainer>,
    audit: Option<AuditHandle>,
}

impl PipelineCoordinator {
    pub fn new(
        pipeline: Arc<dyn PipelineStateStore>,
        deposits: Arc<DepositCoordinator>,
        operations: Arc<dyn ListenerContainer>,
        jobs: Arc<dyn ListenerContainer>,
        audit: Option<AuditHandle>,
    ) -> Self {
        let quiet = PipelineQuietHandler::new(Arc::clone(deposits.handlers()));
        Self {
            pipeline,
            deposits,
            quiet,
            operations,
            jobs,
            audit,
        }
    }

    /// Apply a control action on behalf of `username`.
    pub async fn apply(
        &self,
        action: PipelineAction,
        username: &str,
    ) -> Result<PipelineTransition, CoordinatorError> {
        let current = self.pipeline.get_pipeline_state()?;
        let target = match (action, current) {
            (PipelineAction::Quiet, Some(PipelineState::Active)) => PipelineState::Quieted,
            (PipelineAction::Unquiet, Some(PipelineState::Quieted)) => PipelineState::Active,
            (PipelineAction::Stop, Some(PipelineState::Active | PipelineState::Quieted)) => {
                PipelineState::Stopped
            }
            _ => {
                warn!(
                    "Ignoring {} from {}: pipeline is {}",
                    action.as_str(),
                    username,
                    current.map(|s| s.as_str()).unwrap_or("uninitialised")
                );
                return Ok(PipelineTransition::Ignored { state: current });
            }
        };

        self.pipeline.set_pipeline_state(target)?;
        info!("Pipeline {} by {}", target, username);
        if let Some(ref audit) = self.audit {
            audit.try_emit(AuditEvent::PipelineStateChanged {
                from_state: current.map(|s| s.to_string()),
                to_state: target.to_string(),
                user_id: Some(username.to_string()),
            });
        }

        match action {
            PipelineAction::Quiet => {
                self.for_each_container("stop", |c| async move { c.stop().await })
                    .await;
                let quieted = self.quiet.quiet_all(username).await;
                metrics::ACTIVE_DEPOSITS.set(self.active_count() as i64);
                info!("Pipeline quieted, {} deposits suspended", quieted.len());
            }
            PipelineAction::Unquiet => {
                self.for_each_container("start", |c| async move { c.start().await })
                    .await;
                let resumed = self.quiet.unquiet_all(username).await;
                let promoted = self.deposits.fill_open_slots().await;
                info!(
                    "Pipeline active, {} deposits re-queued, {} promoted",
                    resumed.len(),
                    promoted
                );
            }
            PipelineAction::Stop => {
                self.for_each_container("shut down", |c| async move { c.shutdown().await })
                    .await;
                info!("Pipeline stopped");
            }
        }

        Ok(PipelineTransition::Changed {
            from: current.unwrap_or(PipelineState::Starting),
            to: target,
        })
    }

    /// Run a lifecycle call on both listener containers. Failures are logged
    /// and never roll back the pipeline state.
    async fn for_each_container<F, Fut>(&self, verb: &str, call: F)
    where
        F: Fn(Arc<dyn ListenerContainer>) -> Fut,
        Fut: std::future::Future<Output = Result<(), crate::messaging::TransportError>>,
    {
        for (name, container) in [("operations", &self.operations), ("jobs", &self.jobs)] {
            if let Err(e) = call(Arc::clone(container)).await {
                error!("Failed to {} {} listener: {}", verb, name, e);
            }
        }
    }

    fn active_count(&self) -> usize {
        self.deposits.handlers().context().active.active_count()
    }

    /// Current pipeline state plus slot usage.
    pub fn status(&self) -> Result<PipelineStatus, CoordinatorError> {
        let active = &self.deposits.handlers().context().active;
        Ok(PipelineStatus {
            state: self.pipeline.get_pipeline_state()?,
            active_deposits: active.snapshot(),
            max_concurrent_deposits: active.max_concurrent(),
            operations_listener_running: self.operations.is_running(),
            jobs_listener_running: self.jobs.is_running(),
        })
    }
}

#[async_trait]
impl MessageListener for PipelineCoordinator {
    async fn on_message(&self, delivery: Delivery) {
        match serde_json::from_str::<PipelineMessage>(delivery.payload()) {
            Ok(message) => {
                if let Err(e) = self.apply(message.action, &message.username).await {
                    error!("Pipeline {} failed: {}", message.action.as_str(), e);
                }
            }
            Err(e) => {
                warn!("Dropping malformed pipeline message: {}", e);
                metrics::MESSAGES_DROPPED
                    .with_label_values(&["pipeline", "malformed"])
                    .inc();
            }
        }

        if let Err(e) = delivery.ack() {
            error!(
                "Failed to acknowledge pipeline message {}: {}",
                delivery.delivery_tag(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deposit::DepositState;
    use crate::status::SqliteStatusStore;
    use crate::testing::fixtures::Harness;
    use crate::testing::{ContainerCall, MockContainer, RecordingAcker};

    struct Fixture {
        harness: Harness,
        pipeline: Arc<SqliteStatusStore>,
        operations: Arc<MockContainer>,
        jobs: Arc<MockContainer>,
        coordinator: PipelineCoordinator,
    }

    fn fixture(state: Option<PipelineState>) -> Fixture {
        let harness = Harness::new(2);
        let pipeline = Arc::new(SqliteStatusStore::in_memory().unwrap());
        if let Some(state) = state {
            pipeline.set_pipeline_state(state).unwrap();
        }
        let deposits = Arc::new(DepositCoordinator::new(harness.handlers(), pipeline.clone()));
        let operations = Arc::new(MockContainer::running());
        let jobs = Arc::new(MockContainer::running());
        let coordinator = PipelineCoordinator::new(
            pipeline.clone(),
            deposits,
            operations.clone(),
            jobs.clone(),
            None,
        );
        Fixture {
            harness,
            pipeline,
            operations,
            jobs,
            coordinator,
        }
    }

    fn state(f: &Fixture) -> Option<PipelineState> {
        f.pipeline.get_pipeline_state().unwrap()
    }

    #[tokio::test]
    async fn test_transition_table() {
        use PipelineAction::*;
        use PipelineState::*;

        let cases: [(PipelineState, PipelineAction, PipelineState, &[ContainerCall]); 12] = [
            (Active, Quiet, Quieted, &[ContainerCall::Stop]),
            (Active, Unquiet, Active, &[]),
            (Active, Stop, Stopped, &[ContainerCall::Shutdown]),
            (Quieted, Quiet, Quieted, &[]),
            (Quieted, Unquiet, Active, &[ContainerCall::Start]),
            (Quieted, Stop, Stopped, &[ContainerCall::Shutdown]),
            (Stopped, Quiet, Stopped, &[]),
            (Stopped, Unquiet, Stopped, &[]),
            (Stopped, Stop, Stopped, &[]),
            (Starting, Quiet, Starting, &[]),
            (Starting, Unquiet, Starting, &[]),
            (Starting, Stop, Starting, &[]),
        ];
        for (from, action, expected, calls) in cases {
            let f = fixture(Some(from));
            f.harness.seed_running("d-1");

            let outcome = f.coordinator.apply(action, "admin").await.unwrap();

            let label = format!("{} from {}", action.as_str(), from);
            assert_eq!(state(&f), Some(expected), "{}", label);
            assert_eq!(f.operations.calls(), calls, "{}", label);
            assert_eq!(f.jobs.calls(), calls, "{}", label);
            if calls.is_empty() {
                assert_eq!(
                    outcome,
                    PipelineTransition::Ignored { state: Some(from) },
                    "{}",
                    label
                );
                assert_eq!(f.harness.state("d-1"), DepositState::Running, "{}", label);
                assert!(f.harness.active.is_deposit_active("d-1"), "{}", label);
            }
        }
    }

    #[tokio::test]
    async fn test_uninitialised_pipeline_ignores_actions() {
        let f = fixture(None);
        let outcome = f
            .coordinator
            .apply(PipelineAction::Quiet, "admin")
            .await
            .unwrap();
        assert_eq!(outcome, PipelineTransition::Ignored { state: None });
        assert!(f.operations.calls().is_empty());
    }

    #[tokio::test]
    async fn test_quiet_stops_listeners_and_quiets_running() {
        let f = fixture(Some(PipelineState::Active));
        f.harness.seed_running("d-1");
        f.harness.seed("d-2", DepositState::Paused);

        let outcome = f
            .coordinator
            .apply(PipelineAction::Quiet, "admin")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PipelineTransition::Changed {
                from: PipelineState::Active,
                to: PipelineState::Quieted
            }
        );
        assert_eq!(f.operations.calls(), vec![ContainerCall::Stop]);
        assert_eq!(f.jobs.calls(), vec![ContainerCall::Stop]);
        assert_eq!(f.harness.state("d-1"), DepositState::Quieted);
        assert_eq!(f.harness.state("d-2"), DepositState::Paused);
        assert_eq!(f.harness.active.active_count(), 0);
    }

    #[tokio::test]
    async fn test_unquiet_starts_listeners_and_requeues() {
        let f = fixture(Some(PipelineState::Quieted));
        f.harness.seed("d-1", DepositState::Quieted);
        f.harness.seed("d-2", DepositState::Quieted);
        f.harness.seed("d-3", DepositState::Quieted);

        f.coordinator
            .apply(PipelineAction::Unquiet, "admin")
            .await
            .unwrap();

        assert_eq!(f.operations.calls(), vec![ContainerCall::Start]);
        assert_eq!(f.jobs.calls(), vec![ContainerCall::Start]);
        // Two slots: two deposits promoted, the third left queued.
        let states: Vec<DepositState> =
            ["d-1", "d-2", "d-3"].iter().map(|id| f.harness.state(id)).collect();
        assert_eq!(
            states
                .iter()
                .filter(|s| **s == DepositState::Running)
                .count(),
            2
        );
        assert_eq!(
            states
                .iter()
                .filter(|s| **s == DepositState::Queued)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_stop_shuts_down_listeners() {
        let f = fixture(Some(PipelineState::Quieted));

        f.coordinator
            .apply(PipelineAction::Stop, "admin")
            .await
            .unwrap();

        assert_eq!(f.operations.calls(), vec![ContainerCall::Shutdown]);
        assert_eq!(f.jobs.calls(), vec![ContainerCall::Shutdown]);
    }

    #[tokio::test]
    async fn test_container_failure_keeps_new_state() {
        let f = fixture(Some(PipelineState::Active));
        f.operations.fail_calls(true);
        f.harness.seed_running("d-1");

        f.coordinator
            .apply(PipelineAction::Quiet, "admin")
            .await
            .unwrap();

        assert_eq!(state(&f), Some(PipelineState::Quieted));
        assert_eq!(f.jobs.calls(), vec![ContainerCall::Stop]);
        assert_eq!(f.harness.state("d-1"), DepositState::Quieted);
    }

    #[tokio::test]
    async fn test_message_is_acknowledged() {
        let f = fixture(Some(PipelineState::Active));
        let acker = RecordingAcker::new();

        f.coordinator
            .on_message(acker.delivery(r#"{"action":"QUIET","username":"admin"}"#))
            .await;
        f.coordinator.on_message(acker.delivery("garbage")).await;

        assert_eq!(acker.ack_count(), 2);
        assert_eq!(state(&f), Some(PipelineState::Quieted));
    }

    #[tokio::test]
    async fn test_status_reports_listeners() {
        let f = fixture(Some(PipelineState::Active));
        f.harness.seed_running("d-1");

        let status = f.coordinator.status().unwrap();

        assert_eq!(status.state, Some(PipelineState::Active));
        assert_eq!(status.active_deposits, vec!["d-1"]);
        assert_eq!(status.max_concurrent_deposits, 2);
        assert!(status.operations_listener_running);
    }
}
