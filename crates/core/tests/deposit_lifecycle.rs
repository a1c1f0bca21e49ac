//! Deposit lifecycle integration tests.
//!
//! These tests run the three coordinators on SQLite-backed queues against a
//! file-backed status store, the way the server wires them:
//! register -> queued -> running -> (jobs) -> finished -> cleanup

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use deposit_core::handler::DepositHandlers;
use deposit_core::messaging::publish;
use deposit_core::testing::{JobScript, NotificationKind, RecordingNotifier, ScriptedResolver};
use deposit_core::{
    ActiveDepositsService, DepositAction, DepositCoordinator, DepositField, DepositState,
    DepositStore, HandlerContext, JobCoordinator, JobMessage, JobStatusStore, ListenerContainer,
    MessageSender, OperationMessage, OrderedJobSequencer, PipelineAction, PipelineCoordinator,
    PipelineMessage, PipelineState, PipelineStateStore, QueueListenerContainer, SqliteQueue,
    SqliteStatusStore,
};

const SEQUENCE: [&str; 3] = ["ParseBagJob", "ValidateContentJob", "IngestContentJob"];
const CLEANUP: &str = "CleanupDepositJob";

/// Everything a running control plane is made of.
struct TestSystem {
    store: Arc<SqliteStatusStore>,
    active: Arc<ActiveDepositsService>,
    resolver: Arc<ScriptedResolver>,
    notifier: Arc<RecordingNotifier>,
    operations: SqliteQueue,
    jobs: SqliteQueue,
    pipeline: SqliteQueue,
    operations_listener: Arc<QueueListenerContainer>,
    jobs_listener: Arc<QueueListenerContainer>,
    pipeline_listener: Arc<QueueListenerContainer>,
    deposits: Arc<DepositCoordinator>,
}

impl TestSystem {
    /// Build a system over the database in `dir` without starting it.
    fn build(dir: &TempDir, max_concurrent: usize, resolver: Arc<ScriptedResolver>) -> Self {
        let store = Arc::new(
            SqliteStatusStore::new(&dir.path().join("status.db"))
                .expect("Failed to create status store"),
        );
        let active = Arc::new(ActiveDepositsService::new(max_concurrent));
        let notifier = Arc::new(RecordingNotifier::new());
        let sequencer = Arc::new(OrderedJobSequencer::new(
            SEQUENCE.iter().map(|c| c.to_string()).collect(),
            CLEANUP,
            Arc::clone(&store) as Arc<dyn JobStatusStore>,
        ));

        let queue_path = dir.path().join("queues.db");
        let operations =
            SqliteQueue::open(&queue_path, "operations").expect("Failed to open queue");
        let jobs = SqliteQueue::open(&queue_path, "jobs").expect("Failed to open queue");
        let pipeline = SqliteQueue::open(&queue_path, "pipeline").expect("Failed to open queue");

        let ctx = HandlerContext {
            deposits: store.clone(),
            jobs: store.clone(),
            locks: store.clone(),
            active: Arc::clone(&active),
            job_sender: Arc::new(jobs.clone()),
            sequencer: sequencer.clone(),
            notifier: notifier.clone(),
            audit: None,
            cleanup_delay: Duration::from_millis(50),
        };
        let deposits = Arc::new(DepositCoordinator::new(
            Arc::new(DepositHandlers::new(ctx)),
            store.clone(),
        ));
        let job_coordinator = Arc::new(JobCoordinator::new(
            store.clone(),
            Arc::clone(&active),
            store.clone(),
            resolver.clone(),
            sequencer,
            Arc::new(operations.clone()),
            None,
        ));

        let operations_listener = Arc::new(QueueListenerContainer::new(
            "operations",
            Arc::new(operations.clone()),
            deposits.clone(),
            2,
        ));
        let jobs_listener = Arc::new(QueueListenerContainer::new(
            "jobs",
            Arc::new(jobs.clone()),
            job_coordinator,
            2,
        ));
        let pipeline_coordinator = Arc::new(PipelineCoordinator::new(
            store.clone(),
            deposits.clone(),
            operations_listener.clone(),
            jobs_listener.clone(),
            None,
        ));
        let pipeline_listener = Arc::new(QueueListenerContainer::new(
            "pipeline",
            Arc::new(pipeline.clone()),
            pipeline_coordinator,
            1,
        ));

        Self {
            store,
            active,
            resolver,
            notifier,
            operations,
            jobs,
            pipeline,
            operations_listener,
            jobs_listener,
            pipeline_listener,
            deposits,
        }
    }

    async fn start(dir: &TempDir, max_concurrent: usize, resolver: Arc<ScriptedResolver>) -> Self {
        let system = Self::build(dir, max_concurrent, resolver);
        system.deposits.init().await.expect("init failed");
        for listener in [
            &system.operations_listener,
            &system.jobs_listener,
            &system.pipeline_listener,
        ] {
            listener.start().await.expect("Failed to start listener");
        }
        system
    }

    async fn shutdown(&self) {
        for listener in [
            &self.pipeline_listener,
            &self.operations_listener,
            &self.jobs_listener,
        ] {
            listener.shutdown().await.expect("Failed to shut down listener");
        }
    }

    async fn register(&self, deposit_id: &str) {
        let mut info = HashMap::new();
        info.insert("depositorName".to_string(), "boxc".to_string());
        let message = OperationMessage::register(deposit_id, "alice", info);
        publish(&self.operations as &dyn MessageSender, &message)
            .await
            .unwrap();
    }

    async fn send_operation(&self, deposit_id: &str, action: DepositAction) {
        let message = OperationMessage::new(deposit_id, action).with_username("alice");
        publish(&self.operations as &dyn MessageSender, &message)
            .await
            .unwrap();
    }

    async fn send_pipeline(&self, action: PipelineAction) {
        publish(
            &self.pipeline as &dyn MessageSender,
            &PipelineMessage::new(action, "admin"),
        )
        .await
        .unwrap();
    }

    fn state(&self, deposit_id: &str) -> DepositState {
        self.store.get_state(deposit_id).unwrap()
    }

    async fn wait_for_state(
        &self,
        deposit_id: &str,
        expected: DepositState,
        timeout: Duration,
    ) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.state(deposit_id) == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    async fn wait_for_pipeline(&self, expected: PipelineState, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.store.get_pipeline_state().unwrap() == Some(expected) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    async fn wait_until(&self, timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_registered_deposit_runs_to_finished_and_cleanup() {
    let dir = TempDir::new().unwrap();
    let system = TestSystem::start(&dir, 2, Arc::new(ScriptedResolver::new())).await;

    system.register("d-1").await;

    assert!(
        system
            .wait_for_state("d-1", DepositState::Finished, Duration::from_secs(5))
            .await
    );
    assert!(
        system
            .wait_until(Duration::from_secs(5), || system.resolver.run_classes().len() == 4)
            .await
    );
    assert_eq!(
        system.resolver.run_classes(),
        vec![SEQUENCE[0], SEQUENCE[1], SEQUENCE[2], CLEANUP]
    );

    let deposit = system.store.get("d-1").unwrap().unwrap();
    assert!(deposit.field(DepositField::StartTime).is_some());
    assert!(deposit.field(DepositField::EndTime).is_some());
    assert_eq!(deposit.field(DepositField::DepositorName), Some("boxc"));
    assert_eq!(
        system
            .notifier
            .sent_for("d-1", NotificationKind::Results)
            .len(),
        1
    );
    assert_eq!(
        system
            .notifier
            .sent_for("d-1", NotificationKind::Complete)
            .len(),
        1
    );

    // The cleanup outcome leaves the finished deposit alone.
    assert!(
        system
            .wait_until(Duration::from_secs(5), || system.operations.ready_count() == 0
                && system.operations.unacked_count() == 0)
            .await
    );
    assert_eq!(system.state("d-1"), DepositState::Finished);
    assert!(!system.active.is_deposit_active("d-1"));

    system.shutdown().await;
}

#[tokio::test]
async fn test_job_failure_fails_deposit_and_promotes_next() {
    let dir = TempDir::new().unwrap();
    let resolver = Arc::new(ScriptedResolver::new());
    resolver.set_script(SEQUENCE[1], JobScript::Fail("Bag checksum mismatch".to_string()));
    let system = TestSystem::start(&dir, 1, resolver).await;

    system.register("d-1").await;
    system.register("d-2").await;

    assert!(
        system
            .wait_for_state("d-1", DepositState::Failed, Duration::from_secs(5))
            .await
    );
    assert_eq!(
        system
            .store
            .get_field("d-1", DepositField::ErrorMessage.as_str())
            .unwrap()
            .as_deref(),
        Some("Bag checksum mismatch")
    );
    assert!(
        system
            .wait_for_state("d-2", DepositState::Failed, Duration::from_secs(5))
            .await
    );
    let results = system.notifier.sent_for("d-1", NotificationKind::Results);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].state, DepositState::Failed);
    assert_eq!(system.active.active_count(), 0);

    system.shutdown().await;
}

#[tokio::test]
async fn test_admission_cap_is_never_exceeded() {
    let dir = TempDir::new().unwrap();
    let resolver = Arc::new(ScriptedResolver::new());
    resolver.set_script(SEQUENCE[0], JobScript::Sleep(Duration::from_millis(30)));
    let system = TestSystem::start(&dir, 2, resolver).await;

    let ids: Vec<String> = (0..5).map(|i| format!("d-{}", i)).collect();
    for id in &ids {
        system.register(id).await;
    }

    let start = Instant::now();
    let mut finished = false;
    while start.elapsed() < Duration::from_secs(10) {
        assert!(system.active.active_count() <= 2);
        let running = system
            .store
            .list_ids_in_state(DepositState::Running)
            .unwrap();
        assert!(running.len() <= 2, "running: {:?}", running);
        if ids.iter().all(|id| system.state(id) == DepositState::Finished) {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(finished);

    system.shutdown().await;
}

#[tokio::test]
async fn test_pause_and_resume() {
    let dir = TempDir::new().unwrap();
    let resolver = Arc::new(ScriptedResolver::new());
    resolver.set_script(SEQUENCE[0], JobScript::Sleep(Duration::from_millis(200)));
    let system = TestSystem::start(&dir, 1, resolver).await;

    system.register("d-1").await;
    assert!(
        system
            .wait_for_state("d-1", DepositState::Running, Duration::from_secs(5))
            .await
    );

    system.send_operation("d-1", DepositAction::Pause).await;
    assert!(
        system
            .wait_for_state("d-1", DepositState::Paused, Duration::from_secs(5))
            .await
    );
    assert!(!system.active.is_deposit_active("d-1"));

    // The in-flight job's success arrives while paused and is ignored.
    assert!(
        system
            .wait_until(Duration::from_secs(5), || system.resolver.runs().len() == 1
                && system.jobs.unacked_count() == 0
                && system.operations.ready_count() == 0)
            .await
    );
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(system.state("d-1"), DepositState::Paused);

    system.send_operation("d-1", DepositAction::Resume).await;
    assert!(
        system
            .wait_for_state("d-1", DepositState::Finished, Duration::from_secs(5))
            .await
    );

    system.shutdown().await;
}

#[tokio::test]
async fn test_quiet_and_unquiet_pipeline() {
    let dir = TempDir::new().unwrap();
    let resolver = Arc::new(ScriptedResolver::new());
    resolver.set_script(SEQUENCE[1], JobScript::Sleep(Duration::from_millis(200)));
    let system = TestSystem::start(&dir, 2, resolver).await;

    system.register("d-1").await;
    assert!(
        system
            .wait_until(Duration::from_secs(5), || system
                .resolver
                .run_classes()
                .contains(&SEQUENCE[1].to_string()))
            .await
    );

    system.send_pipeline(PipelineAction::Quiet).await;
    assert!(
        system
            .wait_for_pipeline(PipelineState::Quieted, Duration::from_secs(5))
            .await
    );
    assert!(
        system
            .wait_for_state("d-1", DepositState::Quieted, Duration::from_secs(5))
            .await
    );
    assert!(!system.operations_listener.is_running());
    assert!(!system.jobs_listener.is_running());
    assert_eq!(system.active.active_count(), 0);

    // Registrations while quieted wait in the queue.
    system.register("d-2").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(system.state("d-2"), DepositState::Unregistered);

    system.send_pipeline(PipelineAction::Unquiet).await;
    assert!(
        system
            .wait_for_pipeline(PipelineState::Active, Duration::from_secs(5))
            .await
    );
    for id in ["d-1", "d-2"] {
        assert!(
            system
                .wait_for_state(id, DepositState::Finished, Duration::from_secs(5))
                .await,
            "{} did not finish",
            id
        );
    }

    system.shutdown().await;
}

#[tokio::test]
async fn test_stop_shuts_listeners_down() {
    let dir = TempDir::new().unwrap();
    let system = TestSystem::start(&dir, 2, Arc::new(ScriptedResolver::new())).await;

    system.send_pipeline(PipelineAction::Stop).await;
    assert!(
        system
            .wait_for_pipeline(PipelineState::Stopped, Duration::from_secs(5))
            .await
    );
    assert!(
        system
            .wait_until(Duration::from_secs(5), || !system.operations_listener.is_running())
            .await
    );
    assert!(system.operations_listener.start().await.is_err());

    system.register("d-1").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(system.operations.ready_count(), 1);

    // UNQUIET after STOP is ignored.
    system.send_pipeline(PipelineAction::Unquiet).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        system.store.get_pipeline_state().unwrap(),
        Some(PipelineState::Stopped)
    );

    system.pipeline_listener.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_messages_are_dropped() {
    let dir = TempDir::new().unwrap();
    let system = TestSystem::start(&dir, 2, Arc::new(ScriptedResolver::new())).await;

    (&system.operations as &dyn MessageSender)
        .send("{oops".to_string(), None)
        .await
        .unwrap();
    (&system.jobs as &dyn MessageSender)
        .send("[]".to_string(), None)
        .await
        .unwrap();

    assert!(
        system
            .wait_until(Duration::from_secs(5), || {
                system.operations.ready_count() == 0
                    && system.operations.unacked_count() == 0
                    && system.jobs.ready_count() == 0
                    && system.jobs.unacked_count() == 0
            })
            .await
    );
    assert!(system.resolver.runs().is_empty());

    system.shutdown().await;
}

#[tokio::test]
async fn test_restart_recovers_running_and_quieted_deposits() {
    let dir = TempDir::new().unwrap();
    {
        let store = SqliteStatusStore::new(&dir.path().join("status.db")).unwrap();
        store.set_state("d-run", DepositState::Running).unwrap();
        store.set_state("d-quiet", DepositState::Quieted).unwrap();
        store
            .set_field("d-quiet", DepositField::ErrorMessage.as_str(), "interrupted")
            .unwrap();
        store.queue_deposit("d-queued").unwrap();
        let job = JobMessage::new("d-quiet", SEQUENCE[0]);
        store.started(&job.job_id, "d-quiet", SEQUENCE[0]).unwrap();
        store.completed(&job.job_id).unwrap();
        store.set_pipeline_state(PipelineState::Stopped).unwrap();
    }

    let system = TestSystem::start(&dir, 3, Arc::new(ScriptedResolver::new())).await;

    assert_eq!(
        system.store.get_pipeline_state().unwrap(),
        Some(PipelineState::Active)
    );
    assert!(system.active.is_deposit_active("d-run"));
    for id in ["d-quiet", "d-queued"] {
        assert!(
            system
                .wait_for_state(id, DepositState::Finished, Duration::from_secs(5))
                .await,
            "{} did not finish",
            id
        );
    }
    // The quieted deposit picked up where it left off.
    let quiet_runs: Vec<String> = system
        .resolver
        .runs()
        .into_iter()
        .filter(|job| job.deposit_id == "d-quiet")
        .map(|job| job.job_class_name)
        .collect();
    assert!(!quiet_runs.contains(&SEQUENCE[0].to_string()));
    // The running deposit keeps its slot; no job of its was ever queued.
    assert_eq!(system.state("d-run"), DepositState::Running);
    assert!(system.resolver.runs().iter().all(|job| job.deposit_id != "d-run"));

    system.shutdown().await;
}

#[tokio::test]
async fn test_queued_job_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let system = TestSystem::build(&dir, 1, Arc::new(ScriptedResolver::new()));
        system.deposits.init().await.unwrap();
        system.operations_listener.start().await.unwrap();

        system.register("d-run").await;
        assert!(
            system
                .wait_for_state("d-run", DepositState::Running, Duration::from_secs(5))
                .await
        );
        assert!(
            system
                .wait_until(Duration::from_secs(5), || system.jobs.ready_count() == 1)
                .await
        );
        // The process goes away before any job worker picked the job up.
        system.operations_listener.shutdown().await.unwrap();
    }

    let system = TestSystem::start(&dir, 1, Arc::new(ScriptedResolver::new())).await;
    assert!(system.active.is_deposit_active("d-run"));
    assert!(
        system
            .wait_for_state("d-run", DepositState::Finished, Duration::from_secs(5))
            .await
    );
    assert_eq!(
        system.resolver.run_classes()[..3],
        [SEQUENCE[0], SEQUENCE[1], SEQUENCE[2]]
    );

    system.shutdown().await;
}

#[tokio::test]
async fn test_unconsumed_outcome_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let system = TestSystem::build(&dir, 1, Arc::new(ScriptedResolver::new()));
        system.deposits.init().await.unwrap();
        system.operations_listener.start().await.unwrap();

        system.register("d-run").await;
        assert!(
            system
                .wait_for_state("d-run", DepositState::Running, Duration::from_secs(5))
                .await
        );
        system.operations_listener.stop().await.unwrap();

        // The first job runs, but its JOB_SUCCESS is still queued when the
        // process goes away.
        system.jobs_listener.start().await.unwrap();
        assert!(
            system
                .wait_until(Duration::from_secs(5), || system.operations.ready_count() == 1)
                .await
        );
        system.jobs_listener.shutdown().await.unwrap();
        system.operations_listener.shutdown().await.unwrap();
        assert_eq!(system.resolver.run_classes(), vec![SEQUENCE[0]]);
    }

    let system = TestSystem::start(&dir, 1, Arc::new(ScriptedResolver::new())).await;
    assert!(
        system
            .wait_for_state("d-run", DepositState::Finished, Duration::from_secs(5))
            .await
    );
    // Only the remaining jobs ran after the restart.
    assert_eq!(
        system.resolver.run_classes()[..2],
        [SEQUENCE[1], SEQUENCE[2]]
    );

    system.shutdown().await;
}
