//! Testing utilities and mock implementations.
//!
//! This module provides recording and failing implementations of the
//! transport, lock, notification and job traits, so the coordinators can be
//! driven end to end against an in-memory status store.
//!
//! # Example
//!
//! ```rust,ignore
//! use deposit_core::testing::fixtures::Harness;
//! use deposit_core::testing::{JobScript, ScriptedResolver};
//!
//! let harness = Harness::new(2);
//! let handlers = harness.handlers();
//!
//! handlers.register("d-1", Some("alice"), &HashMap::new()).await?;
//! assert_eq!(harness.state("d-1"), DepositState::Queued);
//!
//! // Inspect what would have gone out on the jobs channel
//! let jobs = harness.jobs.sent_jobs();
//! ```

mod mock_acker;
mod mock_container;
mod mock_job;
mod mock_lock;
mod mock_notifier;
mod mock_sender;

pub use mock_acker::RecordingAcker;
pub use mock_container::{ContainerCall, MockContainer};
pub use mock_job::{JobScript, ScriptedJob, ScriptedResolver};
pub use mock_lock::{LockCall, RecordingLock};
pub use mock_notifier::{NotificationKind, RecordedNotification, RecordingNotifier};
pub use mock_sender::{FailingSender, RecordingSender, SentMessage};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use super::{RecordingLock, RecordingNotifier, RecordingSender};
    use crate::active::ActiveDepositsService;
    use crate::deposit::{DepositField, DepositState};
    use crate::handler::{DepositHandlers, HandlerContext};
    use crate::job::OrderedJobSequencer;
    use crate::messaging::{DepositAction, JobMessage, MessageSender, OperationMessage};
    use crate::status::{DepositStore, JobStatusStore, SqliteStatusStore};

    /// Job classes run by every fixture deposit, in order.
    pub const SEQUENCE: [&str; 3] = ["ParseBagJob", "ValidateContentJob", "IngestContentJob"];

    /// Terminal cleanup job of the fixtures.
    pub const CLEANUP: &str = "CleanupDepositJob";

    /// Cleanup delay used by fixture contexts.
    pub const CLEANUP_DELAY: Duration = Duration::from_secs(3600);

    /// In-memory store plus recording collaborators, wired the way the
    /// server wires the real ones.
    pub struct Harness {
        pub store: Arc<SqliteStatusStore>,
        pub locks: Arc<RecordingLock>,
        pub active: Arc<ActiveDepositsService>,
        pub jobs: Arc<RecordingSender>,
        pub notifier: Arc<RecordingNotifier>,
        pub sequencer: Arc<OrderedJobSequencer>,
    }

    impl Harness {
        /// Harness allowing `max_concurrent` active deposits.
        pub fn new(max_concurrent: usize) -> Self {
            let store = Arc::new(SqliteStatusStore::in_memory().unwrap());
            let sequencer = OrderedJobSequencer::new(
                SEQUENCE.iter().map(|class| class.to_string()).collect(),
                CLEANUP,
                Arc::clone(&store) as Arc<dyn JobStatusStore>,
            );
            Self {
                locks: Arc::new(RecordingLock::new(Arc::clone(&store) as _)),
                store,
                active: Arc::new(ActiveDepositsService::new(max_concurrent)),
                jobs: Arc::new(RecordingSender::new()),
                notifier: Arc::new(RecordingNotifier::new()),
                sequencer: Arc::new(sequencer),
            }
        }

        /// Handler context sending jobs to the recording sender.
        pub fn context(&self) -> HandlerContext {
            self.context_with_sender(Arc::clone(&self.jobs) as Arc<dyn MessageSender>)
        }

        /// Handler context sending jobs to `job_sender`.
        pub fn context_with_sender(&self, job_sender: Arc<dyn MessageSender>) -> HandlerContext {
            HandlerContext {
                deposits: Arc::clone(&self.store) as _,
                jobs: Arc::clone(&self.store) as _,
                locks: Arc::clone(&self.locks) as _,
                active: Arc::clone(&self.active),
                job_sender,
                sequencer: Arc::clone(&self.sequencer) as _,
                notifier: Arc::clone(&self.notifier) as _,
                audit: None,
                cleanup_delay: CLEANUP_DELAY,
            }
        }

        pub fn handlers(&self) -> Arc<DepositHandlers> {
            Arc::new(DepositHandlers::new(self.context()))
        }

        /// Put a deposit straight into `state`.
        pub fn seed(&self, deposit_id: &str, state: DepositState) {
            self.store.set_state(deposit_id, state).unwrap();
        }

        /// Append a deposit to the queue.
        pub fn enqueue(&self, deposit_id: &str) {
            self.store.queue_deposit(deposit_id).unwrap();
        }

        /// Seed a running deposit that holds a slot.
        pub fn seed_running(&self, deposit_id: &str) {
            self.seed(deposit_id, DepositState::Running);
            assert!(self.active.mark_active(deposit_id));
        }

        pub fn state(&self, deposit_id: &str) -> DepositState {
            self.store.get_state(deposit_id).unwrap()
        }

        pub fn field(&self, deposit_id: &str, field: DepositField) -> Option<String> {
            self.store.get_field(deposit_id, field.as_str()).unwrap()
        }

        /// Record `classes` as completed jobs of the deposit.
        pub fn complete_jobs(&self, deposit_id: &str, classes: &[&str]) {
            for class in classes {
                let job = JobMessage::new(deposit_id, *class);
                self.store
                    .started(&job.job_id, deposit_id, class)
                    .unwrap();
                self.store.completed(&job.job_id).unwrap();
            }
        }

        /// True if the deposit's supervisor lock is currently free.
        pub fn lock_is_free(&self, deposit_id: &str) -> bool {
            use crate::status::SupervisorLock;
            let free = self.store.acquire(deposit_id, "inspector").unwrap();
            if free {
                self.store.release(deposit_id).unwrap();
            }
            free
        }
    }

    /// JSON payload of an operation message.
    pub fn operation_payload(message: &OperationMessage) -> String {
        serde_json::to_string(message).unwrap()
    }

    /// JSON payload of an operation with no extras.
    pub fn action_payload(deposit_id: &str, action: DepositAction) -> String {
        operation_payload(&OperationMessage::new(deposit_id, action).with_username("alice"))
    }

    /// JSON payload of a REGISTER carrying a depositor name.
    pub fn register_payload(deposit_id: &str) -> String {
        let mut info = HashMap::new();
        info.insert(
            DepositField::DepositorName.as_str().to_string(),
            "boxc".to_string(),
        );
        operation_payload(&OperationMessage::register(deposit_id, "alice", info))
    }

    pub fn job_payload(job: &JobMessage) -> String {
        serde_json::to_string(job).unwrap()
    }
}
