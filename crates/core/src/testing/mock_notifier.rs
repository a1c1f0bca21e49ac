//! Recording deposit notifier.

use std::sync::{Arc, RwLock};

use crate::deposit::{Deposit, DepositState};
use crate::notify::DepositNotifier;

/// Kind of notification sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Results,
    Complete,
}

/// A recorded notification for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedNotification {
    pub kind: NotificationKind,
    pub deposit_id: String,
    /// Deposit state at the time of the notification.
    pub state: DepositState,
    pub error_message: Option<String>,
}

/// Notifier that records what would have been sent.
#[derive(Debug)]
pub struct RecordingNotifier {
    sent: Arc<RwLock<Vec<RecordedNotification>>>,
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Get all recorded notifications.
    pub fn notifications(&self) -> Vec<RecordedNotification> {
        self.sent.read().unwrap().clone()
    }

    /// Notifications of one kind for one deposit.
    pub fn sent_for(&self, deposit_id: &str, kind: NotificationKind) -> Vec<RecordedNotification> {
        self.sent
            .read()
            .unwrap()
            .iter()
            .filter(|n| n.deposit_id == deposit_id && n.kind == kind)
            .cloned()
            .collect()
    }

    fn record(&self, kind: NotificationKind, deposit: &Deposit) {
        self.sent.write().unwrap().push(RecordedNotification {
            kind,
            deposit_id: deposit.id.clone(),
            state: deposit.state,
            error_message: deposit.fields.get("errorMessage").cloned(),
        });
    }
}

impl DepositNotifier for RecordingNotifier {
    fn send_results(&self, deposit: &Deposit) {
        self.record(NotificationKind::Results, deposit);
    }

    fn send_complete_event(&self, deposit: &Deposit) {
        self.record(NotificationKind::Complete, deposit);
    }
}
