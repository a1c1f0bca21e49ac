//! Recording acknowledger and hand-built deliveries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::messaging::{Acknowledger, Delivery, TransportError};

/// Acknowledger that records every acknowledged delivery tag.
#[derive(Debug)]
pub struct RecordingAcker {
    acked: RwLock<Vec<u64>>,
    next_tag: AtomicU64,
    failing: AtomicBool,
}

impl Default for RecordingAcker {
    fn default() -> Self {
        Self {
            acked: RwLock::new(Vec::new()),
            next_tag: AtomicU64::new(1),
            failing: AtomicBool::new(false),
        }
    }
}

impl RecordingAcker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wrap `payload` in a delivery settled by this acker.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let acker = RecordingAcker::new();
    /// coordinator.on_message(acker.delivery("not json")).await;
    /// assert_eq!(acker.ack_count(), 1);
    /// ```
    pub fn delivery(self: &Arc<Self>, payload: impl Into<String>) -> Delivery {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let acker: Arc<dyn Acknowledger> = Arc::clone(self) as Arc<dyn Acknowledger>;
        Delivery::new(tag, payload, acker)
    }

    /// Tags acknowledged so far, in order.
    pub fn acked(&self) -> Vec<u64> {
        self.acked.read().unwrap().clone()
    }

    pub fn ack_count(&self) -> usize {
        self.acked.read().unwrap().len()
    }

    /// Make later acknowledgments fail. Failed acks are still recorded.
    pub fn fail_acks(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Acknowledger for RecordingAcker {
    fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        self.acked.write().unwrap().push(delivery_tag);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Ack(format!("tag {} rejected", delivery_tag)));
        }
        Ok(())
    }
}
