//! In-process queue transport.
//!
//! Mirrors broker semantics the coordinators rely on: deliveries stay
//! unacknowledged until acked, `recover` puts unacked deliveries back at the
//! front of the queue, and delayed sends become visible after their delay.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use super::transport::{Acknowledger, Delivery, MessageSender, MessageSource, TransportError};

#[derive(Default)]
struct QueueState {
    ready: VecDeque<String>,
    unacked: BTreeMap<u64, String>,
    next_tag: u64,
    closed: bool,
}

struct QueueInner {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl QueueInner {
    fn push(&self, payload: String) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(TransportError::Closed(self.name.clone()));
            }
            state.ready.push_back(payload);
        }
        self.notify.notify_one();
        Ok(())
    }
}

impl Acknowledger for QueueInner {
    fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        match state.unacked.remove(&delivery_tag) {
            Some(_) => Ok(()),
            None => Err(TransportError::Ack(format!(
                "unknown delivery tag {} on {}",
                delivery_tag, self.name
            ))),
        }
    }
}

/// Unbounded in-memory queue usable as both sender and source.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<QueueInner>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Messages waiting to be delivered.
    pub fn ready_count(&self) -> usize {
        self.inner.state.lock().unwrap().ready.len()
    }

    /// Messages delivered but not yet acknowledged.
    pub fn unacked_count(&self) -> usize {
        self.inner.state.lock().unwrap().unacked.len()
    }

    /// Copy of the payloads waiting to be delivered, front first.
    pub fn ready_payloads(&self) -> Vec<String> {
        self.inner.state.lock().unwrap().ready.iter().cloned().collect()
    }

    /// Take the next delivery without waiting.
    pub fn try_receive(&self) -> Option<Delivery> {
        let mut state = self.inner.state.lock().unwrap();
        let payload = state.ready.pop_front()?;
        state.next_tag += 1;
        let tag = state.next_tag;
        state.unacked.insert(tag, payload.clone());
        Some(Delivery::new(
            tag,
            payload,
            Arc::clone(&self.inner) as Arc<dyn Acknowledger>,
        ))
    }

    /// Stop accepting messages. Consumers drain what is ready, then see `None`.
    pub fn close(&self) {
        self.inner.state.lock().unwrap().closed = true;
        self.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl MessageSender for MemoryQueue {
    async fn send(&self, payload: String, delay: Option<Duration>) -> Result<(), TransportError> {
        match delay {
            Some(delay) if !delay.is_zero() => {
                if self.inner.state.lock().unwrap().closed {
                    return Err(TransportError::Closed(self.inner.name.clone()));
                }
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = inner.push(payload) {
                        debug!("Dropped delayed message: {}", e);
                    }
                });
                Ok(())
            }
            _ => self.inner.push(payload),
        }
    }
}

#[async_trait]
impl MessageSource for MemoryQueue {
    async fn receive(&self) -> Option<Delivery> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_receive() {
                return Some(delivery);
            }
            if self.inner.state.lock().unwrap().closed {
                return None;
            }

            notified.await;
        }
    }

    fn recover(&self) {
        let recovered = {
            let mut state = self.inner.state.lock().unwrap();
            let unacked = std::mem::take(&mut state.unacked);
            let count = unacked.len();
            for (_, payload) in unacked.into_iter().rev() {
                state.ready.push_front(payload);
            }
            count
        };

        if recovered > 0 {
            debug!("Recovered {} unacked messages on {}", recovered, self.inner.name);
            for _ in 0..recovered {
                self.inner.notify.notify_one();
            }
        }
    }
}
