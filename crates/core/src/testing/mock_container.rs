//! Mock listener container for testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::messaging::{ListenerContainer, TransportError};

/// A lifecycle call made on a [`MockContainer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerCall {
    Start,
    Stop,
    Shutdown,
}

/// Listener container that only records lifecycle calls.
///
/// `fail_calls(true)` makes every later call return an error after it has
/// been recorded; the running flag is left untouched in that case.
#[derive(Debug)]
pub struct MockContainer {
    calls: Arc<RwLock<Vec<ContainerCall>>>,
    running: AtomicBool,
    failing: AtomicBool,
}

impl Default for MockContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockContainer {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            running: AtomicBool::new(false),
            failing: AtomicBool::new(false),
        }
    }

    /// A container that reports itself as already running.
    pub fn running() -> Self {
        let container = Self::new();
        container.running.store(true, Ordering::SeqCst);
        container
    }

    /// Get all recorded calls, in order.
    pub fn calls(&self) -> Vec<ContainerCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn fail_calls(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, call: ContainerCall, running: bool) -> Result<(), TransportError> {
        self.calls.write().unwrap().push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Container(format!("{:?} failed", call)));
        }
        self.running.store(running, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ListenerContainer for MockContainer {
    async fn start(&self) -> Result<(), TransportError> {
        self.record(ContainerCall::Start, true)
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.record(ContainerCall::Stop, false)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.record(ContainerCall::Shutdown, false)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
