//! Mock message senders for testing.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::messaging::{JobMessage, MessageSender, OperationMessage, TransportError};

/// A recorded send for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    /// The JSON payload that was sent.
    pub payload: String,
    /// Delay requested by the caller, if any.
    pub delay: Option<Duration>,
}

/// Sender that records every payload instead of delivering it.
///
/// # Example
///
/// ```rust,ignore
/// let sender = RecordingSender::new();
/// publish(&sender, &JobMessage::new("d-1", "ParseBagJob")).await?;
///
/// let jobs = sender.sent_jobs();
/// assert_eq!(jobs[0].job_class_name, "ParseBagJob");
/// ```
#[derive(Debug)]
pub struct RecordingSender {
    sent: Arc<RwLock<Vec<SentMessage>>>,
    /// Error to return on the next send, consumed once.
    next_error: Arc<RwLock<Option<String>>>,
}

impl Default for RecordingSender {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSender {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Get all recorded sends.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.read().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().unwrap().len()
    }

    /// Decode every recorded payload as `T`, skipping those that don't parse.
    pub fn decoded<T: DeserializeOwned>(&self) -> Vec<T> {
        self.sent
            .read()
            .unwrap()
            .iter()
            .filter_map(|m| serde_json::from_str(&m.payload).ok())
            .collect()
    }

    /// Recorded payloads decoded as job messages.
    pub fn sent_jobs(&self) -> Vec<JobMessage> {
        self.decoded()
    }

    /// Recorded payloads decoded as operation messages.
    pub fn sent_operations(&self) -> Vec<OperationMessage> {
        self.decoded()
    }

    /// Make the next send fail with the given message.
    pub fn set_next_error(&self, error: impl Into<String>) {
        *self.next_error.write().unwrap() = Some(error.into());
    }

    /// Clear recorded sends.
    pub fn clear(&self) {
        self.sent.write().unwrap().clear();
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, payload: String, delay: Option<Duration>) -> Result<(), TransportError> {
        if let Some(error) = self.next_error.write().unwrap().take() {
            return Err(TransportError::Other(error));
        }
        self.sent.write().unwrap().push(SentMessage { payload, delay });
        Ok(())
    }
}

/// Sender whose every send fails.
#[derive(Debug, Default)]
pub struct FailingSender {
    attempts: Arc<RwLock<u32>>,
}

impl FailingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sends attempted so far.
    pub fn attempts(&self) -> u32 {
        *self.attempts.read().unwrap()
    }
}

#[async_trait]
impl MessageSender for FailingSender {
    async fn send(&self, _payload: String, _delay: Option<Duration>) -> Result<(), TransportError> {
        *self.attempts.write().unwrap() += 1;
        Err(TransportError::Closed("broker unavailable".to_string()))
    }
}
