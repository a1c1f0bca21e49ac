//! Transport abstraction for message channels.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by a message transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel no longer accepts messages.
    #[error("channel closed: {0}")]
    Closed(String),

    /// The payload could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// Acknowledgment was rejected by the broker.
    #[error("acknowledgment failed: {0}")]
    Ack(String),

    /// A listener container could not change its lifecycle state.
    #[error("listener container error: {0}")]
    Container(String),

    /// The backing queue storage failed.
    #[error("queue storage error: {0}")]
    Storage(String),

    /// Any other broker failure.
    #[error("transport error: {0}")]
    Other(String),
}

impl From<rusqlite::Error> for TransportError {
    fn from(e: rusqlite::Error) -> Self {
        TransportError::Storage(e.to_string())
    }
}

/// Producer side of a channel.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Enqueue a payload, optionally making it visible only after `delay`.
    async fn send(&self, payload: String, delay: Option<Duration>) -> Result<(), TransportError>;
}

/// Serialize `message` as JSON and send it immediately.
pub async fn publish<T: Serialize + Sync>(
    sender: &dyn MessageSender,
    message: &T,
) -> Result<(), TransportError> {
    let payload =
        serde_json::to_string(message).map_err(|e| TransportError::Encode(e.to_string()))?;
    sender.send(payload, None).await
}

/// Serialize `message` as JSON and send it after `delay`.
pub async fn publish_delayed<T: Serialize + Sync>(
    sender: &dyn MessageSender,
    message: &T,
    delay: Duration,
) -> Result<(), TransportError> {
    let payload =
        serde_json::to_string(message).map_err(|e| TransportError::Encode(e.to_string()))?;
    sender.send(payload, Some(delay)).await
}

/// Settles deliveries with the broker.
pub trait Acknowledger: Send + Sync {
    fn ack(&self, delivery_tag: u64) -> Result<(), TransportError>;
}

/// A received message awaiting acknowledgment.
///
/// Dropping a delivery without acknowledging it leaves the message pending
/// with the broker until the consumer recovers it.
pub struct Delivery {
    delivery_tag: u64,
    payload: String,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, payload: impl Into<String>, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            delivery_tag,
            payload: payload.into(),
            acker,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Acknowledge the delivery so the broker discards the message.
    pub fn ack(&self) -> Result<(), TransportError> {
        self.acker.ack(self.delivery_tag)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("payload", &self.payload)
            .finish()
    }
}

/// Consumer side of a channel.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next delivery. Returns `None` once the channel is closed
    /// and drained. Must be cancel-safe.
    async fn receive(&self) -> Option<Delivery>;

    /// Return every unacknowledged delivery to the front of the queue.
    fn recover(&self);
}
