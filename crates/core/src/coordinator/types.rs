//! Types for the coordinators.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handler::HandlerError;
use crate::messaging::TransportError;
use crate::status::{PipelineState, StoreError};

/// Errors that can occur while coordinating.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("status store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),
}

/// Result of one promotion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Promotion {
    /// The candidate is now running and its first job was sent.
    Promoted(String),
    /// The candidate was claimed but could not be started; it is now failed.
    Failed(String),
    /// The candidate's lock was held or its state changed underneath us.
    Abandoned(String),
    /// No free slot, or nothing queued.
    Idle,
}

impl Promotion {
    /// Returns true if the queue moved, so another attempt may find work.
    pub fn made_progress(&self) -> bool {
        matches!(self, Promotion::Promoted(_) | Promotion::Failed(_))
    }
}

/// Result of a pipeline control action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineTransition {
    Changed {
        from: PipelineState,
        to: PipelineState,
    },
    /// The action is not allowed from the current state.
    Ignored { state: Option<PipelineState> },
}

/// Snapshot of the control plane for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub state: Option<PipelineState>,
    pub active_deposits: Vec<String>,
    pub max_concurrent_deposits: usize,
    pub operations_listener_running: bool,
    pub jobs_listener_running: bool,
}
