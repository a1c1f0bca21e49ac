//! Types for the deposit handlers.

use thiserror::Error;

use crate::deposit::DepositState;
use crate::messaging::TransportError;
use crate::status::StoreError;

/// Errors that can escape a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Deposit record missing where one was required.
    #[error("deposit not found: {0}")]
    NotFound(String),

    #[error("status store error: {0}")]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl HandlerError {
    /// Short error type name used in messages recorded on the deposit.
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::NotFound(_) => "DepositNotFoundError",
            HandlerError::Store(_) => "StoreError",
            HandlerError::Transport(_) => "TransportError",
        }
    }
}

/// What a handler did with an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Effects were applied; the deposit moved from one state to another
    /// (possibly the same).
    Applied {
        from: DepositState,
        to: DepositState,
    },
    /// The operation does not apply to a deposit in this state.
    Skipped { state: DepositState },
    /// Someone else holds the supervisor lock; the operation was abandoned.
    LockUnavailable,
}

impl HandlerOutcome {
    /// Metric label for the outcome.
    pub fn label(&self) -> &'static str {
        match self {
            HandlerOutcome::Applied { .. } => "applied",
            HandlerOutcome::Skipped { .. } => "skipped",
            HandlerOutcome::LockUnavailable => "lock_unavailable",
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, HandlerOutcome::Applied { .. })
    }
}
