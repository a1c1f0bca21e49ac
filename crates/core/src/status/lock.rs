//! Per-deposit supervisor lock.
//!
//! The lock must span coordinator processes, so it lives in the shared store
//! rather than in a language-level mutex. Acquisition is a single attempt:
//! callers that lose the race abandon their action.

use std::sync::Arc;

use tracing::{debug, error};

use super::StoreError;

/// Exclusive, time-bounded token keyed by resource id.
pub trait SupervisorLock: Send + Sync {
    /// Try once to take the lock for `resource_id` on behalf of `owner`.
    /// Returns false if someone else holds an unexpired lock.
    fn acquire(&self, resource_id: &str, owner: &str) -> Result<bool, StoreError>;

    /// Release the lock regardless of owner. Releasing a free lock is a no-op.
    fn release(&self, resource_id: &str) -> Result<(), StoreError>;
}

/// Held supervisor lock, released when dropped.
pub struct SupervisorLockGuard {
    lock: Arc<dyn SupervisorLock>,
    resource_id: String,
}

impl SupervisorLockGuard {
    /// Try to acquire the lock; `Ok(None)` means it is held elsewhere.
    pub fn try_acquire(
        lock: &Arc<dyn SupervisorLock>,
        resource_id: &str,
        owner: &str,
    ) -> Result<Option<Self>, StoreError> {
        if !lock.acquire(resource_id, owner)? {
            debug!("Supervisor lock for {} is held, {} backs off", resource_id, owner);
            return Ok(None);
        }
        Ok(Some(Self {
            lock: Arc::clone(lock),
            resource_id: resource_id.to_string(),
        }))
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Drop for SupervisorLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release(&self.resource_id) {
            error!(
                "Failed to release supervisor lock for {}: {}",
                self.resource_id, e
            );
        }
    }
}
