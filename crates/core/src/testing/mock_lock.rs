//! Recording supervisor lock.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::status::{StoreError, SupervisorLock};

/// A recorded lock call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockCall {
    Acquire {
        resource_id: String,
        owner: String,
        granted: bool,
    },
    Release {
        resource_id: String,
    },
}

/// Wraps a real lock, recording every call. Resources marked with
/// [`RecordingLock::deny`] are reported as held by someone else.
pub struct RecordingLock {
    inner: Arc<dyn SupervisorLock>,
    calls: Arc<RwLock<Vec<LockCall>>>,
    denied: Arc<RwLock<HashSet<String>>>,
}

impl RecordingLock {
    pub fn new(inner: Arc<dyn SupervisorLock>) -> Self {
        Self {
            inner,
            calls: Arc::new(RwLock::new(Vec::new())),
            denied: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Refuse every acquisition of `resource_id`.
    pub fn deny(&self, resource_id: impl Into<String>) {
        self.denied.write().unwrap().insert(resource_id.into());
    }

    pub fn allow(&self, resource_id: &str) {
        self.denied.write().unwrap().remove(resource_id);
    }

    /// Get all recorded calls, in order.
    pub fn calls(&self) -> Vec<LockCall> {
        self.calls.read().unwrap().clone()
    }

    /// Calls made for one resource, in order.
    pub fn calls_for(&self, resource_id: &str) -> Vec<LockCall> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                LockCall::Acquire { resource_id: r, .. } | LockCall::Release { resource_id: r } => {
                    r == resource_id
                }
            })
            .collect()
    }

    /// Owners that were granted the lock for `resource_id`.
    pub fn granted_owners(&self, resource_id: &str) -> Vec<String> {
        self.calls_for(resource_id)
            .into_iter()
            .filter_map(|call| match call {
                LockCall::Acquire {
                    owner,
                    granted: true,
                    ..
                } => Some(owner),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.write().unwrap().clear();
    }
}

impl SupervisorLock for RecordingLock {
    fn acquire(&self, resource_id: &str, owner: &str) -> Result<bool, StoreError> {
        let granted = if self.denied.read().unwrap().contains(resource_id) {
            false
        } else {
            self.inner.acquire(resource_id, owner)?
        };
        self.calls.write().unwrap().push(LockCall::Acquire {
            resource_id: resource_id.to_string(),
            owner: owner.to_string(),
            granted,
        });
        Ok(granted)
    }

    fn release(&self, resource_id: &str) -> Result<(), StoreError> {
        self.calls.write().unwrap().push(LockCall::Release {
            resource_id: resource_id.to_string(),
        });
        self.inner.release(resource_id)
    }
}
