//! Admission control for concurrently running deposits.
//!
//! The active set is process-local: each coordinator process enforces its own
//! quota even when several processes share one status store.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// Bounded set of deposit ids currently holding a processing slot.
#[derive(Debug)]
pub struct ActiveDepositsService {
    max_concurrent: usize,
    active: Mutex<HashSet<String>>,
}

impl ActiveDepositsService {
    /// Create a service allowing at most `max_concurrent` active deposits.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            active: Mutex::new(HashSet::new()),
        }
    }

    // The set is never left half-updated, so a poisoned lock is still usable.
    fn set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim a slot for `deposit_id`.
    ///
    /// Succeeds only if the id is not already active and a slot is free.
    /// The capacity check and insertion happen under one lock.
    pub fn mark_active(&self, deposit_id: &str) -> bool {
        let mut active = self.set();
        if active.len() >= self.max_concurrent || active.contains(deposit_id) {
            return false;
        }
        active.insert(deposit_id.to_string())
    }

    /// Release the slot held by `deposit_id`, if any.
    pub fn mark_inactive(&self, deposit_id: &str) {
        self.set().remove(deposit_id);
    }

    pub fn is_deposit_active(&self, deposit_id: &str) -> bool {
        self.set().contains(deposit_id)
    }

    /// True while at least one slot is free.
    pub fn accepting_new_deposits(&self) -> bool {
        self.set().len() < self.max_concurrent
    }

    pub fn active_count(&self) -> usize {
        self.set().len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Sorted copy of the active ids.
    pub fn snapshot(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.set().iter().cloned().collect();
        ids.sort();
        ids
    }
}
