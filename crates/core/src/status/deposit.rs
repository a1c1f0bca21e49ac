//! Deposit status store trait.

use std::collections::HashMap;

use super::StoreError;
use crate::deposit::{Deposit, DepositState};

/// Storage backend for deposit records and the FIFO deposit queue.
///
/// Writing any field or state for an unknown id creates the record.
pub trait DepositStore: Send + Sync {
    /// Get a deposit with all of its fields.
    fn get(&self, id: &str) -> Result<Option<Deposit>, StoreError>;

    /// Current state; `Unregistered` when no record exists.
    fn get_state(&self, id: &str) -> Result<DepositState, StoreError>;

    /// Set the state. Leaving `Queued` removes the deposit from the queue.
    fn set_state(&self, id: &str, state: DepositState) -> Result<(), StoreError>;

    fn get_field(&self, id: &str, field: &str) -> Result<Option<String>, StoreError>;

    fn set_field(&self, id: &str, field: &str, value: &str) -> Result<(), StoreError>;

    fn delete_field(&self, id: &str, field: &str) -> Result<(), StoreError>;

    /// Merge `fields` into the record, overwriting existing values.
    fn save(&self, id: &str, fields: &HashMap<String, String>) -> Result<(), StoreError>;

    /// Append to the back of the queue and set the state to `Queued`.
    fn queue_deposit(&self, id: &str) -> Result<(), StoreError>;

    /// Peek at the deposit at the front of the queue.
    fn first_queued_deposit(&self) -> Result<Option<String>, StoreError>;

    /// All known deposits, oldest first.
    fn list(&self) -> Result<Vec<Deposit>, StoreError>;

    /// Ids of all deposits currently in `state`, oldest first.
    fn list_ids_in_state(&self, state: DepositState) -> Result<Vec<String>, StoreError>;

    /// Mark the deposit failed, recording `message` as its error message.
    fn fail(&self, id: &str, message: Option<&str>) -> Result<(), StoreError>;

    /// Permanently remove the deposit, its fields and its queue entry.
    fn delete(&self, id: &str) -> Result<(), StoreError>;
}
