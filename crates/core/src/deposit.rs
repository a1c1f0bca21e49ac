//! Deposit records and their lifecycle states.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositState {
    /// No record yet, or registered without being queued.
    Unregistered,
    /// Waiting for a processing slot.
    Queued,
    /// Holding a slot with a job in flight.
    Running,
    /// Stopped by a user; resumable.
    Paused,
    /// Stopped by a pipeline quiesce or an interrupted job; resumable.
    Quieted,
    Failed,
    Finished,
}

impl DepositState {
    pub const ALL: [DepositState; 7] = [
        DepositState::Unregistered,
        DepositState::Queued,
        DepositState::Running,
        DepositState::Paused,
        DepositState::Quieted,
        DepositState::Failed,
        DepositState::Finished,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DepositState::Unregistered => "unregistered",
            DepositState::Queued => "queued",
            DepositState::Running => "running",
            DepositState::Paused => "paused",
            DepositState::Quieted => "quieted",
            DepositState::Failed => "failed",
            DepositState::Finished => "finished",
        }
    }

    /// Returns true if a RESUME may re-queue a deposit in this state.
    pub fn can_resume(&self) -> bool {
        matches!(
            self,
            DepositState::Paused
                | DepositState::Quieted
                | DepositState::Failed
                | DepositState::Unregistered
        )
    }

    /// Returns true if a DESTROY may remove a deposit in this state.
    pub fn can_destroy(&self) -> bool {
        matches!(
            self,
            DepositState::Paused
                | DepositState::Quieted
                | DepositState::Failed
                | DepositState::Finished
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DepositState::Failed | DepositState::Finished)
    }
}

impl fmt::Display for DepositState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepositState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DepositState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown deposit state: {}", s))
    }
}

/// Well-known fields of a deposit record.
///
/// Records also carry arbitrary fields supplied at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositField {
    DepositorName,
    StartTime,
    EndTime,
    ErrorMessage,
    PackagingType,
    ContainerId,
}

impl DepositField {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositField::DepositorName => "depositorName",
            DepositField::StartTime => "startTime",
            DepositField::EndTime => "endTime",
            DepositField::ErrorMessage => "errorMessage",
            DepositField::PackagingType => "packagingType",
            DepositField::ContainerId => "containerId",
        }
    }
}

/// A deposit as read from the status store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: String,
    pub state: DepositState,
    pub fields: HashMap<String, String>,
}

impl Deposit {
    pub fn field(&self, field: DepositField) -> Option<&str> {
        self.fields.get(field.as_str()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_str() {
        for state in DepositState::ALL {
            assert_eq!(state.as_str().parse::<DepositState>().unwrap(), state);
        }
        assert!("archived".parse::<DepositState>().is_err());
    }

    #[test]
    fn test_resumable_states() {
        let resumable: Vec<_> = DepositState::ALL
            .into_iter()
            .filter(DepositState::can_resume)
            .collect();
        assert_eq!(
            resumable,
            vec![
                DepositState::Unregistered,
                DepositState::Paused,
                DepositState::Quieted,
                DepositState::Failed,
            ]
        );
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&DepositState::Quieted).unwrap();
        assert_eq!(json, "\"quieted\"");
    }

    #[test]
    fn test_field_lookup() {
        let deposit = Deposit {
            id: "d1".to_string(),
            state: DepositState::Running,
            fields: HashMap::from([("startTime".to_string(), "2024-01-01T00:00:00Z".to_string())]),
        };
        assert_eq!(
            deposit.field(DepositField::StartTime),
            Some("2024-01-01T00:00:00Z")
        );
        assert_eq!(deposit.field(DepositField::EndTime), None);
    }
}
