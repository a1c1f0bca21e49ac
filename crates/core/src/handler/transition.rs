//! Pure state decisions for deposit operations.
//!
//! [`transition`] looks only at the deposit's current state and the requested
//! operation. Everything it decides is expressed as a list of [`Effect`]s that
//! the handler context applies while holding the supervisor lock.

use std::collections::HashMap;

use crate::deposit::DepositState;
use crate::messaging::DepositOperation;

use super::job_failure::failure_message;

/// A single mutation or side effect on one deposit.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Merge fields into the deposit record.
    SaveFields(HashMap<String, String>),
    /// Append to the FIFO queue and set state queued.
    Queue,
    SetState(DepositState),
    /// Forget job statuses that did not complete.
    ClearStaleJobs,
    ClearErrorMessage,
    /// Send the next job, or finish the deposit if only cleanup remains.
    AdvanceJobs,
    /// Mark failed with the given error message.
    Fail(String),
    /// Set endTime, provided startTime is present.
    StampEndTime,
    SendResults,
    /// Remove the deposit from the active set.
    ReleaseSlot,
    /// Delete the deposit record and its job statuses.
    Destroy,
}

/// What an operation does to a deposit in a given state.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub effects: Vec<Effect>,
}

impl Transition {
    fn apply(effects: Vec<Effect>) -> Self {
        Self { effects }
    }

    fn skip() -> Self {
        Self {
            effects: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Returns true if the operation must hold the deposit's supervisor lock.
///
/// Registration targets a deposit nobody else knows yet, and an unsupported
/// action fails the deposit immediately.
pub fn requires_lock(operation: &DepositOperation) -> bool {
    !matches!(
        operation,
        DepositOperation::Register { .. } | DepositOperation::Unsupported { .. }
    )
}

/// Decide the effects of `operation` on a deposit currently in `state`.
pub fn transition(state: DepositState, operation: &DepositOperation) -> Transition {
    use DepositOperation as Op;

    match operation {
        Op::Register { additional_info } if state == DepositState::Unregistered => {
            Transition::apply(vec![
                Effect::SaveFields(additional_info.clone()),
                Effect::Queue,
            ])
        }
        Op::Register { .. } => Transition::skip(),

        Op::Pause if state.is_terminal() || state == DepositState::Paused => Transition::skip(),
        Op::Pause => Transition::apply(vec![
            Effect::SetState(DepositState::Paused),
            Effect::ReleaseSlot,
        ]),

        Op::Quiet if state.is_terminal() || state == DepositState::Quieted => Transition::skip(),
        Op::Quiet => Transition::apply(vec![Effect::SetState(DepositState::Quieted)]),

        Op::Resume if state.can_resume() => Transition::apply(vec![
            Effect::ClearStaleJobs,
            Effect::ClearErrorMessage,
            Effect::Queue,
        ]),
        Op::Resume => Transition::skip(),

        Op::JobSuccess { .. } if state == DepositState::Running => {
            Transition::apply(vec![Effect::AdvanceJobs])
        }
        Op::JobSuccess { .. } => Transition::skip(),

        // A finished deposit only runs its cleanup job; a failing cleanup
        // does not reopen it.
        Op::JobFailure { .. } if state == DepositState::Finished => Transition::skip(),
        Op::JobFailure { failure, .. } => Transition::apply(vec![
            Effect::Fail(failure_message(failure)),
            Effect::StampEndTime,
            Effect::SendResults,
            Effect::ReleaseSlot,
        ]),

        Op::JobInterrupted { .. } if state == DepositState::Running => Transition::apply(vec![
            Effect::SetState(DepositState::Quieted),
            Effect::ReleaseSlot,
        ]),
        Op::JobInterrupted { .. } => Transition::apply(vec![Effect::ReleaseSlot]),

        Op::Destroy if state.can_destroy() => {
            Transition::apply(vec![Effect::Destroy, Effect::ReleaseSlot])
        }
        Op::Destroy => Transition::skip(),

        Op::Unsupported { action } => Transition::apply(vec![
            Effect::Fail(format!("Unsupported deposit action {}", action)),
            Effect::ReleaseSlot,
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JOB_FAILED_CLASS;
    use crate::messaging::JobFailureInfo;

    fn failure(class_name: &str, message: &str) -> JobFailureInfo {
        JobFailureInfo {
            class_name: class_name.to_string(),
            message: Some(message.to_string()),
            stack_trace: None,
        }
    }

    #[test]
    fn test_register_only_applies_to_new_deposits() {
        let info = HashMap::from([("depositorName".to_string(), "alice".to_string())]);
        let register = DepositOperation::Register {
            additional_info: info.clone(),
        };
        for state in DepositState::ALL {
            let t = transition(state, &register);
            if state == DepositState::Unregistered {
                assert_eq!(t.effects, vec![Effect::SaveFields(info.clone()), Effect::Queue]);
            } else {
                assert!(t.is_noop(), "register in {} should be a no-op", state);
            }
        }
        assert!(!requires_lock(&register));
    }

    #[test]
    fn test_resume_only_from_resumable_states() {
        for state in DepositState::ALL {
            let t = transition(state, &DepositOperation::Resume);
            if matches!(
                state,
                DepositState::Paused
                    | DepositState::Quieted
                    | DepositState::Failed
                    | DepositState::Unregistered
            ) {
                assert_eq!(
                    t.effects,
                    vec![Effect::ClearStaleJobs, Effect::ClearErrorMessage, Effect::Queue],
                    "resume from {}",
                    state
                );
            } else {
                assert!(t.is_noop(), "resume from {} should be a no-op", state);
            }
        }
    }

    #[test]
    fn test_pause_releases_slot() {
        let t = transition(DepositState::Running, &DepositOperation::Pause);
        assert_eq!(
            t.effects,
            vec![Effect::SetState(DepositState::Paused), Effect::ReleaseSlot]
        );
        assert!(transition(DepositState::Finished, &DepositOperation::Pause).is_noop());
    }

    #[test]
    fn test_single_quiet_leaves_slot_to_dispatcher() {
        let t = transition(DepositState::Running, &DepositOperation::Quiet);
        assert_eq!(t.effects, vec![Effect::SetState(DepositState::Quieted)]);
        assert!(transition(DepositState::Failed, &DepositOperation::Quiet).is_noop());
    }

    #[test]
    fn test_job_success_only_while_running() {
        let op = DepositOperation::JobSuccess {
            job_id: Some("j1".to_string()),
        };
        assert_eq!(
            transition(DepositState::Running, &op).effects,
            vec![Effect::AdvanceJobs]
        );
        assert!(transition(DepositState::Paused, &op).is_noop());
        assert!(transition(DepositState::Quieted, &op).is_noop());
    }

    #[test]
    fn test_job_failure_fails_with_classified_message() {
        let op = DepositOperation::JobFailure {
            job_id: Some("j1".to_string()),
            failure: failure(JOB_FAILED_CLASS, "checksum mismatch"),
        };
        assert_eq!(
            transition(DepositState::Running, &op).effects,
            vec![
                Effect::Fail("checksum mismatch".to_string()),
                Effect::StampEndTime,
                Effect::SendResults,
                Effect::ReleaseSlot,
            ]
        );

        let op = DepositOperation::JobFailure {
            job_id: None,
            failure: failure("IoError", "disk full"),
        };
        assert_eq!(
            transition(DepositState::Running, &op).effects[0],
            Effect::Fail("An unexpected IoError occurred while processing the deposit".to_string())
        );
        assert!(transition(DepositState::Finished, &op).is_noop());
    }

    #[test]
    fn test_job_interrupted_always_releases() {
        let op = DepositOperation::JobInterrupted {
            job_id: None,
            failure: failure("JobInterruptedError", "shutdown"),
        };
        assert_eq!(
            transition(DepositState::Running, &op).effects,
            vec![Effect::SetState(DepositState::Quieted), Effect::ReleaseSlot]
        );
        assert_eq!(
            transition(DepositState::Paused, &op).effects,
            vec![Effect::ReleaseSlot]
        );
    }

    #[test]
    fn test_destroy_only_when_stopped() {
        assert_eq!(
            transition(DepositState::Failed, &DepositOperation::Destroy).effects,
            vec![Effect::Destroy, Effect::ReleaseSlot]
        );
        assert!(transition(DepositState::Running, &DepositOperation::Destroy).is_noop());
        assert!(transition(DepositState::Queued, &DepositOperation::Destroy).is_noop());
    }

    #[test]
    fn test_unsupported_fails_without_lock() {
        let op = DepositOperation::Unsupported {
            action: "ARCHIVE".to_string(),
        };
        assert!(!requires_lock(&op));
        assert_eq!(
            transition(DepositState::Running, &op).effects[0],
            Effect::Fail("Unsupported deposit action ARCHIVE".to_string())
        );
    }
}
