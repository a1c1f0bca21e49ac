//! Wire messages for the three channels.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Action carried by an operation message.
///
/// Unknown action names still deserialize, as `Unsupported`, so that the
/// coordinator can fail the deposit instead of silently dropping it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DepositAction {
    Register,
    Pause,
    Resume,
    Quiet,
    JobSuccess,
    JobFailure,
    JobInterrupted,
    Destroy,
    Unsupported(String),
}

impl DepositAction {
    pub fn as_str(&self) -> &str {
        match self {
            DepositAction::Register => "REGISTER",
            DepositAction::Pause => "PAUSE",
            DepositAction::Resume => "RESUME",
            DepositAction::Quiet => "QUIET",
            DepositAction::JobSuccess => "JOB_SUCCESS",
            DepositAction::JobFailure => "JOB_FAILURE",
            DepositAction::JobInterrupted => "JOB_INTERRUPTED",
            DepositAction::Destroy => "DESTROY",
            DepositAction::Unsupported(name) => name,
        }
    }
}

impl From<String> for DepositAction {
    fn from(name: String) -> Self {
        match name.as_str() {
            "REGISTER" => DepositAction::Register,
            "PAUSE" => DepositAction::Pause,
            "RESUME" => DepositAction::Resume,
            "QUIET" => DepositAction::Quiet,
            "JOB_SUCCESS" => DepositAction::JobSuccess,
            "JOB_FAILURE" => DepositAction::JobFailure,
            "JOB_INTERRUPTED" => DepositAction::JobInterrupted,
            "DESTROY" => DepositAction::Destroy,
            _ => DepositAction::Unsupported(name),
        }
    }
}

impl From<DepositAction> for String {
    fn from(action: DepositAction) -> Self {
        action.as_str().to_string()
    }
}

/// Error details reported by a failed or interrupted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailureInfo {
    pub class_name: String,
    pub message: Option<String>,
    pub stack_trace: Option<String>,
}

/// Deposit-level operation, or a job outcome, addressed to one deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMessage {
    pub deposit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub action: DepositAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub additional_info: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_stack_trace: Option<String>,
}

impl OperationMessage {
    pub fn new(deposit_id: impl Into<String>, action: DepositAction) -> Self {
        Self {
            deposit_id: deposit_id.into(),
            job_id: None,
            action,
            username: None,
            additional_info: HashMap::new(),
            exception_class_name: None,
            exception_message: None,
            exception_stack_trace: None,
        }
    }

    /// REGISTER message carrying the deposit's initial fields.
    pub fn register(
        deposit_id: impl Into<String>,
        username: impl Into<String>,
        additional_info: HashMap<String, String>,
    ) -> Self {
        Self {
            additional_info,
            ..Self::new(deposit_id, DepositAction::Register).with_username(username)
        }
    }

    /// Outcome message for a job.
    pub fn job_outcome(job: &JobMessage, action: DepositAction) -> Self {
        Self::new(job.deposit_id.clone(), action).with_job_id(job.job_id.clone())
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_failure(mut self, failure: JobFailureInfo) -> Self {
        self.exception_class_name = Some(failure.class_name);
        self.exception_message = failure.message;
        self.exception_stack_trace = failure.stack_trace;
        self
    }

    fn failure_info(&self) -> JobFailureInfo {
        JobFailureInfo {
            class_name: self
                .exception_class_name
                .clone()
                .unwrap_or_else(|| "UnknownError".to_string()),
            message: self.exception_message.clone(),
            stack_trace: self.exception_stack_trace.clone(),
        }
    }

    /// The typed operation this message requests.
    pub fn operation(&self) -> DepositOperation {
        let job_id = self.job_id.clone();
        match &self.action {
            DepositAction::Register => DepositOperation::Register {
                additional_info: self.additional_info.clone(),
            },
            DepositAction::Pause => DepositOperation::Pause,
            DepositAction::Resume => DepositOperation::Resume,
            DepositAction::Quiet => DepositOperation::Quiet,
            DepositAction::Destroy => DepositOperation::Destroy,
            DepositAction::JobSuccess => DepositOperation::JobSuccess { job_id },
            DepositAction::JobFailure => DepositOperation::JobFailure {
                job_id,
                failure: self.failure_info(),
            },
            DepositAction::JobInterrupted => DepositOperation::JobInterrupted {
                job_id,
                failure: self.failure_info(),
            },
            DepositAction::Unsupported(name) => DepositOperation::Unsupported {
                action: name.clone(),
            },
        }
    }
}

/// Operation on a deposit, carrying exactly the payload its handler needs.
#[derive(Debug, Clone, PartialEq)]
pub enum DepositOperation {
    Register {
        additional_info: HashMap<String, String>,
    },
    Pause,
    Resume,
    Quiet,
    Destroy,
    JobSuccess {
        job_id: Option<String>,
    },
    JobFailure {
        job_id: Option<String>,
        failure: JobFailureInfo,
    },
    JobInterrupted {
        job_id: Option<String>,
        failure: JobFailureInfo,
    },
    Unsupported {
        action: String,
    },
}

impl DepositOperation {
    /// Metric/log label for the operation.
    pub fn name(&self) -> &'static str {
        match self {
            DepositOperation::Register { .. } => "register",
            DepositOperation::Pause => "pause",
            DepositOperation::Resume => "resume",
            DepositOperation::Quiet => "quiet",
            DepositOperation::Destroy => "destroy",
            DepositOperation::JobSuccess { .. } => "job_success",
            DepositOperation::JobFailure { .. } => "job_failure",
            DepositOperation::JobInterrupted { .. } => "job_interrupted",
            DepositOperation::Unsupported { .. } => "unsupported",
        }
    }
}

/// A single job to execute against a deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub job_id: String,
    pub deposit_id: String,
    pub job_class_name: String,
}

impl JobMessage {
    /// New job message with a fresh job id.
    pub fn new(deposit_id: impl Into<String>, job_class_name: impl Into<String>) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            deposit_id: deposit_id.into(),
            job_class_name: job_class_name.into(),
        }
    }
}

/// Pipeline-wide control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineAction {
    Quiet,
    Unquiet,
    Stop,
}

impl PipelineAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineAction::Quiet => "QUIET",
            PipelineAction::Unquiet => "UNQUIET",
            PipelineAction::Stop => "STOP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMessage {
    pub action: PipelineAction,
    pub username: String,
}

impl PipelineMessage {
    pub fn new(action: PipelineAction, username: impl Into<String>) -> Self {
        Self {
            action,
            username: username.into(),
        }
    }
}
