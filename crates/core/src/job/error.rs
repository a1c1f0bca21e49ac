//! Error kinds a deposit job can end with.

use thiserror::Error;

use crate::messaging::JobFailureInfo;

/// Class name reported for [`JobError::Failed`].
pub const JOB_FAILED_CLASS: &str = "JobFailedError";

/// Class name reported for [`JobError::Interrupted`].
pub const JOB_INTERRUPTED_CLASS: &str = "JobInterruptedError";

/// Errors returned from [`DepositJob::run`](super::DepositJob::run).
#[derive(Debug, Error)]
pub enum JobError {
    /// The job stopped cooperatively; the deposit can resume later.
    #[error("job interrupted: {0}")]
    Interrupted(String),

    /// The job ran and decided the deposit cannot proceed.
    #[error("{message}")]
    Failed { message: String },

    /// Anything else that went wrong.
    #[error("{kind}: {message}")]
    Unexpected {
        kind: String,
        message: String,
        trace: Option<String>,
    },
}

impl JobError {
    pub fn interrupted(reason: impl Into<String>) -> Self {
        JobError::Interrupted(reason.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed {
            message: message.into(),
        }
    }

    /// Wrap an arbitrary error, keeping its type name and source chain.
    pub fn unexpected<E>(error: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {}", cause));
            source = cause.source();
        }

        JobError::Unexpected {
            kind: simple_type_name::<E>().to_string(),
            message: error.to_string(),
            trace: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, JobError::Interrupted(_))
    }

    /// Name the error is reported under in outcome messages.
    pub fn class_name(&self) -> &str {
        match self {
            JobError::Interrupted(_) => JOB_INTERRUPTED_CLASS,
            JobError::Failed { .. } => JOB_FAILED_CLASS,
            JobError::Unexpected { kind, .. } => kind,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            JobError::Interrupted(reason) => reason,
            JobError::Failed { message } => message,
            JobError::Unexpected { message, .. } => message,
        }
    }

    pub fn to_failure_info(&self) -> JobFailureInfo {
        let stack_trace = match self {
            JobError::Unexpected { trace, .. } => trace.clone(),
            _ => None,
        };
        JobFailureInfo {
            class_name: self.class_name().to_string(),
            message: Some(self.message().to_string()),
            stack_trace,
        }
    }
}

/// `std::io::error::Error` -> `Error`, `foo::Wrapper<bar::Baz>` -> `Wrapper`.
fn simple_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
