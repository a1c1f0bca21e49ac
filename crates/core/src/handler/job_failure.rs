//! Error messages recorded for failed jobs.

use crate::job::JOB_FAILED_CLASS;
use crate::messaging::JobFailureInfo;

const DEFAULT_JOB_FAILED_MESSAGE: &str = "Job failed";

/// Message stored on a deposit whose job failed.
///
/// A job that deliberately failed the deposit supplies its own message. Any
/// other error gets a generic message naming the error type.
pub fn failure_message(failure: &JobFailureInfo) -> String {
    if failure.class_name == JOB_FAILED_CLASS {
        return failure
            .message
            .clone()
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_JOB_FAILED_MESSAGE.to_string());
    }

    unexpected_error_message(&failure.class_name)
}

/// Generic message naming the error type, for failures nobody described.
pub fn unexpected_error_message(class_name: &str) -> String {
    format!(
        "An unexpected {} occurred while processing the deposit",
        simple_class_name(class_name)
    )
}

/// Strip any module path: `a::b::Error` and `a.b.Error` both become `Error`.
fn simple_class_name(class_name: &str) -> &str {
    class_name
        .rsplit(|c| c == '.' || c == ':')
        .find(|segment| !segment.is_empty())
        .unwrap_or(class_name)
}
