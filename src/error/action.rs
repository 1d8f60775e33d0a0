// Action (subscriber) errors: persistence, clip writer, MQTT, BirdWeather,
// notifier, SSE. Never propagated upstream of the subscriber itself.
//
// Error code range: 1301-1399

use std::fmt;

use log::error;

use crate::error::ErrorCode;
use crate::telemetry::telemetry;

pub struct ActionErrorCodes;

impl ActionErrorCodes {
    pub const PERSISTENCE_FAILED: i32 = 1301;
    pub const CLIP_WRITE_FAILED: i32 = 1302;
    pub const PUBLISH_FAILED: i32 = 1303;
    pub const UPLOAD_FAILED: i32 = 1304;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionError {
    PersistenceFailed { reason: String },
    ClipWriteFailed { reason: String },
    PublishFailed { sink: &'static str, reason: String },
    UploadFailed { sink: &'static str, status: Option<u16>, reason: String },
}

impl ErrorCode for ActionError {
    fn code(&self) -> i32 {
        match self {
            ActionError::PersistenceFailed { .. } => ActionErrorCodes::PERSISTENCE_FAILED,
            ActionError::ClipWriteFailed { .. } => ActionErrorCodes::CLIP_WRITE_FAILED,
            ActionError::PublishFailed { .. } => ActionErrorCodes::PUBLISH_FAILED,
            ActionError::UploadFailed { .. } => ActionErrorCodes::UPLOAD_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            ActionError::PersistenceFailed { reason } => format!("persistence write failed: {reason}"),
            ActionError::ClipWriteFailed { reason } => format!("clip write failed: {reason}"),
            ActionError::PublishFailed { sink, reason } => format!("{sink} publish failed: {reason}"),
            ActionError::UploadFailed { sink, status, reason } => {
                format!("{sink} upload failed (status {status:?}): {reason}")
            }
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for ActionError {}

/// True for upload failures the caller should retry with backoff (5xx or
/// no status at all, e.g. a connection error); false for hard 4xx failures.
impl ActionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ActionError::UploadFailed { status, .. } => match status {
                Some(code) => *code >= 500,
                None => true,
            },
            ActionError::PublishFailed { .. } => true,
            _ => false,
        }
    }
}

pub fn log_action_error(err: &ActionError, action: &str) {
    telemetry().record_action_failure();
    error!(target: "actions", "action={action} code={} message={}", err.code(), err.message());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        let server_err = ActionError::UploadFailed { sink: "birdweather", status: Some(503), reason: "".into() };
        let client_err = ActionError::UploadFailed { sink: "birdweather", status: Some(401), reason: "".into() };
        assert!(server_err.is_retryable());
        assert!(!client_err.is_retryable());
    }
}
