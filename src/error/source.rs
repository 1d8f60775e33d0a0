// Source errors: capture-device and RTSP/ffmpeg failures.
//
// Error code range: 1001-1099

use std::fmt;

use log::error;

use crate::error::ErrorCode;

pub struct SourceErrorCodes;

impl SourceErrorCodes {
    pub const OPEN_TRANSIENT: i32 = 1001;
    pub const OPEN_PERMANENT: i32 = 1002;
    pub const READ_FAILED: i32 = 1003;
    pub const FFMPEG_NOT_FOUND: i32 = 1004;
    pub const FFMPEG_EXITED: i32 = 1005;
    pub const CLOSED: i32 = 1006;
}

/// Failure modes produced while opening or reading a [`Source`](crate::source::Source).
///
/// `Transient` variants are expected to be retried by the Supervisor with
/// backoff; `Permanent` variants park the source in `Closed` without retry.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Device/stream could not be opened, but retrying later may succeed
    /// (device busy, RTSP host temporarily unreachable).
    OpenTransient { reason: String },

    /// Device/stream could not be opened and retrying will not help
    /// (unknown device name, malformed URL).
    OpenPermanent { reason: String },

    /// A read from an already-open source failed. Always transient.
    ReadFailed { reason: String },

    /// The configured ffmpeg binary could not be located or executed.
    FfmpegNotFound { path: String },

    /// The ffmpeg child process exited unexpectedly.
    FfmpegExited { code: Option<i32>, stderr_tail: String },

    /// An operation was attempted on a source that has already been closed.
    Closed,
}

impl ErrorCode for SourceError {
    fn code(&self) -> i32 {
        match self {
            SourceError::OpenTransient { .. } => SourceErrorCodes::OPEN_TRANSIENT,
            SourceError::OpenPermanent { .. } => SourceErrorCodes::OPEN_PERMANENT,
            SourceError::ReadFailed { .. } => SourceErrorCodes::READ_FAILED,
            SourceError::FfmpegNotFound { .. } => SourceErrorCodes::FFMPEG_NOT_FOUND,
            SourceError::FfmpegExited { .. } => SourceErrorCodes::FFMPEG_EXITED,
            SourceError::Closed => SourceErrorCodes::CLOSED,
        }
    }

    fn message(&self) -> String {
        match self {
            SourceError::OpenTransient { reason } => format!("source open failed (transient): {reason}"),
            SourceError::OpenPermanent { reason } => format!("source open failed (permanent): {reason}"),
            SourceError::ReadFailed { reason } => format!("source read failed: {reason}"),
            SourceError::FfmpegNotFound { path } => format!("ffmpeg not found at {path}"),
            SourceError::FfmpegExited { code, stderr_tail } => {
                format!("ffmpeg exited with code {code:?}: {stderr_tail}")
            }
            SourceError::Closed => "source is closed".to_string(),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for SourceError {}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::ReadFailed {
            reason: err.to_string(),
        }
    }
}

impl SourceError {
    /// True when the Supervisor should schedule a reopen with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::OpenTransient { .. }
                | SourceError::ReadFailed { .. }
                | SourceError::FfmpegExited { .. }
        )
    }
}

pub fn log_source_error(err: &SourceError, source_id: &str) {
    error!(
        target: "source",
        "source={source_id} code={} message={}",
        err.code(),
        err.message()
    );
}
