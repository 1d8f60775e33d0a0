// AnalysisBuffer / CaptureBuffer errors.
//
// Error code range: 1101-1199

use std::fmt;

use log::warn;

use crate::error::ErrorCode;

pub struct BufferErrorCodes;

impl BufferErrorCodes {
    pub const CLOSED: i32 = 1101;
    pub const TIMEOUT: i32 = 1102;
    pub const RANGE_NOT_COVERED: i32 = 1103;
    pub const POISONED: i32 = 1104;
}

/// Errors from [`AnalysisBuffer`](crate::buffer::AnalysisBuffer) and
/// [`CaptureBuffer`](crate::buffer::CaptureBuffer).
///
/// Overflow (dropped samples) is not an error variant: per the buffer
/// contract it is a recovered condition, metered via `samples_dropped`
/// rather than surfaced as a `Result::Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferError {
    /// Write attempted after the buffer was closed.
    Closed,

    /// `NextWindow` did not observe `windowMs` of samples before its deadline.
    Timeout,

    /// `Extract` requested a range outside the retention window.
    RangeNotCovered { start_wall_ms: i64, end_wall_ms: i64 },

    /// The buffer's internal lock was poisoned by a panicking holder.
    Poisoned,
}

impl ErrorCode for BufferError {
    fn code(&self) -> i32 {
        match self {
            BufferError::Closed => BufferErrorCodes::CLOSED,
            BufferError::Timeout => BufferErrorCodes::TIMEOUT,
            BufferError::RangeNotCovered { .. } => BufferErrorCodes::RANGE_NOT_COVERED,
            BufferError::Poisoned => BufferErrorCodes::POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            BufferError::Closed => "buffer is closed".to_string(),
            BufferError::Timeout => "timed out waiting for a full window".to_string(),
            BufferError::RangeNotCovered { start_wall_ms, end_wall_ms } => {
                format!("range [{start_wall_ms}, {end_wall_ms}] not covered by retention window")
            }
            BufferError::Poisoned => "buffer lock poisoned".to_string(),
        }
    }
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for BufferError {}

pub fn log_buffer_error(err: &BufferError, source_id: &str) {
    warn!(
        target: "buffer",
        "source={source_id} code={} message={}",
        err.code(),
        err.message()
    );
}
