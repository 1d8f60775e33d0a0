// Processor and Classifier-invocation errors.
//
// Error code range: 1201-1299

use std::fmt;

use log::{error, warn};

use crate::error::ErrorCode;
use crate::telemetry::telemetry;

pub struct ProcessorErrorCodes;

impl ProcessorErrorCodes {
    pub const CLASSIFIER_TIMEOUT: i32 = 1201;
    pub const CLASSIFIER_INTERNAL: i32 = 1202;
    pub const STAGE_FAILED: i32 = 1203;
}

/// Errors raised while running a [`PredictionSet`](crate::model::PredictionSet)
/// through the processor's stage pipeline, or while invoking the Classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorError {
    /// The Classifier did not return within its per-window deadline.
    ClassifierTimeout { window_ms: u64 },

    /// The Classifier returned an error (model fault, malformed window).
    ClassifierInternal { reason: String },

    /// A processor stage rejected a PredictionSet outright (malformed input).
    StageFailed { stage: &'static str, reason: String },
}

impl ErrorCode for ProcessorError {
    fn code(&self) -> i32 {
        match self {
            ProcessorError::ClassifierTimeout { .. } => ProcessorErrorCodes::CLASSIFIER_TIMEOUT,
            ProcessorError::ClassifierInternal { .. } => ProcessorErrorCodes::CLASSIFIER_INTERNAL,
            ProcessorError::StageFailed { .. } => ProcessorErrorCodes::STAGE_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            ProcessorError::ClassifierTimeout { window_ms } => {
                format!("classifier exceeded deadline for a {window_ms}ms window")
            }
            ProcessorError::ClassifierInternal { reason } => format!("classifier error: {reason}"),
            ProcessorError::StageFailed { stage, reason } => format!("stage {stage} failed: {reason}"),
        }
    }
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessorError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for ProcessorError {}

pub fn log_processor_error(err: &ProcessorError, source_id: &str) {
    telemetry().record_processor_dropped();
    match err {
        ProcessorError::ClassifierTimeout { .. } => {
            warn!(target: "processor", "source={source_id} code={} message={}", err.code(), err.message())
        }
        _ => error!(target: "processor", "source={source_id} code={} message={}", err.code(), err.message()),
    }
}
