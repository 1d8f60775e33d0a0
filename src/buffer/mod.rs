//! Per-source buffering: a lock-free analysis ring feeding the
//! classifier, and a time-addressable capture ring feeding clip
//! extraction.

mod analysis_buffer;
mod capture_buffer;

pub use analysis_buffer::{analysis_channel, AnalysisReader, AnalysisWriter};
pub use capture_buffer::CaptureBuffer;
