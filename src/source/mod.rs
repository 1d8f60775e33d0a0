//! Audio sources: soundcards and RTSP streams.
//!
//! A [`Source`] owns nothing about buffering or analysis; it only knows
//! how to open a device or stream and hand back a channel of
//! [`PcmFrame`]s until closed or it fails.

mod rtsp;
mod soundcard;

pub use rtsp::RtspSource;
pub use soundcard::SoundcardSource;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::error::SourceError;
use crate::model::PcmFrame;

/// Receiving end of an opened source. Dropping it does not close the
/// source; call [`SourceHandle::close`] explicitly so the underlying
/// thread or child process is joined.
pub struct SourceHandle {
    pub frames: mpsc::Receiver<PcmFrame>,
    closer: Box<dyn FnOnce() + Send>,
}

impl SourceHandle {
    pub fn new(frames: mpsc::Receiver<PcmFrame>, closer: Box<dyn FnOnce() + Send>) -> Self {
        Self { frames, closer }
    }

    pub fn close(self) {
        (self.closer)();
    }

    /// Split into the frame receiver and a standalone closer, for callers
    /// that need to hold the receiver and the close action separately
    /// (the Supervisor runs them on different tasks).
    pub fn into_parts(self) -> (mpsc::Receiver<PcmFrame>, Box<dyn FnOnce() + Send>) {
        (self.frames, self.closer)
    }
}

/// A configured audio input, either a local soundcard or a remote RTSP
/// camera/encoder stream.
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    /// Stable identifier, matches the owning `SourceConfig::id`.
    fn id(&self) -> &str;

    /// Open the device or stream. Errors distinguish transient failures
    /// (the Supervisor should retry with backoff) from permanent ones
    /// (misconfiguration; the Supervisor should give up).
    async fn open(&self, clock: Arc<dyn Clock>) -> Result<SourceHandle, SourceError>;
}
