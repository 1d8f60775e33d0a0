//! Action subscribers: the compiled-in sinks fed by the EventBus.
//!
//! Every action follows the same shape — subscribe to a topic, loop
//! pulling events, handle its own retries/backpressure, log and meter
//! failures without ever propagating them back to the Processor — per
//! the uniform Subscriber contract (no dynamic loading; the action set
//! is fixed at compile time).

mod birdweather;
mod clip_writer;
mod mqtt;
mod notifier;
mod persistence;
#[cfg(feature = "sse")]
mod sse;

pub use birdweather::BirdWeatherUploader;
pub use clip_writer::ClipWriter;
pub use mqtt::MqttPublisher;
pub use notifier::Notifier;
pub use persistence::{run as run_persistence, InMemoryPersistence, Persistence};
#[cfg(feature = "sse")]
pub use sse::SseBroadcaster;

use tokio_util::sync::CancellationToken;

/// A running subscriber's handle. Dropping it does not stop the task;
/// call `stop` (or cancel the shared token) to end it deliberately.
pub struct ActionTask {
    pub handle: tokio::task::JoinHandle<()>,
}

impl ActionTask {
    pub async fn stop(self, cancel: &CancellationToken) {
        cancel.cancel();
        let _ = self.handle.await;
    }
}
