//! Server-Sent Events broadcaster: exposes the detection topic to a web
//! UI as newline-delimited JSON, one `Detection` per event.

use std::convert::Infallible;
use std::pin::Pin;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;

use crate::event_bus::{BusEvent, EventBus, OverflowPolicy, TOPIC_DETECTION};
use crate::model::Detection;

pub type DetectionStream = Sse<Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>>;

pub struct SseBroadcaster {
    event_bus: std::sync::Arc<EventBus>,
    buffer_size: usize,
}

impl SseBroadcaster {
    pub fn new(event_bus: std::sync::Arc<EventBus>, buffer_size: usize) -> Self {
        Self { event_bus, buffer_size }
    }

    /// Subscribes fresh, so each web client gets its own lossy queue;
    /// a slow client drops events rather than stalling detection.
    pub fn stream(&self) -> DetectionStream {
        let subscriber = self.event_bus.subscribe(TOPIC_DETECTION, self.buffer_size, OverflowPolicy::DropNewest);

        let stream = ReceiverStream::new(subscriber.receiver).filter_map(|event| async move {
            let BusEvent::Detection(detection) = event else { return None };
            match serde_json::to_string(&detection) {
                Ok(payload) => Some(Ok(sse_event(&detection, payload))),
                Err(_) => None,
            }
        });

        Sse::new(Box::pin(stream) as Pin<Box<_>>)
            .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
    }
}

fn sse_event(detection: &Detection, payload: String) -> Event {
    Event::default().event("detection").id(detection.id.clone()).data(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Species;
    use std::sync::Arc;

    #[tokio::test]
    async fn published_detection_reaches_the_stream() {
        let bus = Arc::new(EventBus::new());
        let broadcaster = SseBroadcaster::new(bus.clone(), 4);
        let mut stream = broadcaster.stream().into_inner();

        let detection = Detection {
            id: "d1".to_string(),
            source_id: "mic:default".to_string(),
            species: Species { scientific: "Turdus merula".to_string(), common: "Eurasian Blackbird".to_string(), code: "turmer".to_string() },
            score: 0.6,
            window_start_wall_ms: 0,
            window_end_wall_ms: 3000,
            clip_path: None,
            model_version: "v1".to_string(),
            processor_version: "v1".to_string(),
        };
        bus.publish(TOPIC_DETECTION, BusEvent::Detection(detection)).await;

        let event = stream.next().await.unwrap().unwrap();
        assert!(format!("{event:?}").contains("turmer"));
    }
}
