//! MQTT publisher: one detection -> one retained-by-the-broker JSON
//! message under `{prefix}{speciesCode}`.

use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{log_action_error, ActionError};
use crate::event_bus::BusEvent;
use crate::model::Detection;

#[derive(Serialize)]
struct MqttPayload<'a> {
    timestamp: String,
    source: &'a str,
    species: MqttSpecies<'a>,
    score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    clip: Option<&'a str>,
}

#[derive(Serialize)]
struct MqttSpecies<'a> {
    common: &'a str,
    scientific: &'a str,
    code: &'a str,
}

pub struct MqttPublisher {
    client: AsyncClient,
    topic_prefix: String,
}

impl MqttPublisher {
    /// `broker_url` is parsed as `mqtt://host:port`; any scheme prefix is
    /// stripped since `rumqttc::MqttOptions` takes host/port separately.
    /// The returned `EventLoop` must be polled continuously by the caller
    /// (rumqttc does the actual socket I/O there, not in `AsyncClient`).
    pub fn connect(client_id: &str, broker_url: &str, topic_prefix: String) -> (Self, rumqttc::EventLoop) {
        let stripped = broker_url.trim_start_matches("mqtt://").trim_start_matches("mqtts://");
        let (host, port) = stripped.split_once(':').map(|(h, p)| (h, p.parse().unwrap_or(1883))).unwrap_or((stripped, 1883));

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(std::time::Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(options, 16);
        (Self { client, topic_prefix }, eventloop)
    }

    fn payload(detection: &Detection) -> MqttPayload<'_> {
        MqttPayload {
            timestamp: chrono::DateTime::from_timestamp_millis(detection.window_start_wall_ms)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
            source: &detection.source_id,
            species: MqttSpecies {
                common: &detection.species.common,
                scientific: &detection.species.scientific,
                code: &detection.species.code,
            },
            score: detection.score,
            clip: detection.clip_path.as_deref(),
        }
    }

    async fn publish_detection(&self, detection: &Detection) -> Result<(), ActionError> {
        let topic = format!("{}{}", self.topic_prefix, detection.species.code);
        let body = serde_json::to_vec(&Self::payload(detection))
            .map_err(|err| ActionError::PublishFailed { sink: "mqtt", reason: err.to_string() })?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, body)
            .await
            .map_err(|err| ActionError::PublishFailed { sink: "mqtt", reason: err.to_string() })
    }

    pub async fn run(&self, mut detections: mpsc::Receiver<BusEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = detections.recv() => {
                    match event {
                        Some(BusEvent::Detection(detection)) => {
                            if let Err(err) = self.publish_detection(&detection).await {
                                log_action_error(&err, "mqtt");
                            }
                        }
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        }
    }
}
