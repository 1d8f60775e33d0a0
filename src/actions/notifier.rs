//! Generic webhook notifier: one detection -> one JSON POST to a
//! user-configured URL. Not a desktop notification — the daemon has no
//! desktop to notify from, so "notify" means "tell some other service."

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{log_action_error, ActionError};
use crate::event_bus::BusEvent;
use crate::model::Detection;

#[derive(Serialize)]
struct NotifierPayload<'a> {
    source: &'a str,
    species_common: &'a str,
    species_scientific: &'a str,
    score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    clip_path: Option<&'a str>,
}

pub struct Notifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl Notifier {
    pub fn new(webhook_url: String) -> Self {
        Self { client: reqwest::Client::new(), webhook_url }
    }

    fn payload(detection: &Detection) -> NotifierPayload<'_> {
        NotifierPayload {
            source: &detection.source_id,
            species_common: &detection.species.common,
            species_scientific: &detection.species.scientific,
            score: detection.score,
            clip_path: detection.clip_path.as_deref(),
        }
    }

    async fn notify(&self, detection: &Detection) -> Result<(), ActionError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&Self::payload(detection))
            .send()
            .await
            .map_err(|err| ActionError::PublishFailed { sink: "notifier", reason: err.to_string() })?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(ActionError::PublishFailed { sink: "notifier", reason: response.status().to_string() })
    }

    pub async fn run(&self, mut detections: mpsc::Receiver<BusEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = detections.recv() => {
                    match event {
                        Some(BusEvent::Detection(detection)) => {
                            if let Err(err) = self.notify(&detection).await {
                                log_action_error(&err, "notifier");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Species;

    #[test]
    fn payload_carries_clip_path_when_present() {
        let detection = Detection {
            id: "d1".to_string(),
            source_id: "mic:default".to_string(),
            species: Species {
                scientific: "Turdus merula".to_string(),
                common: "Eurasian Blackbird".to_string(),
                code: "turmer".to_string(),
            },
            score: 0.75,
            window_start_wall_ms: 0,
            window_end_wall_ms: 3000,
            clip_path: Some("clips/2026-01-01/turmer/a.wav".to_string()),
            model_version: "v1".to_string(),
            processor_version: "v1".to_string(),
        };
        let payload = Notifier::payload(&detection);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["species_common"], "Eurasian Blackbird");
        assert!(json["clip_path"].is_string());
    }
}
