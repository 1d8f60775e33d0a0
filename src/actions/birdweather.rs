//! BirdWeather uploader: POSTs detection metadata (and optionally the
//! clip) to a station endpoint, retrying on 5xx and dropping on 4xx.

use base64::Engine;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{log_action_error, ActionError};
use crate::event_bus::BusEvent;
use crate::model::Detection;

#[derive(Serialize)]
struct BirdWeatherPayload {
    timestamp: String,
    latitude: f64,
    longitude: f64,
    species_code: String,
    score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_base64: Option<String>,
}

pub struct BirdWeatherUploader {
    client: reqwest::Client,
    endpoint: String,
    station_id: String,
    include_clip: bool,
    location: (f64, f64),
    max_retries: u32,
}

impl BirdWeatherUploader {
    pub fn new(endpoint: String, station_id: String, include_clip: bool, location: (f64, f64)) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            station_id,
            include_clip,
            location,
            max_retries: 3,
        }
    }

    fn payload(&self, detection: &Detection) -> BirdWeatherPayload {
        let audio_base64 = if self.include_clip {
            detection
                .clip_path
                .as_ref()
                .and_then(|path| std::fs::read(path).ok())
                .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes))
        } else {
            None
        };

        BirdWeatherPayload {
            timestamp: chrono::DateTime::from_timestamp_millis(detection.window_start_wall_ms)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
            latitude: self.location.0,
            longitude: self.location.1,
            species_code: detection.species.code.clone(),
            score: detection.score,
            audio_base64,
        }
    }

    async fn upload_once(&self, detection: &Detection) -> Result<(), ActionError> {
        let url = format!("{}/stations/{}/detections", self.endpoint, self.station_id);
        let response = self
            .client
            .post(&url)
            .json(&self.payload(detection))
            .send()
            .await
            .map_err(|err| ActionError::UploadFailed { sink: "birdweather", status: err.status().map(|s| s.as_u16()), reason: err.to_string() })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(ActionError::UploadFailed { sink: "birdweather", status: Some(status.as_u16()), reason: status.to_string() })
    }

    /// Retries on 5xx/connection errors with exponential backoff up to
    /// `max_retries`; a 4xx is a hard failure, logged and dropped.
    async fn upload_with_retry(&self, detection: &Detection) {
        let mut attempt = 0;
        loop {
            match self.upload_once(detection).await {
                Ok(()) => return,
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    log_action_error(&err, "birdweather");
                    tokio::time::sleep(std::time::Duration::from_millis(500 * (1u64 << attempt))).await;
                }
                Err(err) => {
                    log_action_error(&err, "birdweather");
                    return;
                }
            }
        }
    }

    pub async fn run(&self, mut detections: mpsc::Receiver<BusEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = detections.recv() => {
                    match event {
                        Some(BusEvent::Detection(detection)) => self.upload_with_retry(&detection).await,
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        }
    }
}
