//! PersistenceWriter: idempotent detection storage and per-species
//! first-seen tracking.
//!
//! The spec treats the schema as external — the core only owns the
//! `{Insert(Detection) -> id, UpsertFirstSeen(species, date)}` contract,
//! not a concrete database. `InMemoryPersistence` is the reference
//! implementation used by the daemon and by tests; a real deployment is
//! free to swap in a SQL-backed implementation of the same trait
//! without touching the Processor or EventBus.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{log_action_error, ActionError};
use crate::event_bus::BusEvent;
use crate::model::Detection;
use crate::telemetry::telemetry;

#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    async fn insert(&self, detection: &Detection) -> Result<String, ActionError>;
    async fn upsert_first_seen(&self, species_scientific: &str, date: NaiveDate) -> Result<(), ActionError>;
}

pub struct InMemoryPersistence {
    rows: Mutex<HashMap<(String, i64, String), String>>,
    first_seen: Mutex<HashMap<String, NaiveDate>>,
    next_id: Mutex<u64>,
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            first_seen: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn first_seen_date(&self, species_scientific: &str) -> Option<NaiveDate> {
        self.first_seen.lock().unwrap().get(&species_scientific.to_lowercase()).copied()
    }
}

#[async_trait::async_trait]
impl Persistence for InMemoryPersistence {
    async fn insert(&self, detection: &Detection) -> Result<String, ActionError> {
        let key = detection.idempotency_key();
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing_id) = rows.get(&key) {
            return Ok(existing_id.clone());
        }
        let mut next_id = self.next_id.lock().unwrap();
        let id = format!("row-{}", *next_id);
        *next_id += 1;
        rows.insert(key, id.clone());
        Ok(id)
    }

    async fn upsert_first_seen(&self, species_scientific: &str, date: NaiveDate) -> Result<(), ActionError> {
        let key = species_scientific.to_lowercase();
        let mut first_seen = self.first_seen.lock().unwrap();
        let earlier = first_seen.get(&key).map(|existing| date < *existing).unwrap_or(true);
        if earlier {
            first_seen.insert(key, date);
        }
        Ok(())
    }
}

/// Drives a `Persistence` implementation off the detection topic: every
/// detection is inserted, and the global first-seen cache is consulted
/// before bothering the store with an `upsert_first_seen` call.
pub async fn run(store: &dyn Persistence, mut detections: mpsc::Receiver<BusEvent>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            event = detections.recv() => {
                match event {
                    Some(BusEvent::Detection(detection)) => {
                        if let Err(err) = store.insert(&detection).await {
                            log_action_error(&err, "persistence");
                            continue;
                        }
                        let date = DateTime::from_timestamp_millis(detection.window_start_wall_ms).map(|dt| dt.date_naive());
                        if let Some(date) = date {
                            if telemetry().mark_first_seen(&detection.species.scientific, date) {
                                if let Err(err) = store.upsert_first_seen(&detection.species.scientific, date).await {
                                    log_action_error(&err, "persistence");
                                }
                            }
                        }
                    }
                    Some(_) => {}
                    None => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Species;

    fn detection(window_start_wall_ms: i64) -> Detection {
        Detection {
            id: "ignored".to_string(),
            source_id: "mic:default".to_string(),
            species: Species {
                scientific: "Turdus merula".to_string(),
                common: "Eurasian Blackbird".to_string(),
                code: "turmer".to_string(),
            },
            score: 0.9,
            window_start_wall_ms,
            window_end_wall_ms: window_start_wall_ms + 3000,
            clip_path: None,
            model_version: "v1".to_string(),
            processor_version: "v1".to_string(),
        }
    }

    #[tokio::test]
    async fn repeat_delivery_of_same_detection_yields_one_row() {
        let store = InMemoryPersistence::new();
        let d = detection(0);
        let id1 = store.insert(&d).await.unwrap();
        let id2 = store.insert(&d).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.row_count(), 1);
    }

    #[tokio::test]
    async fn distinct_window_starts_are_distinct_rows() {
        let store = InMemoryPersistence::new();
        store.insert(&detection(0)).await.unwrap();
        store.insert(&detection(3000)).await.unwrap();
        assert_eq!(store.row_count(), 2);
    }

    #[tokio::test]
    async fn first_seen_keeps_the_earliest_date() {
        let store = InMemoryPersistence::new();
        let later = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let earlier = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        store.upsert_first_seen("Turdus merula", later).await.unwrap();
        store.upsert_first_seen("Turdus merula", earlier).await.unwrap();
        assert_eq!(store.first_seen_date("turdus merula"), Some(earlier));
    }

    #[tokio::test]
    async fn run_loop_inserts_detections_until_the_channel_closes() {
        let store = InMemoryPersistence::new();
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        tx.send(BusEvent::Detection(detection(0))).await.unwrap();
        tx.send(BusEvent::Detection(detection(3000))).await.unwrap();
        drop(tx);

        run(&store, rx, cancel).await;
        assert_eq!(store.row_count(), 2);
    }
}
