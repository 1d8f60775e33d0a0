//! The detection pipeline: eight ordered stages turning a
//! `PredictionSet` into zero or more accepted `Detection`s.
//!
//! One `Processor` is owned by exactly one task, serving exactly one
//! source, per the no-locking design: dynamic-threshold and dedup state
//! live here unshared.

mod bark;
mod dedup;
mod solar;
mod thresholds;

use std::collections::HashMap;

use crate::buffer::CaptureBuffer;
use crate::config::{ClipConfig, FiltersConfig, PrivacyWindowKind, ThresholdsConfig};
use crate::error::{log_processor_error, ProcessorError};
use crate::model::{Detection, PredictionSet, RawPrediction, Species, SourceId};

use bark::BarkSuppressor;
use dedup::DedupTable;
use thresholds::ThresholdTable;

/// A detection paired with the raw clip audio staged for it, handed off
/// to the ClipWriter action outside the event bus proper.
pub struct ClipJob {
    pub detection_id: String,
    pub clip_path: String,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

pub struct Processor {
    source_id: SourceId,
    base_default: f32,
    include_list: Vec<String>,
    exclude_list: Vec<String>,
    privacy_rules: Vec<(String, PrivacyWindowKind)>,
    location: (f64, f64),
    clip: ClipConfig,
    thresholds: ThresholdTable,
    bark: BarkSuppressor,
    dedup: DedupTable,
    last_window_start_mono_ns: Option<i64>,
    model_version: String,
    processor_version: String,
    next_detection_seq: u64,
}

impl Processor {
    pub fn new(
        source_id: SourceId,
        thresholds_config: &ThresholdsConfig,
        filters_config: &FiltersConfig,
        clip_config: &ClipConfig,
        model_version: String,
        processor_version: String,
    ) -> Self {
        Self {
            source_id,
            base_default: thresholds_config.base_default,
            include_list: filters_config.include_list.iter().map(|s| s.to_lowercase()).collect(),
            exclude_list: filters_config.exclude_list.iter().map(|s| s.to_lowercase()).collect(),
            privacy_rules: filters_config
                .privacy_rules
                .iter()
                .map(|r| (r.species_scientific.to_lowercase(), r.window))
                .collect(),
            location: (filters_config.location.lat, filters_config.location.lon),
            clip: clip_config.clone(),
            thresholds: ThresholdTable::new(
                thresholds_config.base_default,
                thresholds_config.per_species.clone(),
                thresholds_config.bump_step,
                thresholds_config.max_bump,
                thresholds_config.decay_half_life_sec,
            ),
            bark: BarkSuppressor::new(
                thresholds_config.bark_labels.clone(),
                thresholds_config.bark_threshold,
                thresholds_config.bark_suppress_windows,
            ),
            dedup: DedupTable::new(thresholds_config.dedup_cooldown_sec),
            last_window_start_mono_ns: None,
            model_version,
            processor_version,
            next_detection_seq: 0,
        }
    }

    /// Run the full pipeline over one prediction set. `capture` is this
    /// source's CaptureBuffer, used for stage 7 clip staging; pass
    /// `None` when clips are disabled.
    pub fn process(
        &mut self,
        set: PredictionSet,
        capture: Option<&CaptureBuffer>,
    ) -> (Vec<Detection>, Vec<ClipJob>) {
        if let Some(last) = self.last_window_start_mono_ns {
            if set.window_start_mono_ns < last {
                log::info!(
                    target: "processor",
                    "source {} window clock reset detected (new < last); resetting processor state",
                    self.source_id
                );
                self.reset_state();
            }
        }
        self.last_window_start_mono_ns = Some(set.window_start_mono_ns);

        // Stage 1: base-threshold filter, per species (falling back to
        // the global default when a species has no override).
        let survivors: Vec<RawPrediction> = set
            .predictions
            .into_iter()
            .filter(|p| {
                let scientific_lower = species_from_label(&p.label).scientific.to_lowercase();
                p.score >= self.thresholds.base_for(&scientific_lower)
            })
            .collect();
        if survivors.is_empty() {
            return (Vec::new(), Vec::new());
        }

        // Stage 2: dog-bark suppression.
        let survivors = self.bark.apply(survivors);
        if survivors.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let mut detections = Vec::new();
        let mut clip_jobs = Vec::new();

        for prediction in survivors {
            let species = species_from_label(&prediction.label);
            let scientific_lower = species.scientific.to_lowercase();

            // Stage 3: time-of-day / privacy filter.
            if self.is_privacy_blocked(&scientific_lower, set.window_end_wall_ms) {
                continue;
            }

            // Stage 4: include/exclude lists.
            if !self.include_list.is_empty() && !self.include_list.contains(&scientific_lower) {
                continue;
            }
            if self.exclude_list.contains(&scientific_lower) {
                continue;
            }

            // Stage 5: dynamic-threshold adjustment.
            let effective = self.thresholds.effective_threshold(&species.scientific, set.window_end_wall_ms);
            if prediction.score < effective {
                continue;
            }

            // Stage 6: deduplication.
            if !self.dedup.allows(&species.scientific, set.window_start_wall_ms) {
                continue;
            }
            self.dedup.record_emission(&species.scientific, set.window_start_wall_ms);
            self.thresholds.record_acceptance(&species.scientific, set.window_end_wall_ms);

            let id = format!("{}-{}", self.source_id, self.next_detection_seq);
            self.next_detection_seq += 1;

            // Stage 7: clip staging.
            let clip_path = if self.clip.enabled {
                Some(clip_path_for(&self.clip.directory, &species.code, set.window_start_wall_ms, &self.source_id, prediction.score))
            } else {
                None
            };

            if let (Some(path), Some(capture)) = (&clip_path, capture) {
                let start = set.window_start_wall_ms - (self.clip.pre_roll_sec * 1000.0) as i64;
                let end = set.window_end_wall_ms + (self.clip.post_roll_sec * 1000.0) as i64;
                match capture.extract(start, end) {
                    Ok((sample_rate, samples)) => clip_jobs.push(ClipJob {
                        detection_id: id.clone(),
                        clip_path: path.clone(),
                        sample_rate,
                        samples,
                    }),
                    Err(err) => {
                        log_processor_error(
                            &ProcessorError::StageFailed { stage: "clip_staging", reason: err.to_string() },
                            &self.source_id,
                        );
                    }
                }
            }

            // Stage 8: emit.
            detections.push(Detection {
                id,
                source_id: self.source_id.clone(),
                species,
                score: prediction.score,
                window_start_wall_ms: set.window_start_wall_ms,
                window_end_wall_ms: set.window_end_wall_ms,
                clip_path,
                model_version: self.model_version.clone(),
                processor_version: self.processor_version.clone(),
            });
        }

        (detections, clip_jobs)
    }

    fn is_privacy_blocked(&self, scientific_lower: &str, window_end_wall_ms: i64) -> bool {
        let applies = self.privacy_rules.iter().any(|(s, _)| s == scientific_lower);
        if !applies {
            return false;
        }
        let (lat, lon) = self.location;
        // Only rule kind today is NightOnly: species may not be detected
        // between civil dusk and civil dawn.
        solar::is_night(lat, lon, window_end_wall_ms)
    }

    fn reset_state(&mut self) {
        self.thresholds = ThresholdTable::new(self.base_default, HashMap::new(), 0.0, 0.0, 1);
        self.dedup = DedupTable::new(0);
        self.last_window_start_mono_ns = None;
    }
}

/// BirdNET label convention: `"Scientific name_Common name"`. A short
/// code is derived from the first three letters of genus and species.
fn species_from_label(label: &str) -> Species {
    let (scientific, common) = match label.split_once('_') {
        Some((sci, com)) => (sci.to_string(), com.to_string()),
        None => (label.to_string(), label.to_string()),
    };
    let code = species_code(&scientific);
    Species { scientific, common, code }
}

fn species_code(scientific: &str) -> String {
    let mut parts = scientific.split_whitespace();
    let genus = parts.next().unwrap_or("unk");
    let species = parts.next().unwrap_or("unk");
    let take3 = |s: &str| s.chars().take(3).collect::<String>().to_lowercase();
    format!("{}{}", take3(genus), take3(species))
}

fn clip_path_for(directory: &str, species_code: &str, window_start_wall_ms: i64, source_id: &str, score: f32) -> String {
    let datetime = chrono::DateTime::from_timestamp_millis(window_start_wall_ms).unwrap_or_default();
    let date = datetime.format("%Y-%m-%d");
    let timestamp = datetime.format("%Y%m%dT%H%M%S");
    let score_int = (score.clamp(0.0, 1.0) * 100.0).round() as u32;
    format!("{directory}/{date}/{species_code}/{timestamp}_{source_id}_{score_int:03}.wav")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocationConfig, PrivacyRule};

    fn thresholds_config() -> ThresholdsConfig {
        ThresholdsConfig {
            base_default: 0.6,
            per_species: HashMap::new(),
            bump_step: 0.05,
            max_bump: 0.3,
            decay_half_life_sec: 600,
            dedup_cooldown_sec: 30,
            bark_threshold: 0.7,
            bark_suppress_windows: 2,
            bark_labels: vec!["Dog".to_string()],
        }
    }

    fn prediction_set(predictions: Vec<RawPrediction>, start_ms: i64) -> PredictionSet {
        PredictionSet {
            source_id: "mic:default".to_string(),
            window_start_mono_ns: start_ms * 1_000_000,
            window_start_wall_ms: start_ms,
            window_end_wall_ms: start_ms + 3000,
            predictions,
        }
    }

    #[test]
    fn below_base_threshold_is_dropped_silently() {
        let mut processor = Processor::new(
            "mic:default".to_string(),
            &thresholds_config(),
            &FiltersConfig::default(),
            &ClipConfig { enabled: false, ..ClipConfig::default() },
            "v1".to_string(),
            "v1".to_string(),
        );
        let set = prediction_set(vec![RawPrediction { label: "Turdus merula_Eurasian Blackbird".to_string(), score: 0.5 }], 0);
        let (detections, _) = processor.process(set, None);
        assert!(detections.is_empty());
    }

    #[test]
    fn accepts_and_dedups_within_cooldown() {
        let mut processor = Processor::new(
            "mic:default".to_string(),
            &thresholds_config(),
            &FiltersConfig::default(),
            &ClipConfig { enabled: false, ..ClipConfig::default() },
            "v1".to_string(),
            "v1".to_string(),
        );
        let pred = RawPrediction { label: "Turdus merula_Eurasian Blackbird".to_string(), score: 0.9 };

        let (d1, _) = processor.process(prediction_set(vec![pred.clone()], 0), None);
        assert_eq!(d1.len(), 1);

        let (d2, _) = processor.process(prediction_set(vec![pred.clone()], 1_000), None);
        assert!(d2.is_empty());

        let (d3, _) = processor.process(prediction_set(vec![pred], 30_000), None);
        assert_eq!(d3.len(), 1);
    }

    #[test]
    fn include_list_filters_out_unlisted_species() {
        let mut filters = FiltersConfig::default();
        filters.include_list = vec!["Parus major".to_string()];
        let mut processor = Processor::new(
            "mic:default".to_string(),
            &thresholds_config(),
            &filters,
            &ClipConfig { enabled: false, ..ClipConfig::default() },
            "v1".to_string(),
            "v1".to_string(),
        );
        let set = prediction_set(vec![RawPrediction { label: "Turdus merula_Eurasian Blackbird".to_string(), score: 0.9 }], 0);
        let (detections, _) = processor.process(set, None);
        assert!(detections.is_empty());
    }

    #[test]
    fn scenario_include_exclude_lists() {
        let mut filters = FiltersConfig::default();
        filters.include_list = vec!["Species A".to_string(), "Species B".to_string()];
        filters.exclude_list = vec!["Species B".to_string()];
        let mut processor = Processor::new(
            "mic:default".to_string(),
            &thresholds_config(),
            &filters,
            &ClipConfig { enabled: false, ..ClipConfig::default() },
            "v1".to_string(),
            "v1".to_string(),
        );
        let set = prediction_set(
            vec![
                RawPrediction { label: "Species A_A".to_string(), score: 0.9 },
                RawPrediction { label: "Species B_B".to_string(), score: 0.95 },
                RawPrediction { label: "Species C_C".to_string(), score: 0.99 },
            ],
            0,
        );
        let (detections, _) = processor.process(set, None);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].species.scientific, "Species A");
    }

    #[test]
    fn window_clock_reset_resets_dedup_state() {
        let mut processor = Processor::new(
            "mic:default".to_string(),
            &thresholds_config(),
            &FiltersConfig::default(),
            &ClipConfig { enabled: false, ..ClipConfig::default() },
            "v1".to_string(),
            "v1".to_string(),
        );
        let pred = RawPrediction { label: "Turdus merula_Eurasian Blackbird".to_string(), score: 0.9 };
        let (d1, _) = processor.process(prediction_set(vec![pred.clone()], 10_000), None);
        assert_eq!(d1.len(), 1);

        // Source restarted: mono clock resets to a smaller value.
        let mut reset_set = prediction_set(vec![pred], 0);
        reset_set.window_start_mono_ns = 0;
        let (d2, _) = processor.process(reset_set, None);
        assert_eq!(d2.len(), 1);
    }

    #[test]
    fn privacy_rule_blocks_species_at_night() {
        let mut filters = FiltersConfig::default();
        filters.location = LocationConfig { lat: 0.0, lon: 0.0, timezone: "UTC".to_string() };
        filters.privacy_rules = vec![PrivacyRule {
            species_scientific: "Turdus merula".to_string(),
            window: crate::config::PrivacyWindowKind::NightOnly,
        }];
        let mut processor = Processor::new(
            "mic:default".to_string(),
            &thresholds_config(),
            &filters,
            &ClipConfig { enabled: false, ..ClipConfig::default() },
            "v1".to_string(),
            "v1".to_string(),
        );
        let midnight_ms = chrono::NaiveDate::from_ymd_opt(2026, 6, 21)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        let set = prediction_set(vec![RawPrediction { label: "Turdus merula_Eurasian Blackbird".to_string(), score: 0.9 }], midnight_ms);
        let (detections, _) = processor.process(set, None);
        assert!(detections.is_empty());
    }
}
