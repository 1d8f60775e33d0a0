//! Core data model shared by every pipeline stage.
//!
//! Types here are intentionally plain data: ownership and lifetime rules
//! are documented per-field rather than enforced by the type system,
//! matching the spec's data-model contract.

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier for a configured input. Unique within a run;
/// persistent across restarts when the user config is unchanged.
pub type SourceId = String;

/// PCM sample encoding as declared by a Source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    S16Le,
    F32Le,
}

/// A chunk of PCM audio as produced by a Source.
///
/// Ownership: produced by the Source; consumed once by the per-source
/// AnalysisBuffer and CaptureBuffer writer. Once both have copied what
/// they need the frame is dropped.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    pub source_id: SourceId,
    /// Monotonic capture timestamp of the first sample, in nanoseconds.
    pub capture_mono_ns: i64,
    /// Wall-clock timestamp of the first sample, in milliseconds since epoch.
    pub wall_clock_ms: i64,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    /// Already downmixed to mono f32 by the Source; never deferred.
    pub samples: Vec<f32>,
}

/// A fixed-size, classifier-ready window of mono audio.
///
/// Invariant: consecutive windows from a given source satisfy
/// `start_mono_ns[i+1] - start_mono_ns[i] == hop_ms * 1_000_000` exactly.
#[derive(Debug, Clone)]
pub struct AnalysisWindow {
    pub source_id: SourceId,
    pub start_wall_ms: i64,
    pub start_mono_ns: i64,
    pub duration_ms: u32,
    pub mono_samples: Vec<f32>,
}

impl AnalysisWindow {
    pub fn end_wall_ms(&self) -> i64 {
        self.start_wall_ms + self.duration_ms as i64
    }
}

/// A single label/score pair emitted by the Classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPrediction {
    pub label: String,
    pub score: f32,
}

/// The full output of one Classifier invocation over one window.
#[derive(Debug, Clone)]
pub struct PredictionSet {
    pub source_id: SourceId,
    pub window_start_mono_ns: i64,
    pub window_start_wall_ms: i64,
    pub window_end_wall_ms: i64,
    pub predictions: Vec<RawPrediction>,
}

/// Canonical species identity. Include/exclude and privacy rules match on
/// `scientific`, case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Species {
    pub scientific: String,
    pub common: String,
    pub code: String,
}

/// An accepted, filtered detection ready for the event bus.
///
/// Immutable once emitted. Persistence may attach additional IDs but does
/// not mutate any field here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub id: String,
    pub source_id: SourceId,
    pub species: Species,
    pub score: f32,
    pub window_start_wall_ms: i64,
    pub window_end_wall_ms: i64,
    pub clip_path: Option<String>,
    pub model_version: String,
    pub processor_version: String,
}

impl Detection {
    /// Key used by PersistenceWriter idempotency:
    /// `(sourceID, windowStart, species.scientific)`.
    pub fn idempotency_key(&self) -> (SourceId, i64, String) {
        (
            self.source_id.clone(),
            self.window_start_wall_ms,
            self.species.scientific.to_lowercase(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_is_case_insensitive_on_species() {
        let mut d = sample_detection();
        d.species.scientific = "Turdus Merula".to_string();
        let k1 = d.idempotency_key();
        d.species.scientific = "turdus merula".to_string();
        let k2 = d.idempotency_key();
        assert_eq!(k1, k2);
    }

    fn sample_detection() -> Detection {
        Detection {
            id: "d1".to_string(),
            source_id: "mic:default".to_string(),
            species: Species {
                scientific: "Turdus merula".to_string(),
                common: "Eurasian Blackbird".to_string(),
                code: "eurbla".to_string(),
            },
            score: 0.8,
            window_start_wall_ms: 0,
            window_end_wall_ms: 3000,
            clip_path: None,
            model_version: "v1".to_string(),
            processor_version: "v1".to_string(),
        }
    }
}
