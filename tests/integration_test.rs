//! End-to-end scenarios driving synthetic PCM/predictions through the
//! real AnalysisBuffer -> Processor -> CaptureBuffer chain, no real sound
//! card or ffmpeg process involved.

use std::time::Duration;

use birdnet_core::buffer::{analysis_channel, CaptureBuffer};
use birdnet_core::config::{
    ClipConfig, FiltersConfig, LocationConfig, PrivacyRule, PrivacyWindowKind, ThresholdsConfig,
};
use birdnet_core::model::{PcmFrame, PredictionSet, RawPrediction, SampleFormat};
use birdnet_core::processor::Processor;

const SAMPLE_RATE: u32 = 1000;

fn thresholds(base_default: f32) -> ThresholdsConfig {
    ThresholdsConfig {
        base_default,
        per_species: Default::default(),
        bump_step: 0.05,
        max_bump: 0.3,
        decay_half_life_sec: 600,
        dedup_cooldown_sec: 30,
        bark_threshold: 0.7,
        bark_suppress_windows: 2,
        bark_labels: vec!["Dog_Dog".to_string()],
    }
}

fn filters() -> FiltersConfig {
    FiltersConfig {
        include_list: Vec::new(),
        exclude_list: Vec::new(),
        privacy_rules: Vec::new(),
        location: LocationConfig::default(),
    }
}

fn clip(enabled: bool) -> ClipConfig {
    ClipConfig {
        enabled,
        pre_roll_sec: 3.0,
        post_roll_sec: 2.0,
        directory: "clips".to_string(),
        target_sample_rate: SAMPLE_RATE,
    }
}

fn frame(wall_ms: i64, mono_ns: i64, source_id: &str, len: usize) -> PcmFrame {
    PcmFrame {
        source_id: source_id.to_string(),
        capture_mono_ns: mono_ns,
        wall_clock_ms: wall_ms,
        sample_rate: SAMPLE_RATE,
        channels: 1,
        sample_format: SampleFormat::F32Le,
        samples: vec![0.2; len],
    }
}

fn prediction_set(source_id: &str, start_ms: i64, end_ms: i64, preds: Vec<(&str, f32)>) -> PredictionSet {
    PredictionSet {
        source_id: source_id.to_string(),
        window_start_mono_ns: start_ms * 1_000_000,
        window_start_wall_ms: start_ms,
        window_end_wall_ms: end_ms,
        predictions: preds.into_iter().map(|(label, score)| RawPrediction { label: label.to_string(), score }).collect(),
    }
}

/// Scenario 1: a single tone-matching window clears threshold once; the
/// clip extracted around it spans windowMs + preRoll + postRoll.
#[tokio::test]
async fn scenario_single_source_tone_yields_one_detection_with_full_clip() {
    let (mut writer, mut reader) = analysis_channel(8, 3000, 1500, SAMPLE_RATE);
    let capture = CaptureBuffer::new(60);

    // Feed 8s of audio so the capture ring covers the full pre/post roll.
    for i in 0..16 {
        let wall_ms = i * 500;
        let f = frame(wall_ms, wall_ms * 1_000_000, "mic:default", (SAMPLE_RATE as i64 * 500 / 1000) as usize);
        capture.write(f.wall_clock_ms, f.sample_rate, f.samples.clone());
        writer.write(f);
    }

    // Skip to the third window (start_wall_ms == 3000): its pre-roll
    // reaches back to wall_ms 0, which the capture ring actually covers.
    // The first two windows' pre-roll would reach before any captured
    // audio and can never yield a clip.
    reader.next_window(Duration::from_millis(200)).await.unwrap();
    reader.next_window(Duration::from_millis(200)).await.unwrap();
    let window = reader.next_window(Duration::from_millis(200)).await.unwrap();
    assert_eq!(window.mono_samples.len(), 3000);
    assert_eq!(window.start_wall_ms, 3000);

    let mut processor = Processor::new(
        "mic:default".to_string(),
        &thresholds(0.6),
        &filters(),
        &clip(true),
        "model-v1".to_string(),
        "proc-v1".to_string(),
    );

    let set = prediction_set("mic:default", window.start_wall_ms, window.end_wall_ms(), vec![("Species_X", 0.8)]);
    let (detections, clip_jobs) = processor.process(set, Some(&capture));

    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].species.scientific, "Species");
    assert_eq!(clip_jobs.len(), 1);
    let expected_duration_ms = 3000 + 3000 + 2000;
    let actual_duration_ms = clip_jobs[0].samples.len() as i64 * 1000 / clip_jobs[0].sample_rate as i64;
    assert!((actual_duration_ms - expected_duration_ms).abs() <= 50, "got {actual_duration_ms}ms");
}

/// Scenario 3: two sources detecting the same species simultaneously each
/// get their own Detection and independent dedup timer.
#[test]
fn scenario_two_sources_each_get_independent_detections() {
    let mut proc_a = Processor::new("mic:a".to_string(), &thresholds(0.6), &filters(), &clip(false), "v1".to_string(), "v1".to_string());
    let mut proc_b = Processor::new("mic:b".to_string(), &thresholds(0.6), &filters(), &clip(false), "v1".to_string(), "v1".to_string());

    let set_a = prediction_set("mic:a", 0, 3000, vec![("Turdus merula_Blackbird", 0.9)]);
    let set_b = prediction_set("mic:b", 0, 3000, vec![("Turdus merula_Blackbird", 0.9)]);

    let (det_a, _) = proc_a.process(set_a, None);
    let (det_b, _) = proc_b.process(set_b, None);
    assert_eq!(det_a.len(), 1);
    assert_eq!(det_b.len(), 1);

    // Killing source A's stream (dropping proc_a) must not affect B's
    // independent dedup/threshold state.
    drop(proc_a);
    let set_b2 = prediction_set("mic:b", 1500, 4500, vec![("Turdus merula_Blackbird", 0.9)]);
    let (det_b2, _) = proc_b.process(set_b2, None);
    assert!(det_b2.is_empty(), "still inside dedup cooldown");
}

/// Scenario 4: a loud bark co-occurring with a bird prediction suppresses
/// the bird for the configured number of following windows.
#[test]
fn scenario_dog_bark_suppresses_following_bird_predictions() {
    let mut processor = Processor::new("mic:default".to_string(), &thresholds(0.6), &filters(), &clip(false), "v1".to_string(), "v1".to_string());

    let barking = prediction_set("mic:default", 0, 3000, vec![("Dog_Dog", 0.9), ("Turdus merula_Blackbird", 0.75)]);
    let (det1, _) = processor.process(barking, None);
    assert_eq!(det1.len(), 1, "only the bark itself survives the triggering window");
    assert_eq!(det1[0].species.scientific, "Dog");

    let next = prediction_set("mic:default", 1500, 4500, vec![("Turdus merula_Blackbird", 0.75)]);
    let (det2, _) = processor.process(next, None);
    assert!(det2.is_empty(), "bark suppression window still active");
}

/// Scenario 5: a night-only privacy rule blocks a species at night and
/// admits it once civil dawn has passed.
#[test]
fn scenario_privacy_rule_blocks_then_admits_after_dawn() {
    let filters_with_rule = FiltersConfig {
        include_list: Vec::new(),
        exclude_list: Vec::new(),
        privacy_rules: vec![PrivacyRule { species_scientific: "Strix aluco".to_string(), window: PrivacyWindowKind::NightOnly }],
        location: LocationConfig { lat: 0.0, lon: 0.0, timezone: "UTC".to_string() },
    };
    let mut processor = Processor::new("mic:default".to_string(), &thresholds(0.6), &filters_with_rule, &clip(false), "v1".to_string(), "v1".to_string());

    // At the equator near the equinox, UTC midnight is well before civil
    // dawn (~05:36) and UTC noon is well before civil dusk (~18:24).
    let midnight_ms = 1_710_892_800_000; // 2024-03-20T00:00:00Z
    let noon_ms = 1_710_936_000_000; // 2024-03-20T12:00:00Z

    let set1 = prediction_set("mic:default", midnight_ms, midnight_ms + 3000, vec![("Strix aluco_Tawny Owl", 0.95)]);
    let (det1, _) = processor.process(set1, None);
    assert!(det1.is_empty(), "night-only species must not fire at UTC midnight");

    let set2 = prediction_set("mic:default", noon_ms, noon_ms + 3000, vec![("Strix aluco_Tawny Owl", 0.95)]);
    let (det2, _) = processor.process(set2, None);
    assert_eq!(det2.len(), 1, "same species must fire once civil dawn has passed");
}

/// Scenario 6: include/exclude lists compose — exclude wins over include
/// when a species is in both.
#[test]
fn scenario_include_and_exclude_lists_compose() {
    let filters_with_lists = FiltersConfig {
        include_list: vec!["species a".to_string(), "species b".to_string()],
        exclude_list: vec!["species b".to_string()],
        privacy_rules: Vec::new(),
        location: LocationConfig::default(),
    };
    let mut processor = Processor::new("mic:default".to_string(), &thresholds(0.6), &filters_with_lists, &clip(false), "v1".to_string(), "v1".to_string());

    let set = prediction_set(
        "mic:default",
        0,
        3000,
        vec![("Species A_A", 0.9), ("Species B_B", 0.95), ("Species C_C", 0.99)],
    );
    let (detections, _) = processor.process(set, None);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].species.scientific, "Species A");
}

/// Boundary: requesting a clip range that predates the capture retention
/// window must fail cleanly rather than emit a partial/corrupt clip.
#[test]
fn boundary_clip_range_miss_returns_an_error_not_a_partial_clip() {
    let capture = CaptureBuffer::new(5);
    capture.write(100_000, SAMPLE_RATE, vec![0.1; SAMPLE_RATE as usize]);

    let result = capture.extract(0, 50_000);
    assert!(result.is_err());
}
