//! Per-source lifecycle supervision.
//!
//! One `Supervisor` owns exactly one configured source end to end: opening
//! it, running its producer and analyzer loop, watching for silence, and
//! reopening with backoff on transient failure. Mirrors the teacher's
//! `AudioBackend`/`TimeSource` split (engine/backend/mod.rs) generalized
//! from a single desktop/mobile backend choice to an arbitrary number of
//! concurrently supervised sources.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::buffer::{analysis_channel, CaptureBuffer};
use crate::classifier::Classifier;
use crate::clock::Clock;
use crate::config::{ClipConfig, FiltersConfig, SupervisorConfig, ThresholdsConfig, WindowConfig};
use crate::error::{log_processor_error, log_source_error, ProcessorError, SourceError};
use crate::event_bus::{BusEvent, EventBus, TOPIC_BUFFER_OVERFLOW, TOPIC_DETECTION, TOPIC_SOURCE_STATE};
use crate::model::{PredictionSet, SourceId};
use crate::processor::{ClipJob, Processor};
use crate::source::Source;
use crate::telemetry::telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Opening,
    Running,
    Degraded,
    Closing,
    Closed,
}

impl SupervisorState {
    fn as_str(self) -> &'static str {
        match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Opening => "opening",
            SupervisorState::Running => "running",
            SupervisorState::Degraded => "degraded",
            SupervisorState::Closing => "closing",
            SupervisorState::Closed => "closed",
        }
    }
}

/// Tracks the monotonic instant of the most recently written frame, so the
/// analyzer loop can notice silence without the producer needing to know
/// about watchdog deadlines itself.
struct Watchdog {
    last_frame: Mutex<Instant>,
}

impl Watchdog {
    fn new(now: Instant) -> Self {
        Self { last_frame: Mutex::new(now) }
    }

    fn touch(&self, now: Instant) {
        *self.last_frame.lock().unwrap() = now;
    }

    fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_frame.lock().unwrap())
    }
}

pub struct Supervisor {
    source_id: SourceId,
    source: Arc<dyn Source>,
    classifier: Arc<dyn Classifier>,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    clip_tx: mpsc::Sender<ClipJob>,
    window: WindowConfig,
    supervisor: SupervisorConfig,
    /// Owned for the Supervisor's whole lifetime, not per-session: the
    /// per-species dynamic-threshold and dedup state it carries is keyed
    /// by source ID, not by a particular opened Source instance, so it
    /// must survive a Degraded -> Opening reconnect.
    processor: Mutex<Processor>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_id: SourceId,
        source: Arc<dyn Source>,
        classifier: Arc<dyn Classifier>,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
        clip_tx: mpsc::Sender<ClipJob>,
        window: WindowConfig,
        thresholds: ThresholdsConfig,
        filters: FiltersConfig,
        clip: ClipConfig,
        supervisor: SupervisorConfig,
        model_version: String,
        processor_version: String,
    ) -> Self {
        let processor = Processor::new(source_id.clone(), &thresholds, &filters, &clip, model_version, processor_version);
        Self {
            source_id,
            source,
            classifier,
            clock,
            event_bus,
            clip_tx,
            window,
            supervisor,
            processor: Mutex::new(processor),
        }
    }

    async fn publish_state(&self, state: SupervisorState, cause: Option<String>) {
        self.event_bus
            .publish(
                TOPIC_SOURCE_STATE,
                BusEvent::SourceState { source_id: self.source_id.clone(), state: state.as_str().to_string(), cause },
            )
            .await;
    }

    /// Drive the source through Idle → Opening → Running → (Degraded →
    /// Opening)* → Closing → Closed. Returns once `cancel` fires and
    /// shutdown has completed.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut attempt: u32 = 0;
        self.publish_state(SupervisorState::Idle, None).await;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.publish_state(SupervisorState::Opening, None).await;
            let handle = match self.open_with_backoff(&cancel, &mut attempt).await {
                OpenOutcome::Opened(handle) => handle,
                OpenOutcome::Cancelled => break,
                OpenOutcome::Permanent(err) => {
                    log_source_error(&err, &self.source_id);
                    self.publish_state(SupervisorState::Closed, Some(err.message())).await;
                    return;
                }
            };
            attempt = 0;

            self.publish_state(SupervisorState::Running, None).await;
            let outcome = self.run_session(handle, &cancel).await;

            match outcome {
                SessionOutcome::Cancelled => break,
                SessionOutcome::Degraded(reason) => {
                    self.publish_state(SupervisorState::Degraded, Some(reason)).await;
                    // AnalysisBuffer/CaptureBuffer state is discarded by
                    // dropping the session; self.processor is owned by the
                    // Supervisor itself, so dynamic-threshold/dedup state
                    // survives into the next Opening attempt.
                }
            }
        }

        self.publish_state(SupervisorState::Closing, None).await;
        self.publish_state(SupervisorState::Closed, None).await;
    }

    async fn open_with_backoff(&self, cancel: &CancellationToken, attempt: &mut u32) -> OpenOutcome {
        loop {
            match self.source.open(Arc::clone(&self.clock)).await {
                Ok(handle) => return OpenOutcome::Opened(handle),
                Err(err) if !err.is_transient() => return OpenOutcome::Permanent(err),
                Err(err) => {
                    log_source_error(&err, &self.source_id);
                    *attempt += 1;
                    let delay = backoff_with_jitter(*attempt, self.supervisor.backoff_initial_ms, self.supervisor.backoff_cap_ms);
                    tokio::select! {
                        _ = cancel.cancelled() => return OpenOutcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn run_session(&self, handle: crate::source::SourceHandle, cancel: &CancellationToken) -> SessionOutcome {
        let capacity_frames = 64;
        let (mut analysis_writer, mut analysis_reader) =
            analysis_channel(capacity_frames, self.window.length_ms, self.window.hop_ms, self.classifier.sample_rate());
        let capture = Arc::new(CaptureBuffer::new(self.window.capture_retention_sec));

        let watchdog = Arc::new(Watchdog::new(self.clock.monotonic()));

        let (ended_tx, mut ended_rx) = oneshot::channel::<SourceError>();
        let (mut frames, closer) = handle.into_parts();
        let producer_watchdog = Arc::clone(&watchdog);
        let producer_clock = Arc::clone(&self.clock);
        let producer_capture = Arc::clone(&capture);
        let mut last_dropped = 0u64;
        let producer_source_id = self.source_id.clone();
        let producer_event_bus = Arc::clone(&self.event_bus);

        let producer = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                producer_watchdog.touch(producer_clock.monotonic());
                producer_capture.write(frame.wall_clock_ms, frame.sample_rate, frame.samples.clone());
                analysis_writer.write(frame);

                let dropped = analysis_writer.samples_dropped();
                if dropped > last_dropped {
                    telemetry().record_samples_dropped(dropped - last_dropped);
                    last_dropped = dropped;
                    producer_event_bus
                        .publish(
                            TOPIC_BUFFER_OVERFLOW,
                            BusEvent::BufferOverflow { source_id: producer_source_id.clone(), samples_dropped: dropped },
                        )
                        .await;
                }
            }
            let _ = ended_tx.send(SourceError::ReadFailed { reason: "frame channel closed".to_string() });
        });

        let check_interval = Duration::from_secs(self.supervisor.silence_deadline_sec.max(1)).min(Duration::from_secs(5));
        let classify_deadline = Duration::from_millis(self.window.length_ms as u64 * 2);
        let silence_deadline = Duration::from_secs(self.supervisor.silence_deadline_sec);

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break SessionOutcome::Cancelled,
                ended = &mut ended_rx => {
                    let reason = ended.map(|e| e.message()).unwrap_or_else(|_| "source task ended".to_string());
                    break SessionOutcome::Degraded(reason);
                }
                window = analysis_reader.next_window(check_interval) => {
                    match window {
                        Ok(window) => {
                            let source_id = window.source_id.clone();
                            let window_start_mono_ns = window.start_mono_ns;
                            let window_start_wall_ms = window.start_wall_ms;
                            let window_end_wall_ms = window.end_wall_ms();

                            let predictions = match tokio::time::timeout(classify_deadline, self.classifier.classify(&window)).await {
                                Ok(Ok(preds)) => preds,
                                Ok(Err(err)) => {
                                    log_processor_error(&err, &self.source_id);
                                    continue;
                                }
                                Err(_) => {
                                    telemetry().record_classifier_timeout();
                                    log_processor_error(
                                        &ProcessorError::ClassifierTimeout { window_ms: self.window.length_ms as u64 },
                                        &self.source_id,
                                    );
                                    continue;
                                }
                            };

                            let set = PredictionSet {
                                source_id,
                                window_start_mono_ns,
                                window_start_wall_ms,
                                window_end_wall_ms,
                                predictions,
                            };

                            let (detections, clip_jobs) = self.processor.lock().unwrap().process(set, Some(capture.as_ref()));
                            for detection in detections {
                                telemetry().record_detection_emitted();
                                self.event_bus.publish(TOPIC_DETECTION, BusEvent::Detection(detection)).await;
                            }
                            for job in clip_jobs {
                                let _ = self.clip_tx.send(job).await;
                            }
                        }
                        Err(_timeout) => {
                            // Just a poll tick; fall through to the watchdog check below.
                        }
                    }
                }
            }

            if watchdog.silent_for(self.clock.monotonic()) >= silence_deadline {
                break SessionOutcome::Degraded(format!("no frames for {:?}", silence_deadline));
            }
        };

        producer.abort();
        closer();
        result
    }
}

enum OpenOutcome {
    Opened(crate::source::SourceHandle),
    Cancelled,
    Permanent(SourceError),
}

enum SessionOutcome {
    Cancelled,
    Degraded(String),
}

/// `min(initial * 2^attempt, cap)` with +/-20% jitter, matching the
/// reconnect policy in the Supervisor contract.
fn backoff_with_jitter(attempt: u32, initial_ms: u64, cap_ms: u64) -> Duration {
    let exp = initial_ms.saturating_mul(1u64 << attempt.min(32));
    let base = exp.min(cap_ms).max(1);
    let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
    let jittered = (base as f64) * (1.0 + jitter_frac);
    Duration::from_millis(jittered.max(0.0) as u64)
}

/// A process-wide shutdown signal, handed to every `Supervisor::run` call
/// and cancelled exactly once from the CLI's signal handler.
pub fn shutdown_token() -> CancellationToken {
    CancellationToken::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_geometrically_and_caps() {
        let d1 = backoff_with_jitter(1, 1000, 60_000);
        let d5 = backoff_with_jitter(5, 1000, 60_000);
        let d_cap = backoff_with_jitter(20, 1000, 60_000);
        assert!(d1.as_millis() >= 1600 && d1.as_millis() <= 2400);
        assert!(d5.as_millis() > d1.as_millis());
        assert!(d_cap.as_millis() <= (60_000.0 * 1.2) as u128);
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        for attempt in 1..10 {
            let d = backoff_with_jitter(attempt, 1000, 60_000);
            let expected = (1000u64.saturating_mul(1u64 << attempt)).min(60_000) as f64;
            let lower = expected * 0.8;
            let upper = expected * 1.2;
            let ms = d.as_millis() as f64;
            assert!(ms >= lower - 1.0 && ms <= upper + 1.0, "attempt {attempt}: {ms} not in [{lower}, {upper}]");
        }
    }
}
