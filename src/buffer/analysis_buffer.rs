//! Single-writer/single-reader buffer turning a stream of `PcmFrame`
//! chunks into fixed-length, fixed-hop `AnalysisWindow`s.
//!
//! Incoming frames cross an `rtrb` SPSC ring, same as the teacher's
//! buffer pool; unlike the teacher's pool there is no buffer recycling
//! step, since a frame's `Vec<f32>` is cheap to own outright for the
//! lifetime of one hop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rtrb::{Consumer, Producer, RingBuffer};
use tokio::time::sleep;

use crate::error::BufferError;
use crate::model::{AnalysisWindow, PcmFrame};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Create a writer/reader pair. `capacity_frames` bounds how many
/// not-yet-consumed `PcmFrame`s may queue before the writer starts
/// dropping the oldest one.
pub fn analysis_channel(
    capacity_frames: usize,
    window_length_ms: u32,
    hop_ms: u32,
    sample_rate: u32,
) -> (AnalysisWriter, AnalysisReader) {
    let (producer, consumer) = RingBuffer::new(capacity_frames.max(1));
    let dropped = Arc::new(AtomicU64::new(0));

    let writer = AnalysisWriter { producer, dropped: Arc::clone(&dropped) };
    let reader = AnalysisReader {
        consumer,
        dropped,
        accum: Vec::new(),
        accum_start_wall_ms: None,
        accum_start_mono_ns: None,
        source_id: None,
        window_len_samples: samples_for_ms(window_length_ms, sample_rate),
        hop_samples: samples_for_ms(hop_ms, sample_rate),
        window_length_ms,
        sample_rate,
    };
    (writer, reader)
}

fn samples_for_ms(ms: u32, sample_rate: u32) -> usize {
    (ms as u64 * sample_rate as u64 / 1000) as usize
}

pub struct AnalysisWriter {
    producer: Producer<PcmFrame>,
    dropped: Arc<AtomicU64>,
}

impl AnalysisWriter {
    /// Push a frame. On overflow the oldest queued frame is dropped to
    /// make room, and `samples_dropped` is incremented by its length.
    pub fn write(&mut self, frame: PcmFrame) {
        if self.producer.is_full() {
            if let Ok(old) = self.producer.pop() {
                self.dropped.fetch_add(old.samples.len() as u64, Ordering::Relaxed);
            }
        }
        // The pop above always frees a slot unless the reader raced us
        // and drained it already, in which case this push simply succeeds.
        let _ = self.producer.push(frame);
    }

    pub fn samples_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct AnalysisReader {
    consumer: Consumer<PcmFrame>,
    dropped: Arc<AtomicU64>,
    accum: Vec<f32>,
    accum_start_wall_ms: Option<i64>,
    accum_start_mono_ns: Option<i64>,
    source_id: Option<String>,
    window_len_samples: usize,
    hop_samples: usize,
    window_length_ms: u32,
    sample_rate: u32,
}

impl AnalysisReader {
    pub fn samples_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Block (polling) until a full, hop-aligned window is available or
    /// `timeout` elapses.
    pub async fn next_window(&mut self, timeout: Duration) -> Result<AnalysisWindow, BufferError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            while let Ok(frame) = self.consumer.pop() {
                if self.accum.is_empty() {
                    self.accum_start_wall_ms = Some(frame.wall_clock_ms);
                    self.accum_start_mono_ns = Some(frame.capture_mono_ns);
                    self.source_id = Some(frame.source_id.clone());
                }
                self.accum.extend_from_slice(&frame.samples);
            }

            if self.accum.len() >= self.window_len_samples {
                return Ok(self.emit_window());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(BufferError::Timeout);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    fn emit_window(&mut self) -> AnalysisWindow {
        let window_samples: Vec<f32> = self.accum[0..self.window_len_samples].to_vec();
        let start_wall_ms = self.accum_start_wall_ms.unwrap_or(0);
        let start_mono_ns = self.accum_start_mono_ns.unwrap_or(0);
        let source_id = self.source_id.clone().unwrap_or_default();

        let hop_ns = (self.hop_samples as i64) * 1_000_000_000 / self.sample_rate.max(1) as i64;
        let hop_ms = (self.hop_samples as i64) * 1000 / self.sample_rate.max(1) as i64;

        // Advance the accumulator by one hop, keeping the overlap for
        // the next window; stale samples beyond the hop are dropped.
        let drop_count = self.hop_samples.min(self.accum.len());
        self.accum.drain(0..drop_count);
        self.accum_start_wall_ms = Some(start_wall_ms + hop_ms);
        self.accum_start_mono_ns = Some(start_mono_ns + hop_ns);

        AnalysisWindow {
            source_id,
            start_wall_ms,
            start_mono_ns,
            duration_ms: self.window_length_ms,
            mono_samples: window_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SampleFormat;

    fn frame(wall_ms: i64, mono_ns: i64, samples: Vec<f32>) -> PcmFrame {
        PcmFrame {
            source_id: "mic:default".to_string(),
            capture_mono_ns: mono_ns,
            wall_clock_ms: wall_ms,
            sample_rate: 1000,
            channels: 1,
            sample_format: SampleFormat::F32Le,
            samples,
        }
    }

    #[tokio::test]
    async fn emits_hop_accurate_overlapping_windows() {
        // 1000 Hz, 100ms window (100 samples), 50ms hop (50 samples).
        let (mut writer, mut reader) = analysis_channel(8, 100, 50, 1000);
        writer.write(frame(0, 0, vec![1.0; 150]));

        let w1 = reader.next_window(Duration::from_millis(50)).await.unwrap();
        assert_eq!(w1.mono_samples.len(), 100);
        assert_eq!(w1.start_wall_ms, 0);

        let w2 = reader.next_window(Duration::from_millis(50)).await.unwrap();
        assert_eq!(w2.mono_samples.len(), 100);
        assert_eq!(w2.start_wall_ms, 50);
    }

    #[tokio::test]
    async fn times_out_when_starved() {
        let (_writer, mut reader) = analysis_channel(8, 100, 50, 1000);
        let result = reader.next_window(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(BufferError::Timeout)));
    }

    #[test]
    fn overflow_drops_oldest_and_counts_samples() {
        let (mut writer, _reader) = analysis_channel(2, 100, 50, 1000);
        writer.write(frame(0, 0, vec![1.0; 10]));
        writer.write(frame(10, 0, vec![1.0; 10]));
        writer.write(frame(20, 0, vec![1.0; 10]));
        assert_eq!(writer.samples_dropped(), 10);
    }
}
