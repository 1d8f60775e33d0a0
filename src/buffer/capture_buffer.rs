//! Single-writer/many-reader time-addressable ring used for clip
//! extraction.
//!
//! Readers ask for `[start_wall_ms, end_wall_ms)` and get back a copy of
//! the matching samples; the lock is only ever held long enough to
//! snapshot the relevant chunks, never across the copy itself... the
//! copy happens while holding the lock since chunks are not `Clone`-free
//! to slice across without it, but the lock is never held during I/O or
//! across an await point.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::BufferError;

struct Chunk {
    start_wall_ms: i64,
    sample_rate: u32,
    samples: Vec<f32>,
}

impl Chunk {
    fn end_wall_ms(&self) -> i64 {
        self.start_wall_ms + (self.samples.len() as i64 * 1000 / self.sample_rate.max(1) as i64)
    }
}

/// Retains up to `retention_sec` of audio per source, addressable by
/// wall-clock range for pre/post-roll clip extraction.
pub struct CaptureBuffer {
    retention_ms: i64,
    inner: Mutex<VecDeque<Chunk>>,
}

impl CaptureBuffer {
    pub fn new(retention_sec: u32) -> Self {
        Self {
            retention_ms: retention_sec as i64 * 1000,
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a chunk of mono audio starting at `start_wall_ms`, then
    /// evict anything older than the retention window.
    pub fn write(&self, start_wall_ms: i64, sample_rate: u32, samples: Vec<f32>) {
        let mut inner = self.inner.lock().unwrap();
        inner.push_back(Chunk { start_wall_ms, sample_rate, samples });

        let newest_end = inner.back().map(|c| c.end_wall_ms()).unwrap_or(start_wall_ms);
        let cutoff = newest_end - self.retention_ms;
        while let Some(front) = inner.front() {
            if front.end_wall_ms() < cutoff {
                inner.pop_front();
            } else {
                break;
            }
        }
    }

    /// Extract `[start_wall_ms, end_wall_ms)` as mono f32 samples at the
    /// sample rate chunks were written at. Fails if any part of the
    /// range has already been evicted or never arrived.
    pub fn extract(&self, start_wall_ms: i64, end_wall_ms: i64) -> Result<(u32, Vec<f32>), BufferError> {
        let inner = self.inner.lock().unwrap();
        if inner.is_empty() {
            return Err(BufferError::RangeNotCovered { start_wall_ms, end_wall_ms });
        }
        let sample_rate = inner.front().unwrap().sample_rate;

        let covered_start = inner.front().unwrap().start_wall_ms;
        let covered_end = inner.back().unwrap().end_wall_ms();
        if start_wall_ms < covered_start || end_wall_ms > covered_end {
            return Err(BufferError::RangeNotCovered { start_wall_ms, end_wall_ms });
        }

        let mut out = Vec::new();
        for chunk in inner.iter() {
            if chunk.end_wall_ms() <= start_wall_ms || chunk.start_wall_ms >= end_wall_ms {
                continue;
            }
            let samples_per_ms = chunk.sample_rate as i64 / 1000;
            let clip_start = (start_wall_ms.max(chunk.start_wall_ms) - chunk.start_wall_ms).max(0) as usize
                * samples_per_ms.max(1) as usize;
            let clip_end_ms = end_wall_ms.min(chunk.end_wall_ms());
            let clip_end = (clip_end_ms - chunk.start_wall_ms).max(0) as usize * samples_per_ms.max(1) as usize;
            let clip_end = clip_end.min(chunk.samples.len());
            if clip_start < clip_end {
                out.extend_from_slice(&chunk.samples[clip_start..clip_end]);
            }
        }
        Ok((sample_rate, out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_range_spanning_two_chunks() {
        let buf = CaptureBuffer::new(60);
        buf.write(0, 1000, vec![1.0; 1000]);
        buf.write(1000, 1000, vec![2.0; 1000]);

        let (rate, samples) = buf.extract(500, 1500).unwrap();
        assert_eq!(rate, 1000);
        assert_eq!(samples.len(), 1000);
        assert!(samples[..500].iter().all(|&s| s == 1.0));
        assert!(samples[500..].iter().all(|&s| s == 2.0));
    }

    #[test]
    fn rejects_range_outside_retention() {
        let buf = CaptureBuffer::new(1);
        buf.write(0, 1000, vec![0.0; 1000]);
        buf.write(5000, 1000, vec![0.0; 1000]);
        // First chunk should have been evicted by the 1s retention window.
        assert!(matches!(buf.extract(0, 500), Err(BufferError::RangeNotCovered { .. })));
    }

    #[test]
    fn rejects_empty_buffer() {
        let buf = CaptureBuffer::new(60);
        assert!(matches!(buf.extract(0, 1000), Err(BufferError::RangeNotCovered { .. })));
    }
}
