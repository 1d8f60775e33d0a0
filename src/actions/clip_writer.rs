//! Writes staged clip audio to disk as WAV.
//!
//! Clip jobs arrive off the Processor's side channel (not the EventBus —
//! raw PCM has no business riding alongside MQTT/BirdWeather JSON
//! payloads). The path was already computed deterministically by the
//! Processor; this action only has to make the bytes land there without
//! clobbering an existing file.

use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{log_action_error, ActionError};
use crate::processor::ClipJob;

pub struct ClipWriter {
    base_dir: PathBuf,
}

impl ClipWriter {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    /// Drive the clip-writing loop until `jobs` closes or `cancel` fires.
    pub async fn run(&self, mut jobs: mpsc::Receiver<ClipJob>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                job = jobs.recv() => {
                    match job {
                        Some(job) => {
                            if let Err(err) = self.write_job(&job) {
                                log_action_error(&err, "clip_writer");
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    }

    fn write_job(&self, job: &ClipJob) -> Result<PathBuf, ActionError> {
        let relative = Path::new(&job.clip_path);
        let path = if relative.is_absolute() { relative.to_path_buf() } else { self.base_dir.join(relative) };
        let path = unique_path(&path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| ActionError::ClipWriteFailed { reason: err.to_string() })?;
        }

        let spec = WavSpec {
            channels: 1,
            sample_rate: job.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).map_err(|err| ActionError::ClipWriteFailed { reason: err.to_string() })?;
        for &sample in &job.samples {
            let clamped = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(clamped).map_err(|err| ActionError::ClipWriteFailed { reason: err.to_string() })?;
        }
        writer.finalize().map_err(|err| ActionError::ClipWriteFailed { reason: err.to_string() })?;
        Ok(path)
    }
}

/// Appends `-1`, `-2`, ... before the extension until the path doesn't
/// already exist, per the "existing files are not overwritten" contract.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("clip");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("wav");
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    let mut n = 1;
    loop {
        let candidate = parent.join(format!("{stem}-{n}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_path_is_identity_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        assert_eq!(unique_path(&path), path);
    }

    #[test]
    fn unique_path_suffixes_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, b"existing").unwrap();
        let next = unique_path(&path);
        assert_eq!(next, dir.path().join("clip-1.wav"));

        std::fs::write(&next, b"existing too").unwrap();
        let next2 = unique_path(&path);
        assert_eq!(next2, dir.path().join("clip-2.wav"));
    }

    #[tokio::test]
    async fn writes_a_valid_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ClipWriter::new(dir.path());
        let job = ClipJob {
            detection_id: "d1".to_string(),
            clip_path: "2026-01-01/turmer/clip.wav".to_string(),
            sample_rate: 8000,
            samples: vec![0.0, 0.5, -0.5, 1.0, -1.0],
        };
        let written = writer.write_job(&job).unwrap();
        assert!(written.exists());

        let reader = hound::WavReader::open(&written).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().channels, 1);
    }
}
