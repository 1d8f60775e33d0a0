//! Local soundcard input via cpal.
//!
//! cpal's `Stream` is not `Send`, so the device and stream are owned by
//! a dedicated OS thread; samples cross into the async world over a
//! bounded `tokio::sync::mpsc` channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat as CpalSampleFormat;
use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::error::SourceError;
use crate::model::{PcmFrame, SampleFormat};

use super::{Source, SourceHandle};

const CHANNEL_CAPACITY: usize = 64;

pub struct SoundcardSource {
    id: String,
    device_name: Option<String>,
}

impl SoundcardSource {
    /// `device_name` of `None` (or `"default"`) selects the host's
    /// default input device.
    pub fn new(id: String, device_name: Option<String>) -> Self {
        Self { id, device_name }
    }
}

#[async_trait::async_trait]
impl Source for SoundcardSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&self, clock: Arc<dyn Clock>) -> Result<SourceHandle, SourceError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), SourceError>>();

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = Arc::clone(&shutdown);
        let source_id = self.id.clone();
        let device_name = self.device_name.clone();

        let handle = thread::spawn(move || {
            run_capture_thread(source_id, device_name, tx, ready_tx, shutdown_thread, clock);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(SourceError::OpenTransient {
                    reason: "capture thread exited before signaling readiness".to_string(),
                })
            }
        }

        let closer = Box::new(move || {
            shutdown.store(true, Ordering::SeqCst);
            let _ = handle.join();
        });

        Ok(SourceHandle::new(rx, closer))
    }
}

fn run_capture_thread(
    source_id: String,
    device_name: Option<String>,
    tx: mpsc::Sender<PcmFrame>,
    ready_tx: std::sync::mpsc::Sender<Result<(), SourceError>>,
    shutdown: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
) {
    let host = cpal::default_host();

    let device = match device_name.as_deref().filter(|n| *n != "default") {
        Some(name) => host
            .input_devices()
            .ok()
            .and_then(|mut devices| devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))),
        None => host.default_input_device(),
    };

    let device = match device {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err(SourceError::OpenPermanent {
                reason: "no matching input device available".to_string(),
            }));
            return;
        }
    };

    let supported_config = match device.default_input_config() {
        Ok(c) => c,
        Err(err) => {
            let _ = ready_tx.send(Err(SourceError::OpenTransient {
                reason: format!("failed to read default input config: {err}"),
            }));
            return;
        }
    };

    let sample_rate = supported_config.sample_rate().0;
    let channels = supported_config.channels() as usize;
    let cpal_format = supported_config.sample_format();
    let config: cpal::StreamConfig = supported_config.into();

    // Origin for this source's monotonic timestamps; only ever compared
    // against later readings from the same clock within this stream.
    let origin = clock.monotonic();

    let err_fn = |err| log::error!(target: "source", "cpal stream error: {err}");

    let stream = match cpal_format {
        CpalSampleFormat::F32 => {
            let tx = tx.clone();
            let source_id = source_id.clone();
            let clock = Arc::clone(&clock);
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix_f32(data, channels);
                    let _ = tx.try_send(frame(&source_id, &clock, origin, sample_rate, mono));
                },
                err_fn,
                None,
            )
        }
        CpalSampleFormat::I16 => {
            let tx = tx.clone();
            let source_id = source_id.clone();
            let clock = Arc::clone(&clock);
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let mono = downmix_i16(data, channels);
                    let _ = tx.try_send(frame(&source_id, &clock, origin, sample_rate, mono));
                },
                err_fn,
                None,
            )
        }
        other => {
            let _ = ready_tx.send(Err(SourceError::OpenPermanent {
                reason: format!("unsupported sample format: {other:?}"),
            }));
            return;
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(err) => {
            let _ = ready_tx.send(Err(SourceError::OpenTransient {
                reason: format!("failed to build input stream: {err}"),
            }));
            return;
        }
    };

    if let Err(err) = stream.play() {
        let _ = ready_tx.send(Err(SourceError::OpenTransient {
            reason: format!("failed to start stream: {err}"),
        }));
        return;
    }

    log::info!(target: "source", "soundcard source {source_id} opened at {sample_rate} Hz, {channels} ch");
    let _ = ready_tx.send(Ok(()));

    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(std::time::Duration::from_millis(50));
    }
    log::info!(target: "source", "soundcard source {source_id} closing");
}

fn frame(
    source_id: &str,
    clock: &Arc<dyn Clock>,
    origin: std::time::Instant,
    sample_rate: u32,
    mono: Vec<f32>,
) -> PcmFrame {
    PcmFrame {
        source_id: source_id.to_string(),
        capture_mono_ns: clock.monotonic().duration_since(origin).as_nanos() as i64,
        wall_clock_ms: clock.wall_clock_ms(),
        sample_rate,
        channels: 1,
        sample_format: SampleFormat::F32Le,
        samples: mono,
    }
}

fn downmix_f32(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn downmix_i16(data: &[i16], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.iter().map(|&s| s as f32 / 32768.0).collect();
    }
    data.chunks(channels)
        .map(|chunk| {
            let sum: f32 = chunk.iter().map(|&s| s as f32 / 32768.0).sum();
            sum / channels as f32
        })
        .collect()
}
