//! RTSP input via an `ffmpeg` child process.
//!
//! ffmpeg is spawned with stdout set to raw signed 16-bit PCM; stdout is
//! read on a background task and chunked into `PcmFrame`s, stderr is
//! drained into a bounded ring so a crash can be logged without an
//! unbounded buffer.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::error::SourceError;
use crate::model::{PcmFrame, SampleFormat};

use super::{Source, SourceHandle};

const CHANNEL_CAPACITY: usize = 64;
const STDERR_TAIL_LINES: usize = 20;
/// 20ms of mono s16 audio at 48kHz, read off stdout per frame.
const READ_CHUNK_SAMPLES: usize = 960;
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Send SIGTERM, give ffmpeg up to `GRACEFUL_SHUTDOWN_TIMEOUT` to exit on
/// its own, then escalate to SIGKILL. Always reaps the child so it never
/// lingers as a zombie.
async fn graceful_shutdown(mut child: Child) {
    if send_sigterm(&child) {
        if tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, child.wait()).await.is_ok() {
            return;
        }
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    match child.id() {
        // SAFETY: pid is this process's own child, obtained from the
        // handle we are about to wait() on.
        Some(pid) => unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 },
        None => false,
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

pub struct RtspSource {
    id: String,
    url: String,
    transport: &'static str,
    sample_rate: u32,
}

impl RtspSource {
    pub fn new(id: String, url: String, transport: &'static str, sample_rate: u32) -> Self {
        Self { id, url, transport, sample_rate }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.args([
            "-loglevel", "warning",
            "-rtsp_transport", self.transport,
            "-i", &self.url,
            "-vn",
            "-acodec", "pcm_s16le",
            "-ac", "1",
            "-ar", &self.sample_rate.to_string(),
            "-f", "s16le",
            "-",
        ]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }
}

#[async_trait::async_trait]
impl Source for RtspSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&self, clock: Arc<dyn Clock>) -> Result<SourceHandle, SourceError> {
        let mut child = self.command().spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                SourceError::FfmpegNotFound { path: "ffmpeg".to_string() }
            } else {
                SourceError::OpenTransient { reason: err.to_string() }
            }
        })?;

        let stdout = child.stdout.take().ok_or_else(|| SourceError::OpenTransient {
            reason: "ffmpeg child has no stdout pipe".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| SourceError::OpenTransient {
            reason: "ffmpeg child has no stderr pipe".to_string(),
        })?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let shutdown = Arc::new(AtomicBool::new(false));

        let source_id = self.id.clone();
        let sample_rate = self.sample_rate;
        let stderr_tail_reader = Arc::clone(&stderr_tail);
        tokio::spawn(async move {
            drain_stderr(stderr, stderr_tail_reader).await;
        });

        let child = Arc::new(Mutex::new(Some(child)));
        let child_reader = Arc::clone(&child);
        let shutdown_reader = Arc::clone(&shutdown);
        let stderr_tail_for_exit = Arc::clone(&stderr_tail);
        tokio::spawn(async move {
            read_stdout_loop(stdout, tx, source_id, sample_rate, clock, shutdown_reader.clone()).await;
            if !shutdown_reader.load(Ordering::Relaxed) {
                let tail = stderr_tail_for_exit.lock().unwrap().iter().cloned().collect::<Vec<_>>().join("\n");
                log::warn!(target: "source", "rtsp stdout closed unexpectedly, stderr tail: {tail}");
            }
            if let Some(child) = child_reader.lock().unwrap().take() {
                graceful_shutdown(child).await;
            }
        });

        let closer_shutdown = Arc::clone(&shutdown);
        let closer = Box::new(move || {
            closer_shutdown.store(true, Ordering::SeqCst);
            if let Some(child) = child.lock().unwrap().take() {
                tokio::spawn(graceful_shutdown(child));
            }
        });

        Ok(SourceHandle::new(rx, closer))
    }
}

async fn read_stdout_loop(
    mut stdout: tokio::process::ChildStdout,
    tx: mpsc::Sender<PcmFrame>,
    source_id: String,
    sample_rate: u32,
    clock: Arc<dyn Clock>,
    shutdown: Arc<AtomicBool>,
) {
    let origin = clock.monotonic();
    let mut raw = vec![0u8; READ_CHUNK_SAMPLES * 2];

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        match stdout.read_exact(&mut raw).await {
            Ok(_) => {
                let samples = raw
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
                    .collect();
                let frame = PcmFrame {
                    source_id: source_id.clone(),
                    capture_mono_ns: clock.monotonic().duration_since(origin).as_nanos() as i64,
                    wall_clock_ms: clock.wall_clock_ms(),
                    sample_rate,
                    channels: 1,
                    sample_format: SampleFormat::S16Le,
                    samples,
                };
                if tx.send(frame).await.is_err() {
                    return;
                }
            }
            Err(_) => return,
        }
    }
}

async fn drain_stderr(stderr: tokio::process::ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::debug!(target: "source", "ffmpeg: {line}");
        let mut tail = tail.lock().unwrap();
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}
