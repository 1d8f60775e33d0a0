//! Classifier interface.
//!
//! Model inference itself is out of scope; a `Classifier` is whatever
//! wraps a concrete model (ONNX, TFLite, a remote inference service) and
//! exposes fixed-shape windows in, labeled scores out. The core neither
//! loads models nor owns labels — BirdNET TFLite is one implementation
//! among many this trait could wrap.

use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::ProcessorError;
use crate::model::{AnalysisWindow, RawPrediction};

#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    fn sample_rate(&self) -> u32;
    fn window_ms(&self) -> u32;
    fn hop_ms(&self) -> u32;
    /// Version tag attached to every `Detection` for audit trails.
    fn model_version(&self) -> &str;

    async fn classify(&self, window: &AnalysisWindow) -> Result<Vec<RawPrediction>, ProcessorError>;
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    samples: &'a [f32],
}

#[derive(Deserialize)]
struct ClassifyResponse {
    predictions: Vec<RawPrediction>,
}

/// Wraps an external classifier process speaking one JSON object per
/// line on stdin/stdout: a window's samples in, a prediction list out.
/// This is the boundary the actual model binding (BirdNET TFLite or
/// otherwise) lives behind; the core only ever talks this protocol.
pub struct ExternalProcessClassifier {
    sample_rate: u32,
    window_ms: u32,
    hop_ms: u32,
    model_version: String,
    /// Kept alive purely so the child is killed on drop; stdin/stdout
    /// are taken out at spawn time and driven through `io` instead, so
    /// stdout's `BufReader` persists across calls (re-creating it per
    /// call would silently drop any bytes buffered past the first line).
    _child: Child,
    io: Mutex<(ChildStdin, BufReader<ChildStdout>)>,
}

impl ExternalProcessClassifier {
    /// Spawns `command` (already a fully-formed launch line for the
    /// model process) and leaves it running for the classifier's whole
    /// lifetime; each `classify` call is one stdin write, one stdout
    /// line read.
    pub fn spawn(
        command: &str,
        args: &[String],
        sample_rate: u32,
        window_ms: u32,
        hop_ms: u32,
        model_version: String,
    ) -> Result<Self, ProcessorError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| ProcessorError::ClassifierInternal { reason: err.to_string() })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessorError::ClassifierInternal { reason: "classifier stdin unavailable".to_string() })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessorError::ClassifierInternal { reason: "classifier stdout unavailable".to_string() })?;

        Ok(Self {
            sample_rate,
            window_ms,
            hop_ms,
            model_version,
            _child: child,
            io: Mutex::new((stdin, BufReader::new(stdout))),
        })
    }
}

#[async_trait::async_trait]
impl Classifier for ExternalProcessClassifier {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    fn window_ms(&self) -> u32 {
        self.window_ms
    }
    fn hop_ms(&self) -> u32 {
        self.hop_ms
    }
    fn model_version(&self) -> &str {
        &self.model_version
    }

    async fn classify(&self, window: &AnalysisWindow) -> Result<Vec<RawPrediction>, ProcessorError> {
        let mut request = serde_json::to_vec(&ClassifyRequest { samples: &window.mono_samples })
            .map_err(|err| ProcessorError::ClassifierInternal { reason: err.to_string() })?;
        request.push(b'\n');

        let mut io = self.io.lock().await;
        let (stdin, stdout) = &mut *io;
        stdin
            .write_all(&request)
            .await
            .map_err(|err| ProcessorError::ClassifierInternal { reason: err.to_string() })?;

        let mut line = String::new();
        stdout
            .read_line(&mut line)
            .await
            .map_err(|err| ProcessorError::ClassifierInternal { reason: err.to_string() })?;

        let response: ClassifyResponse = serde_json::from_str(line.trim())
            .map_err(|err| ProcessorError::ClassifierInternal { reason: err.to_string() })?;
        Ok(response.predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_reports_a_processor_error_when_the_command_is_missing() {
        let result = ExternalProcessClassifier::spawn(
            "definitely-not-a-real-classifier-binary",
            &[],
            48_000,
            3000,
            1500,
            "test-v1".to_string(),
        );
        assert!(matches!(result, Err(ProcessorError::ClassifierInternal { .. })));
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use std::sync::Mutex;

    /// Deterministic classifier for tests: always returns a fixed set of
    /// predictions, regardless of window content.
    pub struct StubClassifier {
        pub predictions: Mutex<Vec<RawPrediction>>,
        pub sample_rate: u32,
        pub window_ms: u32,
        pub hop_ms: u32,
    }

    impl StubClassifier {
        pub fn new(predictions: Vec<RawPrediction>) -> Self {
            Self { predictions: Mutex::new(predictions), sample_rate: 48_000, window_ms: 3000, hop_ms: 1500 }
        }
    }

    #[async_trait::async_trait]
    impl Classifier for StubClassifier {
        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
        fn window_ms(&self) -> u32 {
            self.window_ms
        }
        fn hop_ms(&self) -> u32 {
            self.hop_ms
        }
        fn model_version(&self) -> &str {
            "stub-v1"
        }

        async fn classify(&self, _window: &AnalysisWindow) -> Result<Vec<RawPrediction>, ProcessorError> {
            Ok(self.predictions.lock().unwrap().clone())
        }
    }
}
