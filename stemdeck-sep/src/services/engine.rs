//! Inference engine adapter
//!
//! The separation models run outside this service. `SeparationEngine` is the
//! seam: run one module against one input file, report progress through a
//! non-blocking sink, return the produced files.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Engine failure for one module
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

/// What to run
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub module_id: String,
    pub model: String,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Engine stem key -> output file base name
    pub output_names: BTreeMap<String, String>,
}

/// What was produced: engine stem key -> filename inside `output_dir`
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    pub files: BTreeMap<String, String>,
}

/// Progress reported by an engine while it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineProgress {
    /// Model checkpoint is being fetched
    ModelDownloading { percent: u8 },
    /// Model is loaded; separation is about to start
    ModelReady,
    /// Separation progress
    Processing { percent: u8 },
}

/// Non-blocking progress reporter handed to engines
///
/// Backed by a bounded channel. When the consumer falls behind, updates are
/// dropped rather than stalling the engine.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<EngineProgress>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<EngineProgress>) -> Self {
        Self { tx }
    }

    pub fn report(&self, progress: EngineProgress) {
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.tx.try_send(progress) {
            debug!(?dropped, "Progress buffer full, update dropped");
        }
    }
}

/// Runs separation modules
#[async_trait]
pub trait SeparationEngine: Send + Sync {
    async fn run_module(
        &self,
        request: EngineRequest,
        progress: ProgressSink,
    ) -> Result<EngineOutput, EngineError>;
}

/// Percent value of the first `NN%` marker in a line
///
/// Digits (and an optional fraction) directly before the first '%' are read;
/// the fraction is truncated and the result capped at 100.
pub fn parse_percent(line: &str) -> Option<u8> {
    let head = &line[..line.find('%')?];
    // Digits and dots are single-byte, so the char count is the byte length
    let digits = head
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .count();
    let number = &head[head.len() - digits..];
    let whole = number.split('.').next().unwrap_or("");
    whole.parse::<u32>().ok().map(|v| v.min(100) as u8)
}

/// Tracks engine output lines and turns them into progress
#[derive(Debug, Default)]
struct LineClassifier {
    downloading: bool,
    last: Option<EngineProgress>,
}

impl LineClassifier {
    fn classify(&mut self, line: &str) -> Vec<EngineProgress> {
        let Some(percent) = parse_percent(line) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        if line.to_ascii_lowercase().contains("download") {
            self.downloading = true;
            events.push(EngineProgress::ModelDownloading { percent });
        } else {
            if self.downloading {
                self.downloading = false;
                events.push(EngineProgress::ModelReady);
            }
            events.push(EngineProgress::Processing { percent });
        }

        // Progress bars redraw the same value many times
        events.retain(|e| Some(*e) != self.last);
        if let Some(last) = events.last() {
            self.last = Some(*last);
        }
        events
    }
}

/// `SeparationEngine` backed by the separator command-line tool
///
/// Invokes `<command> <input> --model_filename <model> --output_dir <dir>
/// --output_format <FMT> --custom_output_names <json>`; progress is read from
/// the tool's console output.
pub struct CommandEngine {
    command: String,
    output_format: String,
    model_dir: Option<PathBuf>,
}

impl CommandEngine {
    pub fn new(command: impl Into<String>, output_format: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            output_format: output_format.into().to_ascii_lowercase(),
            model_dir: None,
        }
    }

    pub fn with_model_dir(mut self, model_dir: Option<PathBuf>) -> Self {
        self.model_dir = model_dir;
        self
    }

    fn build_command(&self, request: &EngineRequest) -> Result<Command, EngineError> {
        let names = serde_json::to_string(&request.output_names)
            .map_err(|e| EngineError(format!("Invalid output names: {}", e)))?;

        let mut cmd = Command::new(&self.command);
        cmd.arg(&request.input)
            .arg("--model_filename")
            .arg(&request.model)
            .arg("--output_dir")
            .arg(&request.output_dir)
            .arg("--output_format")
            .arg(self.output_format.to_ascii_uppercase())
            .arg("--custom_output_names")
            .arg(names);
        if let Some(dir) = &self.model_dir {
            cmd.arg("--model_file_dir").arg(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(cmd)
    }
}

/// Read a stream, splitting on `\r` and `\n`, reporting progress per line
async fn scan_output<R: AsyncRead + Unpin>(
    mut reader: R,
    classifier: Arc<Mutex<LineClassifier>>,
    progress: ProgressSink,
) -> Option<String> {
    let mut chunk = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    let mut last_line = None;

    let mut handle_line = |bytes: &[u8]| {
        let line = String::from_utf8_lossy(bytes);
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let events = classifier
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .classify(line);
        for event in events {
            progress.report(event);
        }
        last_line = Some(line.to_string());
    };

    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Engine output read failed: {}", e);
                break;
            }
        };
        for &byte in &chunk[..read] {
            if byte == b'\r' || byte == b'\n' {
                handle_line(&pending);
                pending.clear();
            } else {
                pending.push(byte);
            }
        }
    }
    handle_line(&pending);
    last_line
}

#[async_trait]
impl SeparationEngine for CommandEngine {
    async fn run_module(
        &self,
        request: EngineRequest,
        progress: ProgressSink,
    ) -> Result<EngineOutput, EngineError> {
        info!(
            module = %request.module_id,
            model = %request.model,
            input = %request.input.display(),
            "Starting separation"
        );

        let mut child = self
            .build_command(&request)?
            .spawn()
            .map_err(|e| EngineError(format!("Failed to start {}: {}", self.command, e)))?;

        let classifier = Arc::new(Mutex::new(LineClassifier::default()));
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let out_task = stdout.map(|s| tokio::spawn(scan_output(s, classifier.clone(), progress.clone())));
        let err_task = stderr.map(|s| tokio::spawn(scan_output(s, classifier.clone(), progress.clone())));

        let status = child
            .wait()
            .await
            .map_err(|e| EngineError(format!("Failed to wait for {}: {}", self.command, e)))?;

        let mut last_lines = Vec::new();
        for task in [err_task, out_task].into_iter().flatten() {
            if let Ok(Some(line)) = task.await {
                last_lines.push(line);
            }
        }

        if !status.success() {
            let detail = last_lines.first().cloned().unwrap_or_default();
            return Err(EngineError(format!(
                "Separation failed for {} ({}): {}",
                request.module_id, status, detail
            )));
        }

        let mut output = EngineOutput::default();
        for (key, base) in &request.output_names {
            let filename = format!("{}.{}", base, self.output_format);
            if request.output_dir.join(&filename).exists() {
                output.files.insert(key.clone(), filename);
            } else {
                warn!(module = %request.module_id, file = %filename, "Expected output file not found");
            }
        }

        if output.files.is_empty() {
            return Err(EngineError(format!(
                "Separation for {} produced no output files",
                request.module_id
            )));
        }

        info!(
            module = %request.module_id,
            outputs = ?output.files.keys().collect::<Vec<_>>(),
            "Separation complete"
        );
        Ok(output)
    }
}
