// FFmpegHandler Service
// Launches time-bounded FFmpeg test-pattern streams and supervises each process

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::models::{
    redact_line, EncodingProfile, OutputBuffer, Settings, StreamRecord, StreamSnapshot, StreamState,
    StreamTarget,
};
use crate::services::{StreamControlError, StreamRegistry};

// Windows: Hide console windows for spawned processes
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// How long output readers may keep draining after the process is gone
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Bytes kept per output line; the rest of an overlong line is discarded while reading
const MAX_LINE_BYTES: usize = 2048;

/// Synchronous launch failures, reported to the caller
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("No stream key configured (set YOUTUBE_STREAM_KEY or streamKey in settings.json)")]
    MissingStreamKey,

    #[error("Invalid stream target: {0}")]
    InvalidTarget(String),

    #[error("Invalid encoding profile: {0}")]
    InvalidProfile(String),

    #[error("FFmpeg binary not found: {0}")]
    EncoderNotFound(String),

    #[error("Failed to spawn FFmpeg: {0}")]
    Spawn(#[from] std::io::Error),
}

/// How a supervised process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited on its own with the given code (None if killed by a signal)
    Exited(Option<i32>),
    /// Terminated because the duration limit elapsed
    TimedOut(Option<i32>),
    /// Terminated on a stop request
    Stopped(Option<i32>),
    /// Waiting on the process failed
    Failed(String),
}

impl ExitOutcome {
    pub fn state(&self) -> StreamState {
        match self {
            Self::Exited(_) => StreamState::Exited,
            Self::TimedOut(_) => StreamState::Terminated,
            Self::Stopped(_) => StreamState::Stopped,
            Self::Failed(_) => StreamState::Failed,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited(code) | Self::TimedOut(code) | Self::Stopped(code) => *code,
            Self::Failed(_) => None,
        }
    }
}

/// Result of a successful launch
#[derive(Debug)]
pub struct LaunchedStream {
    pub id: String,
    pub target: StreamTarget,
    pub pid: Option<u32>,
}

/// Manages FFmpeg test-pattern streams
pub struct FFmpegHandler {
    ffmpeg_path: String,
    profile: EncodingProfile,
    ingest_base_url: String,
    stream_key: Option<String>,
    log_buffer_lines: usize,
    /// Time FFmpeg gets to quit after `q` before it is killed
    termination_grace: Duration,
    registry: StreamRegistry,
}

impl FFmpegHandler {
    pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(2);

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            ffmpeg_path: settings.ffmpeg_path.clone(),
            profile: settings.profile.clone(),
            ingest_base_url: settings.ingest_base_url.clone(),
            stream_key: settings.stream_key().map(str::to_string),
            log_buffer_lines: settings.log_buffer_lines,
            termination_grace: Self::DEFAULT_TERMINATION_GRACE,
            registry: StreamRegistry::new(settings.retained_streams),
        }
    }

    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }

    pub fn profile(&self) -> &EncodingProfile {
        &self.profile
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Build the ingest target from the configured key. Fails closed when no key is set.
    pub fn stream_target(&self) -> Result<StreamTarget, LaunchError> {
        let key = self
            .stream_key
            .as_deref()
            .ok_or(LaunchError::MissingStreamKey)?;
        StreamTarget::new(&self.ingest_base_url, key).map_err(LaunchError::InvalidTarget)
    }

    /// Resolve the FFmpeg binary: paths are used as given, bare names are looked up on PATH
    pub fn resolve_ffmpeg(&self) -> Result<PathBuf, LaunchError> {
        let configured = self.ffmpeg_path.trim();
        let path = Path::new(configured);

        if path.is_absolute() || path.components().count() > 1 {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            return Err(LaunchError::EncoderNotFound(format!("{configured} does not exist")));
        }

        which::which(configured)
            .map_err(|e| LaunchError::EncoderNotFound(format!("{configured}: {e}")))
    }

    /// Spawn FFmpeg and return immediately; a background task supervises the process
    pub fn start(&self) -> Result<LaunchedStream, LaunchError> {
        let target = self.stream_target()?;
        self.profile.validate().map_err(LaunchError::InvalidProfile)?;
        let ffmpeg = self.resolve_ffmpeg()?;

        let args = self.profile.build_args(target.url());
        let sanitized: Vec<String> = args.iter().map(|arg| redact_line(arg)).collect();
        log::info!(
            "Starting FFmpeg test stream: {} {}",
            ffmpeg.display(),
            sanitized.join(" ")
        );

        let mut cmd = Command::new(&ffmpeg);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);
        let mut child = cmd.spawn()?;

        let id = uuid::Uuid::new_v4().to_string();
        let pid = child.id();
        let output = OutputBuffer::new(self.log_buffer_lines);

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_output_reader(stdout, id.clone(), "stdout", output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_output_reader(stderr, id.clone(), "stderr", output.clone()));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        self.registry.insert(
            StreamRecord::running(id.clone(), target.redacted(), pid, output.clone()),
            stop_tx,
        );

        let registry = self.registry.clone();
        let timeout = self.profile.max_duration();
        let grace = self.termination_grace;
        let stream_id = id.clone();
        let supervisor = tokio::spawn(async move {
            let outcome = supervise(child, timeout, grace, stop_rx).await;
            for reader in readers {
                let _ = tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await;
            }
            log_outcome(&stream_id, &outcome, &output);
            registry.finish(&stream_id, outcome.state(), outcome.exit_code());
        });
        self.registry.attach_supervisor(&id, supervisor);

        log::info!(
            "[FFmpeg:{id}] started (pid {}) for {}",
            pid.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string()),
            self.profile.duration_label()
        );

        Ok(LaunchedStream { id, target, pid })
    }

    /// Ask a running stream to stop
    pub fn stop(&self, id: &str) -> Result<StreamSnapshot, StreamControlError> {
        let snapshot = self.registry.request_stop(id)?;
        log::info!("[FFmpeg:{id}] stop requested");
        Ok(snapshot)
    }

    /// Stop every running stream and wait for the supervisors to report back
    pub async fn stop_all(&self) {
        let ids = self.registry.running_ids();
        if ids.is_empty() {
            return;
        }

        log::info!("Stopping {} running stream(s)", ids.len());
        for id in &ids {
            let _ = self.registry.request_stop(id);
        }

        let deadline = tokio::time::Instant::now()
            + self.termination_grace
            + READER_DRAIN_TIMEOUT
            + Duration::from_secs(1);
        for supervisor in self.registry.take_supervisors() {
            if tokio::time::timeout_at(deadline, supervisor).await.is_err() {
                break;
            }
        }

        let remaining = self.registry.running_count();
        if remaining > 0 {
            log::warn!("{remaining} stream(s) still running after stop request");
        }
    }
}

enum Wake {
    Exited(std::io::Result<ExitStatus>),
    Timeout,
    StopRequested,
}

/// Wait for the process to exit, the timeout to fire, or a stop request.
/// Termination happens at most once, and never after the process exited on its own.
pub async fn supervise(
    mut child: Child,
    timeout: Duration,
    grace: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) -> ExitOutcome {
    // Held here so `wait()` does not close it; FFmpeg reads `q` from stdin to quit cleanly
    let stdin = child.stdin.take();

    let wake = tokio::select! {
        status = child.wait() => Wake::Exited(status),
        _ = tokio::time::sleep(timeout) => Wake::Timeout,
        Ok(()) = &mut stop_rx => Wake::StopRequested,
    };

    match wake {
        Wake::Exited(Ok(status)) => ExitOutcome::Exited(status.code()),
        Wake::Exited(Err(e)) => ExitOutcome::Failed(e.to_string()),
        Wake::Timeout => ExitOutcome::TimedOut(terminate(&mut child, stdin, grace).await),
        Wake::StopRequested => ExitOutcome::Stopped(terminate(&mut child, stdin, grace).await),
    }
}

/// Send `q` and close stdin, then kill the process if it is still alive after `grace`
async fn terminate(child: &mut Child, stdin: Option<ChildStdin>, grace: Duration) -> Option<i32> {
    if let Some(mut stdin) = stdin {
        let _ = stdin.write_all(b"q\n").await;
        let _ = stdin.flush().await;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => return status.code(),
        Ok(Err(e)) => log::warn!("[FFmpeg] wait failed during termination: {e}"),
        Err(_) => log::debug!("[FFmpeg] did not quit within {grace:?}, killing"),
    }

    if let Err(e) = child.kill().await {
        log::warn!("[FFmpeg] kill failed: {e}");
    }
    child.wait().await.ok().and_then(|status| status.code())
}

fn spawn_output_reader<R>(
    reader: R,
    stream_id: String,
    channel: &'static str,
    output: OutputBuffer,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        read_output_lines(reader, |line| {
            let sanitized = redact_line(&line);
            log::debug!("[FFmpeg:{stream_id}:{channel}] {sanitized}");
            output.push(&sanitized);
        })
        .await;
    })
}

/// Read until EOF, calling `on_line` for each non-empty line.
/// Lines end at `\n` or `\r` (FFmpeg progress updates), are capped at `MAX_LINE_BYTES`
/// and decoded lossily, so invalid UTF-8 never stops the pipe from being drained.
async fn read_output_lines<R, F>(mut reader: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut chunk = [0u8; 4096];
    let mut line: Vec<u8> = Vec::with_capacity(256);

    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("[FFmpeg] output read failed: {e}");
                break;
            }
        };

        for &byte in &chunk[..read] {
            if byte == b'\n' || byte == b'\r' {
                if !line.is_empty() {
                    on_line(String::from_utf8_lossy(&line).into_owned());
                    line.clear();
                }
            } else if line.len() < MAX_LINE_BYTES {
                line.push(byte);
            }
        }
    }

    if !line.is_empty() {
        on_line(String::from_utf8_lossy(&line).into_owned());
    }
}

fn log_outcome(stream_id: &str, outcome: &ExitOutcome, output: &OutputBuffer) {
    match outcome {
        ExitOutcome::Exited(Some(0)) => {
            log::info!("[FFmpeg:{stream_id}] process exited with code 0");
        }
        ExitOutcome::Exited(code) => {
            let code = code.map(|c| c.to_string()).unwrap_or_else(|| "none (signal)".to_string());
            log::warn!("[FFmpeg:{stream_id}] process exited with code {code}");
            for line in output.tail(10) {
                log::warn!("[FFmpeg:{stream_id}]   {line}");
            }
        }
        ExitOutcome::TimedOut(_) => {
            log::info!("[FFmpeg:{stream_id}] process terminated due to timeout");
        }
        ExitOutcome::Stopped(_) => {
            log::info!("[FFmpeg:{stream_id}] process stopped on request");
        }
        ExitOutcome::Failed(error) => {
            log::error!("[FFmpeg:{stream_id}] failed waiting on process: {error}");
        }
    }
}
