//! Background conversion of a finished elementary stream into a container file.
//!
//! Each stop spawns its own task so the worker loop keeps serving preview
//! frames while the external tool runs.

use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;

use super::errors::RemuxError;
use super::types::{file_name, Event, PREVIEW_RUNNING};

/// Lines of tool diagnostics kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// One elementary-stream-to-container conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemuxJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub frame_rate: u32,
}

/// Performs a single stream-copy remux. Blocking.
pub trait Remuxer: Send + Sync {
    fn remux(&self, job: &RemuxJob) -> Result<(), RemuxError>;
}

impl<F> Remuxer for F
where
    F: Fn(&RemuxJob) -> Result<(), RemuxError> + Send + Sync,
{
    fn remux(&self, job: &RemuxJob) -> Result<(), RemuxError> {
        self(job)
    }
}

/// Runs `ffmpeg` (or a compatible tool) with stream copy and fast-start.
#[derive(Debug, Clone)]
pub struct FfmpegRemuxer {
    program: PathBuf,
}

impl Default for FfmpegRemuxer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegRemuxer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Verify the tool can be launched at all.
    pub fn check_available(&self) -> Result<(), RemuxError> {
        Command::new(&self.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|_| RemuxError::ToolNotFound(self.program.display().to_string()))?;
        Ok(())
    }

    pub fn build_args(job: &RemuxJob) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-r".to_string(),
            job.frame_rate.to_string(),
            "-i".to_string(),
            job.input.to_string_lossy().into_owned(),
            "-c".to_string(),
            "copy".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            job.output.to_string_lossy().into_owned(),
        ]
    }
}

impl Remuxer for FfmpegRemuxer {
    fn remux(&self, job: &RemuxJob) -> Result<(), RemuxError> {
        tracing::debug!(target: "remux", "[REMUX] {} {:?}", self.program.display(), Self::build_args(job));

        let output = Command::new(&self.program)
            .args(Self::build_args(job))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    RemuxError::ToolNotFound(self.program.display().to_string())
                }
                _ => RemuxError::Launch(e.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RemuxError::Failed {
                status: describe_status(output.status),
                stderr: tail_lines(&stderr, STDERR_TAIL_LINES),
            });
        }

        Ok(())
    }
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "signal".to_string(),
    }
}

fn tail_lines(text: &str, max: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max);
    lines[start..].join("\n")
}

/// Start a detached thread that runs `job` and reports through `events`.
pub fn spawn_remux_task(
    label: &str,
    job: RemuxJob,
    remuxer: Arc<dyn Remuxer>,
    events: Sender<Event>,
) -> std::io::Result<JoinHandle<()>> {
    let label = label.to_string();
    std::thread::Builder::new()
        .name(format!("remux-{label}"))
        .spawn(move || run_remux(&label, &job, remuxer.as_ref(), &events))
}

/// Run one remux and post its outcome. Always ends with the idle pair
/// `Status(PREVIEW_RUNNING)`, `Ready`.
pub fn run_remux(label: &str, job: &RemuxJob, remuxer: &dyn Remuxer, events: &Sender<Event>) {
    let container = file_name(&job.output);
    tracing::info!(target: "remux", "[REMUX {}] {} -> {}", label, job.input.display(), container);
    let _ = events.send(Event::Status(format!("saving {container}")));

    match remuxer.remux(job) {
        Ok(()) => {
            if let Err(e) = std::fs::remove_file(&job.input) {
                tracing::debug!(target: "remux", "[REMUX {}] Could not remove {}: {}", label, job.input.display(), e);
            }
            tracing::info!(target: "remux", "[REMUX {}] Saved {}", label, job.output.display());
            let _ = events.send(Event::Saved(job.output.clone()));
        }
        Err(e) => {
            tracing::error!(target: "remux", "[REMUX {}] Failed: {}", label, e);
            let _ = events.send(Event::Error(format!("remux failed: {e}")));
        }
    }

    let _ = events.send(Event::Status(PREVIEW_RUNNING.to_string()));
    let _ = events.send(Event::Ready);
}
