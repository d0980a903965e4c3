//! Backend driving the `rpicam-vid` / `libcamera-vid` command line tools.
//!
//! The camera can only be held by one process at a time, so the MJPEG preview
//! process is stopped while the H.264 recorder runs and restarted afterwards
//! by the worker.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use image::ImageFormat;

use super::process::{find_tool, wait_with_deadline, ProcessGuard, StderrTail, StopOutcome, StopTimeouts};
use super::{Backend, FrameSource, StreamConfig};
use crate::session::errors::{CaptureError, DeviceError};
use crate::session::frame::Frame;

pub const VID_TOOLS: [&str; 2] = ["rpicam-vid", "libcamera-vid"];

/// How long a freshly spawned tool gets to fail before we call it started.
const STARTUP_PROBE: Duration = Duration::from_millis(300);
const STDERR_LINES: usize = 20;
const READ_CHUNK: usize = 64 * 1024;
/// Drop unparseable input beyond this.
const MAX_PENDING_BYTES: usize = 8 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// A camera entry from `--list-cameras`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedCamera {
    pub index: u32,
    pub sensor: String,
}

#[derive(Debug, Clone)]
pub struct RpicamBackend {
    tool: PathBuf,
    timeouts: StopTimeouts,
}

impl RpicamBackend {
    /// Locate `rpicam-vid`, falling back to the older `libcamera-vid`.
    pub fn discover(timeouts: StopTimeouts) -> Result<Self, DeviceError> {
        let tool = find_tool(&VID_TOOLS).ok_or_else(|| DeviceError::ToolNotFound(VID_TOOLS.join(", ")))?;
        tracing::info!(target: "camera", "[RPICAM] Using {}", tool.display());
        Ok(Self::with_tool(tool, timeouts))
    }

    pub fn with_tool(tool: impl Into<PathBuf>, timeouts: StopTimeouts) -> Self {
        Self {
            tool: tool.into(),
            timeouts,
        }
    }

    pub fn list_cameras(&self) -> Result<Vec<ListedCamera>, DeviceError> {
        let output = Command::new(&self.tool)
            .arg("--list-cameras")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| DeviceError::Open(format!("{}: {}", self.tool.display(), e)))?;

        // Some versions print the list on stderr.
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(parse_camera_list(&text))
    }
}

/// Parse lines shaped like `0 : imx708 [4608x2592 10-bit RGGB] (/base/...)`.
pub fn parse_camera_list(text: &str) -> Vec<ListedCamera> {
    text.lines()
        .filter_map(|line| {
            let (index, rest) = line.trim().split_once(" : ")?;
            let index = index.trim().parse().ok()?;
            let sensor = rest.split('[').next().unwrap_or(rest).trim().to_string();
            Some(ListedCamera { index, sensor })
        })
        .collect()
}

impl Backend for RpicamBackend {
    fn name(&self) -> &str {
        "rpicam"
    }

    fn open(&self, camera_index: u32) -> Result<Box<dyn FrameSource>, DeviceError> {
        let cameras = self.list_cameras()?;
        let Some(listed) = cameras.iter().find(|c| c.index == camera_index) else {
            return Err(DeviceError::CameraNotFound(camera_index));
        };
        tracing::info!(target: "camera", "[RPICAM] Camera {} is {}", camera_index, listed.sensor);

        Ok(Box::new(RpicamCamera {
            tool: self.tool.clone(),
            camera_index,
            timeouts: self.timeouts,
            config: None,
            preview: None,
            recorder: None,
            last_seq: 0,
        }))
    }
}

fn base_args(camera_index: u32, width: u32, height: u32, frame_rate: u32) -> Vec<String> {
    vec![
        "--camera".into(),
        camera_index.to_string(),
        "-t".into(),
        "0".into(),
        "--nopreview".into(),
        "--width".into(),
        width.to_string(),
        "--height".into(),
        height.to_string(),
        "--framerate".into(),
        frame_rate.to_string(),
    ]
}

pub fn preview_args(camera_index: u32, config: &StreamConfig) -> Vec<String> {
    let mut args = base_args(
        camera_index,
        config.preview_size.width,
        config.preview_size.height,
        config.frame_rate,
    );
    args.extend(["--codec", "mjpeg", "-o", "-"].map(String::from));
    args
}

pub fn record_args(camera_index: u32, config: &StreamConfig, bitrate: u32, output: &Path) -> Vec<String> {
    let mut args = base_args(
        camera_index,
        config.record_size.width,
        config.record_size.height,
        config.frame_rate,
    );
    args.extend([
        "--inline".to_string(),
        "--bitrate".to_string(),
        bitrate.to_string(),
        "-o".to_string(),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

type SharedJpeg = Arc<Mutex<Option<(u64, Arc<Vec<u8>>)>>>;

struct PreviewProcess {
    guard: ProcessGuard,
    latest: SharedJpeg,
    reader: Option<JoinHandle<()>>,
    stderr: StderrTail,
}

struct RecorderProcess {
    guard: ProcessGuard,
    stderr: StderrTail,
}

struct RpicamCamera {
    tool: PathBuf,
    camera_index: u32,
    timeouts: StopTimeouts,
    config: Option<StreamConfig>,
    preview: Option<PreviewProcess>,
    recorder: Option<RecorderProcess>,
    last_seq: u64,
}

impl RpicamCamera {
    fn label(&self) -> String {
        format!("rpicam{}", self.camera_index)
    }

    fn spawn_tool(&self, args: &[String], stdout: Stdio) -> Result<(ProcessGuard, StderrTail), DeviceError> {
        tracing::debug!(target: "camera", "[RPICAM] {} {:?}", self.tool.display(), args);
        let mut child = Command::new(&self.tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DeviceError::ToolNotFound(self.tool.display().to_string()),
                _ => DeviceError::Start(e.to_string()),
            })?;

        let stderr = match child.stderr.take() {
            Some(pipe) => StderrTail::spawn(pipe, STDERR_LINES).0,
            None => StderrTail::spawn(std::io::empty(), STDERR_LINES).0,
        };
        Ok((ProcessGuard::new(child, self.label()), stderr))
    }

    /// Fails if the tool exits during the startup window.
    fn probe_startup(guard: &mut ProcessGuard, stderr: &StderrTail) -> Result<(), String> {
        let Some(child) = guard.child_mut() else {
            return Err("process not running".into());
        };
        match wait_with_deadline(child, STARTUP_PROBE) {
            None => Ok(()),
            Some(status) => {
                guard.take();
                // Give the drain thread a moment to catch the final lines.
                std::thread::sleep(Duration::from_millis(50));
                Err(format!("exited with {}: {}", status, stderr.snapshot()))
            }
        }
    }

    fn stop_preview(&mut self) {
        let Some(mut preview) = self.preview.take() else {
            return;
        };
        if let Some(StopOutcome::ForceKilled) = preview.guard.stop(self.timeouts) {
            tracing::warn!(target: "camera", "[RPICAM {}] Preview had to be killed", self.camera_index);
        }
        if let Some(reader) = preview.reader.take() {
            let _ = reader.join();
        }
    }
}

impl FrameSource for RpicamCamera {
    fn configure(&mut self, config: StreamConfig) -> Result<(), DeviceError> {
        if config.frame_rate == 0 {
            return Err(DeviceError::Configure("frame rate must be positive".into()));
        }
        self.config = Some(config);
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        let config = self.config.ok_or(DeviceError::NotConfigured)?;
        if self.preview.is_some() {
            return Ok(());
        }

        let (mut guard, stderr) = self.spawn_tool(&preview_args(self.camera_index, &config), Stdio::piped())?;
        let stdout = guard
            .child_mut()
            .and_then(|child| child.stdout.take())
            .ok_or_else(|| DeviceError::Start("preview stdout unavailable".into()))?;

        let latest: SharedJpeg = Arc::new(Mutex::new(None));
        let reader = spawn_mjpeg_reader(stdout, Arc::clone(&latest), self.camera_index)
            .map_err(|e| DeviceError::Start(e.to_string()))?;

        Self::probe_startup(&mut guard, &stderr).map_err(DeviceError::Start)?;

        self.preview = Some(PreviewProcess {
            guard,
            latest,
            reader: Some(reader),
            stderr,
        });
        tracing::info!(target: "camera", "[RPICAM {}] Preview running", self.camera_index);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.stop_preview();
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        let Some(preview) = self.preview.as_mut() else {
            return Err(CaptureError::NotRunning);
        };
        if let Some(child) = preview.guard.child_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                tracing::warn!(target: "camera", "[RPICAM {}] Preview exited with {}: {}", self.camera_index, status, preview.stderr.snapshot());
                preview.guard.take();
                self.preview = None;
                return Err(CaptureError::NotRunning);
            }
        }

        let latest = preview.latest.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let Some((seq, jpeg)) = latest else {
            return Err(CaptureError::NoFrame);
        };
        if seq == self.last_seq {
            return Err(CaptureError::NoFrame);
        }
        self.last_seq = seq;

        image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .map(|img| img.to_rgb8())
            .map_err(|e| CaptureError::Decode(e.to_string()))
    }

    fn start_encoding(&mut self, bitrate: u32, output: &Path) -> Result<(), DeviceError> {
        let config = self.config.ok_or(DeviceError::NotConfigured)?;
        if self.recorder.is_some() {
            return Err(DeviceError::Encoder("already recording".into()));
        }

        self.stop_preview();

        let args = record_args(self.camera_index, &config, bitrate, output);
        let started = self
            .spawn_tool(&args, Stdio::null())
            .map_err(|e| e.to_string())
            .and_then(|(mut guard, stderr)| {
                Self::probe_startup(&mut guard, &stderr)?;
                Ok(RecorderProcess { guard, stderr })
            });

        match started {
            Ok(recorder) => {
                self.recorder = Some(recorder);
                tracing::info!(target: "camera", "[RPICAM {}] Recording to {}", self.camera_index, output.display());
                Ok(())
            }
            Err(message) => {
                if let Err(e) = self.start() {
                    tracing::error!(target: "camera", "[RPICAM {}] Preview did not come back: {}", self.camera_index, e);
                }
                Err(DeviceError::Encoder(message))
            }
        }
    }

    fn stop_encoding(&mut self) -> Result<(), DeviceError> {
        let Some(mut recorder) = self.recorder.take() else {
            return Err(DeviceError::EncoderNotRunning);
        };

        match recorder.guard.stop(self.timeouts) {
            Some(StopOutcome::Exited(status)) if exited_cleanly(status) => Ok(()),
            Some(StopOutcome::Exited(status)) => Err(DeviceError::Stop(format!(
                "recorder exited with {}: {}",
                status,
                recorder.stderr.snapshot()
            ))),
            Some(StopOutcome::ForceKilled) => Err(DeviceError::ForceKilled(
                self.timeouts.graceful + self.timeouts.terminate,
            )),
            None => Err(DeviceError::EncoderNotRunning),
        }
    }
}

/// Success, or death by the interrupt/terminate signals we sent.
#[cfg(unix)]
fn exited_cleanly(status: ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    if status.success() {
        return true;
    }
    if let Some(signal) = status.signal() {
        return signal == libc::SIGINT || signal == libc::SIGTERM;
    }
    // Shell convention for death by SIGINT / SIGTERM.
    matches!(status.code(), Some(130) | Some(143))
}

#[cfg(not(unix))]
fn exited_cleanly(status: ExitStatus) -> bool {
    status.success()
}

fn spawn_mjpeg_reader<R: Read + Send + 'static>(
    mut stream: R,
    latest: SharedJpeg,
    camera_index: u32,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("mjpeg{camera_index}"))
        .spawn(move || {
            let mut pending = Vec::with_capacity(READ_CHUNK * 2);
            let mut chunk = vec![0u8; READ_CHUNK];
            let mut seq = 0u64;
            loop {
                let n = match stream.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                pending.extend_from_slice(&chunk[..n]);
                if let Some(jpeg) = extract_latest_jpeg(&mut pending) {
                    seq += 1;
                    *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some((seq, Arc::new(jpeg)));
                }
            }
            tracing::debug!(target: "camera", "[RPICAM {}] MJPEG stream closed after {} frames", camera_index, seq);
        })
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

/// Take the newest complete JPEG out of `buffer`, discarding everything
/// before it. Incomplete trailing data is kept for the next read.
pub fn extract_latest_jpeg(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let mut latest = None;
    let mut cursor = 0;

    while let Some(start) = find_marker(&buffer[cursor..], &SOI).map(|i| cursor + i) {
        let Some(end) = find_marker(&buffer[start + 2..], &EOI).map(|i| start + 2 + i + 2) else {
            break;
        };
        latest = Some((start, end));
        cursor = end;
    }

    let frame = latest.map(|(start, end)| buffer[start..end].to_vec());
    buffer.drain(..cursor);
    if buffer.len() > MAX_PENDING_BYTES {
        buffer.clear();
    }
    frame
}
