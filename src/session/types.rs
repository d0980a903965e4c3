//! Values exchanged between the UI and the camera workers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Status text posted whenever a session returns to idle preview.
pub const PREVIEW_RUNNING: &str = "preview running";

/// Position of a camera within the rig (0, 1, ...). Not the device index.
pub type CameraId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Everything a worker needs to know about its camera, fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    pub camera_id: CameraId,
    /// Used in file names and log prefixes (`cam0`, `cam1`, ...).
    pub label: String,
    /// Index passed to the device backend.
    pub camera_index: u32,
    pub preview_size: Size,
    pub record_size: Size,
    pub frame_rate: u32,
    /// Encoder bitrate in bits per second.
    pub bitrate: u32,
}

impl CameraConfig {
    /// Target delay between two preview captures.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }
}

/// Elementary stream and container file of one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingPaths {
    pub elementary: PathBuf,
    pub container: PathBuf,
}

impl RecordingPaths {
    pub fn new(elementary: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            elementary: elementary.into(),
            container: container.into(),
        }
    }

    /// `{dir}/{label}_{stamp}.h264` and `{dir}/{label}_{stamp}.mp4`.
    pub fn in_dir(dir: &Path, label: &str, stamp: &str) -> Self {
        Self {
            elementary: dir.join(format!("{label}_{stamp}.h264")),
            container: dir.join(format!("{label}_{stamp}.mp4")),
        }
    }

    pub fn container_name(&self) -> String {
        file_name(&self.container)
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Operator intent sent from the UI to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(RecordingPaths),
    Stop,
    Shutdown,
}

/// Notification sent from a worker (or its remux task) to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Ready,
    Status(String),
    RecordingState(bool),
    Saved(PathBuf),
    Error(String),
    Fatal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_in_dir_use_label_and_stamp() {
        let paths = RecordingPaths::in_dir(Path::new("/videos"), "cam1", "20250114_093012");

        assert_eq!(paths.elementary, PathBuf::from("/videos/cam1_20250114_093012.h264"));
        assert_eq!(paths.container, PathBuf::from("/videos/cam1_20250114_093012.mp4"));
        assert_eq!(paths.container_name(), "cam1_20250114_093012.mp4");
    }

    #[test]
    fn test_frame_interval_guards_zero_rate() {
        let mut config = CameraConfig {
            camera_id: 0,
            label: "cam0".into(),
            camera_index: 0,
            preview_size: Size::new(640, 360),
            record_size: Size::new(1920, 1080),
            frame_rate: 10,
            bitrate: 8_000_000,
        };
        assert_eq!(config.frame_interval(), Duration::from_millis(100));

        config.frame_rate = 0;
        assert_eq!(config.frame_interval(), Duration::from_secs(1));
    }
}
