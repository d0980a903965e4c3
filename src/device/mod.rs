//! Camera device capability and its backends.
//!
//! A worker only ever talks to a [`FrameSource`]. Backends decide how frames
//! and encoded streams are produced.

pub mod process;
pub mod rpicam;
pub mod synthetic;

use std::path::Path;

use crate::session::errors::{CaptureError, DeviceError};
use crate::session::frame::Frame;
use crate::session::types::{CameraConfig, Size};

pub use rpicam::RpicamBackend;
pub use synthetic::{FaultPlan, SyntheticBackend, SyntheticProbe};

/// Stream layout requested at configure time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub preview_size: Size,
    pub record_size: Size,
    pub frame_rate: u32,
}

impl From<&CameraConfig> for StreamConfig {
    fn from(config: &CameraConfig) -> Self {
        Self {
            preview_size: config.preview_size,
            record_size: config.record_size,
            frame_rate: config.frame_rate,
        }
    }
}

/// One opened camera, exclusively owned by its worker.
pub trait FrameSource: Send {
    fn configure(&mut self, config: StreamConfig) -> Result<(), DeviceError>;

    /// Start (or resume) the preview pipeline. Calling it while running is a no-op.
    fn start(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Grab the next preview frame. Misses are transient.
    fn capture_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Begin writing an elementary stream to `output`.
    fn start_encoding(&mut self, bitrate: u32, output: &Path) -> Result<(), DeviceError>;

    /// Finish the elementary stream. May leave the preview pipeline stopped.
    fn stop_encoding(&mut self) -> Result<(), DeviceError>;
}

/// Opens cameras by index.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, camera_index: u32) -> Result<Box<dyn FrameSource>, DeviceError>;
}
