use std::time::Duration;
use thiserror::Error;

use super::types::CameraId;

/// Errors from the camera device or its encoder.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Camera tool not found (looked for {0})")]
    ToolNotFound(String),
    #[error("Camera {0} not found")]
    CameraNotFound(u32),
    #[error("Failed to open camera: {0}")]
    Open(String),
    #[error("Camera is not configured")]
    NotConfigured,
    #[error("Failed to configure camera: {0}")]
    Configure(String),
    #[error("Failed to start camera: {0}")]
    Start(String),
    #[error("Failed to stop camera: {0}")]
    Stop(String),
    #[error("Encoder error: {0}")]
    Encoder(String),
    #[error("Encoder is not running")]
    EncoderNotRunning,
    #[error("Process did not exit within {0:?} and was killed")]
    ForceKilled(Duration),
}

/// A single missed preview frame. Never surfaced to the operator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Preview pipeline is not running")]
    NotRunning,
    #[error("No new frame available")]
    NoFrame,
    #[error("Failed to decode frame: {0}")]
    Decode(String),
}

/// Errors from the external remux tool.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemuxError {
    #[error("Remux tool not found: {0}")]
    ToolNotFound(String),
    #[error("Failed to launch remux tool: {0}")]
    Launch(String),
    #[error("Remux tool failed with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Errors talking to a worker from the UI side.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to spawn worker for camera {camera}: {source}")]
    Spawn {
        camera: CameraId,
        #[source]
        source: std::io::Error,
    },
    #[error("Worker for camera {0} is no longer running")]
    Disconnected(CameraId),
}
