//! Object detection results and the hook that lets a worker draw them onto
//! preview frames.

pub mod overlay;

use thiserror::Error;

use crate::session::frame::Frame;

pub use overlay::DetectionOverlay;

/// Box in normalized coordinates (0.0..=1.0 of the frame size).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Build from pixel corners of a `frame_width` x `frame_height` image.
    pub fn from_pixels(x0: u32, y0: u32, x1: u32, y1: u32, frame_width: u32, frame_height: u32) -> Self {
        let fw = frame_width.max(1) as f32;
        let fh = frame_height.max(1) as f32;
        Self {
            x: x0 as f32 / fw,
            y: y0 as f32 / fh,
            width: x1.saturating_sub(x0) as f32 / fw,
            height: y1.saturating_sub(y0) as f32 / fh,
        }
    }

    /// Clamp into `[0, width) x [0, height)`, returned as inclusive
    /// `(x0, y0, x1, y1)`. `None` when the box falls entirely outside.
    pub fn to_pixels(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if width == 0 || height == 0 {
            return None;
        }
        let clamp = |v: f32, max: u32| (v * max as f32).round().clamp(0.0, (max - 1) as f32) as u32;

        let x_end = self.x + self.width;
        let y_end = self.y + self.height;
        if x_end <= 0.0 || y_end <= 0.0 || self.x >= 1.0 || self.y >= 1.0 {
            return None;
        }

        Some((
            clamp(self.x, width),
            clamp(self.y, height),
            clamp(x_end, width),
            clamp(y_end, height),
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error("Detector is not ready: {0}")]
    NotReady(String),
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Produces detections for one frame.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectError>;
}

/// Mutates a preview frame before it is published.
pub trait FrameAnnotator: Send {
    fn annotate(&mut self, frame: &mut Frame);
}
