use image::Rgb;

use super::{Detection, Detector, FrameAnnotator};
use crate::session::frame::Frame;

pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.30;
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;
/// Labels listed per log line.
const LOGGED_LABELS: usize = 8;

/// Runs a detector on every preview frame and draws the accepted boxes.
pub struct DetectionOverlay<D> {
    detector: D,
    min_confidence: f32,
    log_every: u64,
    frames: u64,
}

impl<D: Detector> DetectionOverlay<D> {
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            log_every: 30,
            frames: 0,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Log detected labels once every `frames` frames. Zero disables logging.
    pub fn with_log_every(mut self, frames: u64) -> Self {
        self.log_every = frames;
        self
    }

    fn accepted(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .filter(|d| d.confidence >= self.min_confidence)
            .collect()
    }
}

impl<D: Detector> FrameAnnotator for DetectionOverlay<D> {
    fn annotate(&mut self, frame: &mut Frame) {
        self.frames += 1;

        let detections = match self.detector.detect(frame) {
            Ok(detections) => self.accepted(detections),
            Err(e) => {
                tracing::debug!(target: "camera", "[DETECT] Skipping frame {}: {}", self.frames, e);
                return;
            }
        };

        for detection in &detections {
            if let Some(rect) = detection.bbox.to_pixels(frame.width(), frame.height()) {
                draw_rect(frame, rect, BOX_THICKNESS);
            }
        }

        if self.log_every > 0 && self.frames % self.log_every == 0 && !detections.is_empty() {
            let labels: Vec<String> = detections
                .iter()
                .take(LOGGED_LABELS)
                .map(|d| format!("{} {:.2}", d.label, d.confidence))
                .collect();
            tracing::info!(target: "camera", "[DETECT] frame {}: {}", self.frames, labels.join(", "));
        }
    }
}

/// Outline `(x0, y0, x1, y1)` (inclusive) growing inwards by `thickness`.
fn draw_rect(frame: &mut Frame, (x0, y0, x1, y1): (u32, u32, u32, u32), thickness: u32) {
    for t in 0..thickness {
        let (left, top) = (x0 + t, y0 + t);
        let (Some(right), Some(bottom)) = (x1.checked_sub(t), y1.checked_sub(t)) else {
            break;
        };
        if left > right || top > bottom {
            break;
        }
        for x in left..=right {
            frame.put_pixel(x, top, BOX_COLOR);
            frame.put_pixel(x, bottom, BOX_COLOR);
        }
        for y in top..=bottom {
            frame.put_pixel(left, y, BOX_COLOR);
            frame.put_pixel(right, y, BOX_COLOR);
        }
    }
}
