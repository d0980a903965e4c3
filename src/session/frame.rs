//! Latest-frame slot shared between a worker and the UI.
//!
//! The worker publishes every captured frame. The UI reads the most recent one
//! at its own pace. The lock is held only for the pointer swap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use image::{Rgb, RgbImage};

/// One decoded preview frame.
pub type Frame = RgbImage;

#[derive(Clone, Default)]
pub struct FrameSlot {
    latest: Arc<Mutex<Option<Arc<Frame>>>>,
    published: Arc<AtomicU64>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest frame. Older frames are simply dropped.
    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let mut slot = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(frame);
        drop(slot);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of frames published since the slot was created.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("published", &self.published_count())
            .finish()
    }
}

const SEPARATOR_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Lay frames out left to right with a white bar of `separator` pixels between
/// them. Frames shorter than the tallest one are top-aligned on black.
pub fn compose_side_by_side(frames: &[Arc<Frame>], separator: u32) -> Option<Frame> {
    if frames.is_empty() {
        return None;
    }

    let gaps = separator * (frames.len() as u32 - 1);
    let width = frames.iter().map(|f| f.width()).sum::<u32>() + gaps;
    let height = frames.iter().map(|f| f.height()).max().unwrap_or(0);
    if width == 0 || height == 0 {
        return None;
    }

    let mut canvas = RgbImage::new(width, height);
    let mut x = 0;
    for (i, frame) in frames.iter().enumerate() {
        if i > 0 {
            for sx in x..x + separator {
                for y in 0..height {
                    canvas.put_pixel(sx, y, SEPARATOR_COLOR);
                }
            }
            x += separator;
        }
        image::imageops::replace(&mut canvas, frame.as_ref(), i64::from(x), 0);
        x += frame.width();
    }

    Some(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> Frame {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    #[test]
    fn test_slot_keeps_only_latest() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());

        slot.publish(solid(2, 2, 10));
        slot.publish(solid(2, 2, 20));

        let latest = slot.latest().unwrap();
        assert_eq!(latest.get_pixel(0, 0), &Rgb([20, 20, 20]));
        assert_eq!(slot.published_count(), 2);
    }

    #[test]
    fn test_slot_clones_share_state() {
        let slot = FrameSlot::new();
        let reader = slot.clone();

        slot.publish(solid(1, 1, 5));
        assert!(reader.latest().is_some());
    }

    #[test]
    fn test_compose_places_separator_between_frames() {
        let left = Arc::new(solid(4, 3, 0));
        let right = Arc::new(solid(4, 2, 100));

        let composed = compose_side_by_side(&[left, right], 2).unwrap();

        assert_eq!(composed.dimensions(), (10, 3));
        assert_eq!(composed.get_pixel(3, 0), &Rgb([0, 0, 0]));
        assert_eq!(composed.get_pixel(4, 1), &SEPARATOR_COLOR);
        assert_eq!(composed.get_pixel(5, 2), &SEPARATOR_COLOR);
        assert_eq!(composed.get_pixel(6, 0), &Rgb([100, 100, 100]));
        // Shorter frame leaves black below it.
        assert_eq!(composed.get_pixel(6, 2), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_compose_single_frame_has_no_separator() {
        let composed = compose_side_by_side(&[Arc::new(solid(3, 3, 7))], 5).unwrap();
        assert_eq!(composed.dimensions(), (3, 3));
    }

    #[test]
    fn test_compose_empty_is_none() {
        assert!(compose_side_by_side(&[], 4).is_none());
    }
}
