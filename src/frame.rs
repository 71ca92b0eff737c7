//! Frame types and the two hand-off points between pipeline stages.
//!
//! - `Frame`: one decoded RGB image, tagged with its acquisition instant.
//! - `FrameSlot`: single-slot overwrite buffer between the acquisition and
//!   inference workers. Holds at most one pending frame; a new frame
//!   replaces an unconsumed one. Lossy on purpose: under slow inference the
//!   pipeline sheds frames instead of buffering them, bounding both memory
//!   and end-to-end latency.
//! - `RenderSlot`: the latest annotated frame, written only by the
//!   inference worker and read by the render publisher. Readers always see
//!   a whole frame - the previous one or the current one, never a torn mix.

use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, MutexGuard};

/// One decoded RGB frame (3 bytes per pixel, row-major).
///
/// Exclusively owned by whichever stage currently holds it; hand-off
/// through the [`FrameSlot`] moves the frame, it is never shared.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, captured_at: DateTime<Local>) -> Self {
        Self {
            pixels,
            width,
            height,
            captured_at,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// Render-ready frame with detection overlays burned in.
///
/// Exactly one exists at a time per camera; produced once per processed
/// frame even when nothing was detected, so the render path stays live.
#[derive(Clone, Debug)]
pub struct AnnotatedFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub detection_count: usize,
    pub captured_at: DateTime<Local>,
}

// ----------------------------------------------------------------------------
// FrameSlot: acquisition -> inference hand-off
// ----------------------------------------------------------------------------

/// Single-slot, overwrite-on-publish hand-off buffer.
///
/// The acquisition worker is the sole writer, the inference worker the sole
/// reader. Both ends are non-blocking: `publish` replaces any unconsumed
/// frame, `take` returns `None` instead of waiting.
#[derive(Default)]
pub struct FrameSlot {
    pending: Mutex<Option<Frame>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        // A poisoned lock means a worker panicked mid-swap; the slot still
        // holds either a whole frame or nothing, so recover and continue.
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Publish a frame, discarding any unconsumed predecessor. Never fails.
    pub fn publish(&self, frame: Frame) {
        *self.lock() = Some(frame);
    }

    /// Take the pending frame if there is one. Never waits.
    pub fn take(&self) -> Option<Frame> {
        self.lock().take()
    }

    /// Drop any pending frame. Used during pipeline shutdown.
    pub fn clear(&self) {
        *self.lock() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }
}

// ----------------------------------------------------------------------------
// RenderSlot: inference -> render publisher hand-off
// ----------------------------------------------------------------------------

/// Latest annotated frame, swapped whole.
///
/// Single writer (inference worker), any number of readers. The frame is
/// stored behind an `Arc` and replaced in one short critical section, so a
/// reader holds either the fully-previous or fully-current frame.
#[derive(Clone, Default)]
pub struct RenderSlot {
    current: Arc<Mutex<Option<Arc<AnnotatedFrame>>>>,
}

impl RenderSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<AnnotatedFrame>>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replace the current annotated frame. Writer-side only.
    pub fn publish(&self, frame: AnnotatedFrame) {
        *self.lock() = Some(Arc::new(frame));
    }

    /// Most recent annotated frame, possibly stale; `None` until the first
    /// inference cycle completes. Never blocks waiting for a newer one.
    pub fn latest(&self) -> Option<Arc<AnnotatedFrame>> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_marker(marker: u8) -> Frame {
        Frame::new(vec![marker; 12], 2, 2, Local::now())
    }

    #[test]
    fn slot_hands_off_a_single_frame() {
        let slot = FrameSlot::new();
        assert!(slot.is_empty());

        slot.publish(frame_with_marker(1));
        assert!(!slot.is_empty());

        let frame = slot.take().expect("pending frame");
        assert_eq!(frame.pixels[0], 1);
        assert!(slot.take().is_none());
        assert!(slot.is_empty());
    }

    #[test]
    fn publish_overwrites_unconsumed_frame() {
        let slot = FrameSlot::new();
        slot.publish(frame_with_marker(1));
        slot.publish(frame_with_marker(2));
        slot.publish(frame_with_marker(3));

        // Only the most recent survives; earlier frames were shed.
        let frame = slot.take().expect("pending frame");
        assert_eq!(frame.pixels[0], 3);
        assert!(slot.take().is_none());
    }

    #[test]
    fn clear_empties_the_slot() {
        let slot = FrameSlot::new();
        slot.publish(frame_with_marker(9));
        slot.clear();
        assert!(slot.is_empty());
    }

    #[test]
    fn render_slot_starts_empty_and_tracks_latest() {
        let slot = RenderSlot::new();
        assert!(slot.latest().is_none());

        slot.publish(AnnotatedFrame {
            pixels: vec![1; 12],
            width: 2,
            height: 2,
            detection_count: 0,
            captured_at: Local::now(),
        });
        slot.publish(AnnotatedFrame {
            pixels: vec![2; 12],
            width: 2,
            height: 2,
            detection_count: 3,
            captured_at: Local::now(),
        });

        let latest = slot.latest().expect("annotated frame");
        assert_eq!(latest.pixels[0], 2);
        assert_eq!(latest.detection_count, 3);
    }

    #[test]
    fn render_slot_readers_share_the_same_frame() {
        let slot = RenderSlot::new();
        slot.publish(AnnotatedFrame {
            pixels: vec![7; 12],
            width: 2,
            height: 2,
            detection_count: 1,
            captured_at: Local::now(),
        });

        let a = slot.latest().expect("frame");
        let b = slot.latest().expect("frame");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
