//! Display-sink delivery of the latest annotated frame.
//!
//! The publisher is driven by an external fixed-interval tick (the daemon
//! runs it at ~30 Hz). Each tick reads whatever annotated frame is current
//! and hands it to the sink; until the first inference cycle completes
//! there is nothing to show and the tick is a no-op. The publisher never
//! waits for a newer frame - a stale frame beats a blocked display.

use std::sync::Arc;

use crate::frame::{AnnotatedFrame, RenderSlot};

/// On-screen consumer of annotated frames.
pub trait DisplaySink: Send {
    fn display(&mut self, frame: &AnnotatedFrame);
}

pub struct RenderPublisher {
    slot: RenderSlot,
    sink: Box<dyn DisplaySink>,
}

impl RenderPublisher {
    pub fn new(slot: RenderSlot, sink: Box<dyn DisplaySink>) -> Self {
        Self { slot, sink }
    }

    /// Deliver the current annotated frame, if any. Returns the frame that
    /// was shown. Non-blocking on the pipeline side: only reads the slot.
    pub fn tick(&mut self) -> Option<Arc<AnnotatedFrame>> {
        let frame = self.slot.latest()?;
        self.sink.display(&frame);
        Some(frame)
    }
}
