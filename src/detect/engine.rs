use anyhow::Result;

/// Bounding geometry in normalized 0..1 frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// One detection as returned by an inference engine: the raw model label,
/// not yet mapped to a category.
#[derive(Clone, Debug)]
pub struct RawDetection {
    pub label: String,
    /// Confidence score in [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Inference engine boundary.
///
/// The pipeline treats the engine as an injected capability: it never
/// constructs one itself, and substitutes a stub in tests. Implementations
/// receive a normalized RGB frame and return detections in model order -
/// the router processes them in exactly that order, no reordering.
///
/// Implementations must treat the pixel slice as read-only and ephemeral;
/// a failed inference applies to that frame only and the caller moves on
/// to the next one.
pub trait InferenceEngine: Send {
    /// Engine identifier for logs.
    fn name(&self) -> &'static str;

    /// Run detection on one frame.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, called once before the worker loop starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
