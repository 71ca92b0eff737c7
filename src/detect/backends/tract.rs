#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::engine::{BoundingBox, InferenceEngine, RawDetection};

/// Floats per candidate row in the model output: cx, cy, w, h, confidence,
/// class index.
const ROW_LEN: usize = 6;

/// Tract-based engine for ONNX badge-detection models.
///
/// Loads a local model file and runs inference on normalized RGB frames.
/// The model is expected to emit candidate rows of
/// `[cx, cy, w, h, confidence, class]` in pixel coordinates; rows below the
/// confidence threshold are dropped, the rest are returned in model order.
pub struct TractEngine {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    labels: Vec<String>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
}

impl TractEngine {
    /// Load an ONNX model from disk and prepare it for inference.
    ///
    /// `labels` maps the model's class indices to raw labels, in index
    /// order (e.g., `["person_with_id", "person_without_id"]`).
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        labels: Vec<String>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        if labels.is_empty() {
            return Err(anyhow!("at least one class label is required"));
        }
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            labels,
            width,
            height,
            confidence_threshold: 0.5,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        if width != self.width || height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                width,
                height,
                self.width,
                self.height
            ));
        }

        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;

        if pixels.len() != expected_len {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected_len,
                pixels.len()
            ));
        }

        let width = width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn extract_detections(&self, outputs: TVec<TValue>) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let flat: Vec<f32> = values.iter().cloned().collect();
        if flat.len() % ROW_LEN != 0 {
            return Err(anyhow!(
                "model output length {} is not a multiple of {}",
                flat.len(),
                ROW_LEN
            ));
        }

        let frame_w = self.width as f32;
        let frame_h = self.height as f32;
        let mut detections = Vec::new();
        for row in flat.chunks(ROW_LEN) {
            let confidence = row[4];
            if !confidence.is_finite() || confidence < self.confidence_threshold {
                continue;
            }
            let class_idx = row[5].round() as usize;
            let label = self
                .labels
                .get(class_idx)
                .ok_or_else(|| anyhow!("model emitted unknown class index {}", class_idx))?;

            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            detections.push(RawDetection {
                label: label.clone(),
                confidence: confidence.clamp(0.0, 1.0),
                bbox: BoundingBox {
                    x: ((cx - w / 2.0) / frame_w).clamp(0.0, 1.0),
                    y: ((cy - h / 2.0) / frame_h).clamp(0.0, 1.0),
                    w: (w / frame_w).clamp(0.0, 1.0),
                    h: (h / frame_h).clamp(0.0, 1.0),
                },
            });
        }

        Ok(detections)
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_detections(outputs)
    }
}
