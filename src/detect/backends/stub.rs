use anyhow::Result;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::detect::engine::{BoundingBox, InferenceEngine, RawDetection};

/// Stub engine for tests and demos.
///
/// Two modes:
/// - Scene-change mode (`new`): hashes each frame and emits one synthetic
///   badge detection whenever the hash differs from the previous frame.
/// - Scripted mode (`scripted`): returns the provided detection batches in
///   order, one batch per frame, then empty batches.
pub struct StubEngine {
    last_hash: Option<[u8; 32]>,
    scripted: Option<VecDeque<Vec<RawDetection>>>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            last_hash: None,
            scripted: None,
        }
    }

    pub fn scripted(batches: Vec<Vec<RawDetection>>) -> Self {
        Self {
            last_hash: None,
            scripted: Some(batches.into()),
        }
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<RawDetection>> {
        if let Some(batches) = &mut self.scripted {
            return Ok(batches.pop_front().unwrap_or_default());
        }

        let current_hash: [u8; 32] = Sha256::digest(pixels).into();
        let changed = match self.last_hash {
            Some(prev) => prev != current_hash,
            None => false,
        };
        self.last_hash = Some(current_hash);

        if !changed {
            return Ok(Vec::new());
        }

        Ok(vec![RawDetection {
            label: "person_with_id".to_string(),
            confidence: 0.85,
            bbox: BoundingBox {
                x: 0.4,
                y: 0.3,
                w: 0.2,
                h: 0.4,
            },
        }])
    }
}
