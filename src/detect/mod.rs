mod annotate;
mod backends;
mod engine;

pub use annotate::annotate_frame;
pub use backends::StubEngine;
#[cfg(feature = "backend-tract")]
pub use backends::TractEngine;
pub use engine::{BoundingBox, InferenceEngine, RawDetection};
