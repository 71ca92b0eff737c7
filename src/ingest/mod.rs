//! Frame acquisition sources.
//!
//! This module provides the camera-facing edge of the pipeline:
//! - RTSP streams (feature: stream-gstreamer)
//! - Synthetic stub sources (`stub://` URLs, used by tests and demos)
//!
//! All sources produce [`crate::Frame`] instances. The acquisition layer is
//! responsible for:
//! - Decoding frames in-memory
//! - Normalizing every frame to the configured fixed resolution before it
//!   leaves this module, so downstream stages never see source geometry
//! - Stamping the acquisition instant
//!
//! On open failure the pipeline must not start its workers; read errors and
//! end-of-stream terminate acquisition gracefully rather than crash it.

mod scale;
pub mod stream;

pub(crate) use scale::scale_rgb;
pub use stream::{CameraSource, StreamConfig, StreamStats};
