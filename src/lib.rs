//! badge-sentinel
//!
//! This crate implements the real-time detection pipeline behind the
//! `sentineld` daemon: watch a CCTV stream, detect people, classify each
//! detection as wearing an ID badge or not, persist evidentiary snapshots
//! and detection records, and raise alerts to an observing operator.
//!
//! # Architecture
//!
//! Two indefinitely-looping workers run in parallel:
//!
//! 1. **Acquisition**: reads frames from the camera source and publishes
//!    them into a single-slot overwrite buffer. Under slow inference,
//!    frames are dropped rather than queued - recency over completeness.
//! 2. **Inference**: drains the slot, runs the injected inference engine,
//!    routes every detection (snapshots, store insert, alert) and swaps
//!    the annotated frame into the render slot.
//!
//! A third, externally clocked path (the render publisher) only ever reads
//! the latest annotated frame and must never block the workers.
//!
//! # Module Structure
//!
//! - `config`: daemon configuration (JSON file + environment overrides)
//! - `frame`: Frame, the latest-frame slot, and the render slot
//! - `ingest`: camera sources (stub, RTSP via GStreamer) + normalization
//! - `detect`: inference engine boundary, backends, box overlay
//! - `route`: per-detection classification, sequencing, and fan-out
//! - `snapshot`: partitioned JPEG snapshot writer
//! - `storage`: detection/feedback store (SQLite, in-memory)
//! - `alert`: alert sinks and the cooldown-gated emitter
//! - `pipeline`: worker lifecycle (start/stop, cancellation)
//! - `render`: display-sink delivery of the latest annotated frame

use chrono::{DateTime, Local};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub mod alert;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod render;
pub mod route;
pub mod snapshot;
pub mod storage;

pub use alert::{AlertEmitter, AlertNotice, AlertSink, ChannelAlertSink, LogAlertSink};
#[cfg(feature = "backend-tract")]
pub use detect::TractEngine;
pub use detect::{BoundingBox, InferenceEngine, RawDetection, StubEngine};
pub use frame::{AnnotatedFrame, Frame, FrameSlot, RenderSlot};
pub use ingest::{CameraSource, StreamConfig};
pub use pipeline::{Pipeline, PipelineHandle, PipelineMonitor, PipelineState, PipelineStats};
pub use render::{DisplaySink, RenderPublisher};
pub use route::DetectionRouter;
pub use snapshot::{Partition, SnapshotWriter};
pub use storage::{DetectionStore, InMemoryDetectionStore, NewDetection, SqliteDetectionStore};

/// URI for a process-shared in-memory SQLite database.
///
/// Tests open the same database from multiple connections without touching
/// the filesystem.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:badge_sentinel_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

// -------------------- Categories --------------------

/// Closed classification of a detection.
///
/// Every detection lands in exactly one of these. There is no "unknown"
/// variant: labels the mapping does not recognize are treated as
/// `Identified` (see [`map_label`]).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Identified,
    Unidentified,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Identified => "identified",
            Category::Unidentified => "unidentified",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a raw model label to a [`Category`].
///
/// The table is fixed and case-insensitive. Unrecognized labels map to
/// `Identified`; only an explicit no-badge label reaches `Unidentified`.
/// Changing this default silently changes alerting and filing semantics
/// downstream, so it must stay exactly as written.
pub fn map_label(raw: &str) -> Category {
    match raw.trim().to_lowercase().as_str() {
        "no_id" | "noid" | "without_id" | "person_without_id" => Category::Unidentified,
        _ => Category::Identified,
    }
}

// -------------------- Detection events --------------------

/// One classified detection instance, created once per bounding box per
/// inference cycle. Immutable after creation; snapshots, the store, and
/// the alert emitter each consume it independently.
#[derive(Clone, Debug)]
pub struct DetectionEvent {
    pub camera_id: u32,
    /// Monotonically increasing per pipeline instance, gap-free.
    pub sequence: u64,
    /// Confidence score in [0, 1].
    pub confidence: f32,
    pub category: Category,
    /// Path of the category-partition snapshot, when the write succeeded.
    pub snapshot_path: Option<PathBuf>,
    pub captured_at: DateTime<Local>,
    /// Store-assigned record identifier; 0 when persistence failed.
    pub record_id: i64,
}
