//! Partitioned snapshot writer.
//!
//! Evidentiary JPEGs land in four fixed partitions under one output root:
//! one per category plus two auxiliary partitions reviewed by different
//! roles. Filenames encode camera, sequence number, confidence, and
//! timestamp, so concurrent cameras and repeated detections can never
//! silently overwrite each other.
//!
//! Write failures are the caller's to log; they are never pipeline-fatal.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::{ImageBuffer, Rgb};
use std::fs;
use std::path::{Path, PathBuf};

use crate::frame::Frame;
use crate::Category;

/// A fixed output location for snapshot images of one role or category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Partition {
    Identified,
    Unidentified,
    /// Cross-role review copies, written for every detection.
    Admin,
    Guard,
}

impl Partition {
    pub const ALL: [Partition; 4] = [
        Partition::Identified,
        Partition::Unidentified,
        Partition::Admin,
        Partition::Guard,
    ];

    /// The two partitions that receive a copy of every detection,
    /// regardless of category.
    pub const AUXILIARY: [Partition; 2] = [Partition::Admin, Partition::Guard];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Partition::Identified => "identified",
            Partition::Unidentified => "unidentified",
            Partition::Admin => "admin_snapshots",
            Partition::Guard => "guard_snapshots",
        }
    }

    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Identified => Partition::Identified,
            Category::Unidentified => Partition::Unidentified,
        }
    }

    fn role_tag(&self) -> Option<&'static str> {
        match self {
            Partition::Admin => Some("admin"),
            Partition::Guard => Some("guard"),
            _ => None,
        }
    }

    /// Snapshot filename, unique per (camera, sequence, confidence,
    /// timestamp).
    pub fn filename(
        &self,
        camera_id: u32,
        sequence: u64,
        confidence: f32,
        captured_at: DateTime<Local>,
    ) -> String {
        let stamp = captured_at.format("%Y%m%d_%H%M%S");
        match self.role_tag() {
            Some(role) => format!(
                "cam{}_{}_det{}_conf{:.2}_{}.jpg",
                camera_id, role, sequence, confidence, stamp
            ),
            None => format!(
                "cam{}_det{}_conf{:.2}_{}.jpg",
                camera_id, sequence, confidence, stamp
            ),
        }
    }
}

/// Writes category-tagged JPEG snapshots into the fixed partitions.
pub struct SnapshotWriter {
    root: PathBuf,
}

impl SnapshotWriter {
    /// Create the writer and bootstrap all partitions under `root`.
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        for partition in Partition::ALL {
            let dir = root.join(partition.dir_name());
            fs::create_dir_all(&dir)
                .with_context(|| format!("create snapshot partition {}", dir.display()))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Encode the frame as JPEG into the given partition.
    ///
    /// The frame written is the clean source frame; overlays exist only on
    /// the render path.
    pub fn write(&self, frame: &Frame, partition: Partition, filename: &str) -> Result<PathBuf> {
        let path = self.root.join(partition.dir_name()).join(filename);
        let img: ImageBuffer<Rgb<u8>, _> =
            ImageBuffer::from_raw(frame.width, frame.height, frame.pixels.clone())
                .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        img.save(&path)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_frame() -> Frame {
        Frame::new(vec![127u8; 8 * 8 * 3], 8, 8, Local::now())
    }

    fn fixed_instant() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 4, 10, 15, 0).unwrap()
    }

    #[test]
    fn bootstrap_creates_all_partitions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = SnapshotWriter::new(dir.path())?;

        for partition in Partition::ALL {
            assert!(writer.root().join(partition.dir_name()).is_dir());
        }
        Ok(())
    }

    #[test]
    fn filenames_encode_camera_sequence_confidence_and_time() {
        let name = Partition::Identified.filename(1, 42, 0.91, fixed_instant());
        assert_eq!(name, "cam1_det42_conf0.91_20260804_101500.jpg");

        let admin = Partition::Admin.filename(1, 42, 0.91, fixed_instant());
        assert_eq!(admin, "cam1_admin_det42_conf0.91_20260804_101500.jpg");

        let guard = Partition::Guard.filename(2, 7, 0.4, fixed_instant());
        assert_eq!(guard, "cam2_guard_det7_conf0.40_20260804_101500.jpg");
    }

    #[test]
    fn distinct_sequences_never_collide() {
        let a = Partition::Unidentified.filename(1, 1, 0.5, fixed_instant());
        let b = Partition::Unidentified.filename(1, 2, 0.5, fixed_instant());
        assert_ne!(a, b);
    }

    #[test]
    fn write_produces_a_jpeg_in_the_partition() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = SnapshotWriter::new(dir.path())?;
        let frame = test_frame();

        let name = Partition::Identified.filename(1, 1, 0.9, frame.captured_at);
        let path = writer.write(&frame, Partition::Identified, &name)?;

        assert!(path.exists());
        assert!(path.starts_with(writer.root().join("identified")));
        assert!(fs::metadata(&path)?.len() > 0);
        Ok(())
    }

    #[test]
    fn category_maps_to_its_partition() {
        assert_eq!(
            Partition::for_category(Category::Identified),
            Partition::Identified
        );
        assert_eq!(
            Partition::for_category(Category::Unidentified),
            Partition::Unidentified
        );
    }
}
