//! Per-detection classification, sequencing, and fan-out.
//!
//! For every detection the router: maps the raw label to a category,
//! assigns the next sequence number for its camera, files snapshots into
//! the category partition and both auxiliary partitions, submits the
//! detection record to the store, and forwards an alert.
//!
//! The four sub-steps are attempted independently. A store outage must not
//! cost the operator their snapshots, and a full disk must not silence
//! alerts: the router aggregates partial failure into the returned event
//! (record id 0, missing snapshot path) and never short-circuits.

use std::path::PathBuf;

use crate::alert::AlertEmitter;
use crate::frame::Frame;
use crate::snapshot::{Partition, SnapshotWriter};
use crate::storage::{DetectionStore, NewDetection};
use crate::{map_label, DetectionEvent};

/// Timestamp format for detection rows.
const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct DetectionRouter {
    camera_id: u32,
    sequence: u64,
    snapshots: SnapshotWriter,
    store: Box<dyn DetectionStore>,
    alerts: AlertEmitter,
}

impl DetectionRouter {
    pub fn new(
        camera_id: u32,
        snapshots: SnapshotWriter,
        store: Box<dyn DetectionStore>,
        alerts: AlertEmitter,
    ) -> Self {
        Self {
            camera_id,
            sequence: 0,
            snapshots,
            store,
            alerts,
        }
    }

    pub fn camera_id(&self) -> u32 {
        self.camera_id
    }

    /// Sequence number of the most recently routed detection; 0 before the
    /// first one. Only the owning inference worker mutates the counter, so
    /// it needs no synchronization.
    pub fn last_sequence(&self) -> u64 {
        self.sequence
    }

    /// Route one detection. Infallible by contract: every failure mode
    /// inside is absorbed and reflected in the returned event.
    pub fn route(&mut self, frame: &Frame, raw_label: &str, confidence: f32) -> DetectionEvent {
        let category = map_label(raw_label);
        // Sequence assignment happens before any I/O, so numbers stay
        // gap-free even when every downstream branch fails.
        self.sequence += 1;
        let sequence = self.sequence;
        let captured_at = frame.captured_at;

        // (a) Category-partition snapshot.
        let snapshot_path = self.write_snapshot(
            frame,
            Partition::for_category(category),
            sequence,
            confidence,
        );

        // (b) Unconditional copies for cross-role review.
        for partition in Partition::AUXILIARY {
            self.write_snapshot(frame, partition, sequence, confidence);
        }

        // (c) Detection record, best-effort. No retry here.
        let record = NewDetection {
            camera_id: self.camera_id,
            confidence,
            category,
            image_path: snapshot_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            captured_at: captured_at.format(DB_TIME_FORMAT).to_string(),
        };
        let record_id = match self.store.insert_detection(&record) {
            Ok(id) => id,
            Err(e) => {
                log::warn!("detection insert failed (cam {}): {}", self.camera_id, e);
                0
            }
        };

        let event = DetectionEvent {
            camera_id: self.camera_id,
            sequence,
            confidence,
            category,
            snapshot_path,
            captured_at,
            record_id,
        };

        // (d) Alert, decoupled from everything above.
        self.alerts.emit_detection(&event);

        event
    }

    fn write_snapshot(
        &self,
        frame: &Frame,
        partition: Partition,
        sequence: u64,
        confidence: f32,
    ) -> Option<PathBuf> {
        let filename = partition.filename(self.camera_id, sequence, confidence, frame.captured_at);
        match self.snapshots.write(frame, partition, &filename) {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("snapshot write failed ({}): {}", partition.dir_name(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertNotice, AlertSink};
    use crate::storage::InMemoryDetectionStore;
    use crate::Category;
    use chrono::Local;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct RecordingSink {
        emitted: Arc<Mutex<Vec<AlertNotice>>>,
    }

    impl RecordingSink {
        fn notices(&self) -> Vec<AlertNotice> {
            self.emitted.lock().unwrap().clone()
        }
    }

    impl AlertSink for RecordingSink {
        fn emit(&mut self, message: &str, category: Category) {
            self.emitted.lock().unwrap().push(AlertNotice {
                message: message.to_string(),
                category,
            });
        }
    }

    struct Fixture {
        router: DetectionRouter,
        store: InMemoryDetectionStore,
        sink: RecordingSink,
        root: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().expect("tempdir");
        let snapshots = SnapshotWriter::new(root.path()).expect("snapshot writer");
        let store = InMemoryDetectionStore::new();
        let sink = RecordingSink::default();
        let alerts = AlertEmitter::new(Box::new(sink.clone()), Duration::ZERO);
        let router = DetectionRouter::new(1, snapshots, Box::new(store.clone()), alerts);
        Fixture {
            router,
            store,
            sink,
            root,
        }
    }

    fn test_frame() -> Frame {
        Frame::new(vec![127u8; 8 * 8 * 3], 8, 8, Local::now())
    }

    fn files_in(root: &std::path::Path, partition: Partition) -> usize {
        std::fs::read_dir(root.join(partition.dir_name()))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[test]
    fn sequences_are_strictly_increasing_and_gap_free() {
        let mut fx = fixture();
        let frame = test_frame();

        let a = fx.router.route(&frame, "id", 0.91);
        let b = fx.router.route(&frame, "no_id", 0.42);
        let c = fx.router.route(&frame, "xyz", 0.5);

        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(c.sequence, 3);
        assert_eq!(fx.router.last_sequence(), 3);
    }

    #[test]
    fn each_detection_fans_out_to_three_partitions_and_the_store() {
        let mut fx = fixture();
        let frame = test_frame();

        let event = fx.router.route(&frame, "no_id", 0.42);

        assert_eq!(event.category, Category::Unidentified);
        assert_eq!(files_in(fx.root.path(), Partition::Unidentified), 1);
        assert_eq!(files_in(fx.root.path(), Partition::Identified), 0);
        assert_eq!(files_in(fx.root.path(), Partition::Admin), 1);
        assert_eq!(files_in(fx.root.path(), Partition::Guard), 1);

        let rows = fx.store.detections();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].camera_id, 1);
        assert_eq!(rows[0].category, Category::Unidentified);
        assert!(rows[0].image_path.contains("unidentified"));
        assert_eq!(event.record_id, 1);

        assert_eq!(fx.sink.notices().len(), 1);
    }

    #[test]
    fn store_failure_does_not_block_snapshots_or_alerts() {
        let mut fx = fixture();
        fx.store.set_fail_inserts(true);
        let frame = test_frame();

        let event = fx.router.route(&frame, "no_id", 0.42);

        // Sentinel id, but all three snapshots and the alert still happen.
        assert_eq!(event.record_id, 0);
        assert_eq!(files_in(fx.root.path(), Partition::Unidentified), 1);
        assert_eq!(files_in(fx.root.path(), Partition::Admin), 1);
        assert_eq!(files_in(fx.root.path(), Partition::Guard), 1);
        assert_eq!(fx.sink.notices().len(), 1);
    }

    #[test]
    fn snapshot_failure_does_not_block_the_store_or_alerts() {
        let fx = fixture();
        let Fixture {
            mut router,
            store,
            sink,
            root,
        } = fx;
        // Knock out the category partition after bootstrap.
        std::fs::remove_dir_all(root.path().join(Partition::Identified.dir_name())).unwrap();

        let event = router.route(&test_frame(), "id", 0.9);

        assert!(event.snapshot_path.is_none());
        let rows = store.detections();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].image_path, "");
        assert!(event.record_id > 0);
        assert_eq!(sink.notices().len(), 1);
    }

    #[test]
    fn multiple_detections_in_one_frame_are_fully_independent() {
        let mut fx = fixture();
        let frame = test_frame();

        // Two boxes from the same inference cycle, engine order preserved.
        let first = fx.router.route(&frame, "id", 0.91);
        let second = fx.router.route(&frame, "no_id", 0.42);

        assert_eq!(second.sequence, first.sequence + 1);
        assert_eq!(files_in(fx.root.path(), Partition::Identified), 1);
        assert_eq!(files_in(fx.root.path(), Partition::Unidentified), 1);
        assert_eq!(files_in(fx.root.path(), Partition::Admin), 2);
        assert_eq!(files_in(fx.root.path(), Partition::Guard), 2);
        assert_eq!(fx.store.detections().len(), 2);

        let notices = fx.sink.notices();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].category, Category::Identified);
        assert_eq!(notices[1].category, Category::Unidentified);
    }
}
