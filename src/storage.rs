//! Detection and feedback persistence.
//!
//! The pipeline only ever asks two things of its store: insert a detection
//! record (returning its identifier) and insert an operator feedback
//! record. Transaction semantics, schema migration, and connection
//! management stay behind the [`DetectionStore`] trait.
//!
//! Stores are best-effort collaborators: an insert failure is absorbed by
//! the router (the event carries record id 0) and must never stall
//! snapshots or alerts.

use anyhow::Result;
use rusqlite::{params, Connection, OpenFlags};
use std::sync::{Arc, Mutex};

use crate::Category;

/// Payload for one detection row.
#[derive(Clone, Debug)]
pub struct NewDetection {
    pub camera_id: u32,
    /// Confidence score in [0, 1].
    pub confidence: f32,
    pub category: Category,
    /// Path of the category-partition snapshot, empty when the write failed.
    pub image_path: String,
    /// Wall-clock capture time, "%Y-%m-%d %H:%M:%S".
    pub captured_at: String,
}

pub trait DetectionStore: Send {
    /// Insert a detection record and return its store-assigned identifier.
    fn insert_detection(&mut self, detection: &NewDetection) -> Result<i64>;

    /// Insert an operator feedback/incident record for a detection.
    fn insert_feedback(
        &mut self,
        detection_id: i64,
        user_id: i64,
        category: &str,
        notes: &str,
    ) -> Result<()>;
}

// ----------------------------------------------------------------------------
// SQLite store
// ----------------------------------------------------------------------------

pub struct SqliteDetectionStore {
    conn: Connection,
}

impl SqliteDetectionStore {
    /// Open (or create) the detection database. `file:` URIs are honored so
    /// tests can share an in-memory database across connections.
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = if db_path.starts_with("file:") {
            Connection::open_with_flags(
                db_path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI,
            )?
        } else {
            Connection::open(db_path)?
        };
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detections (
              detection_id INTEGER PRIMARY KEY AUTOINCREMENT,
              camera_id INTEGER NOT NULL,
              confidence REAL NOT NULL,
              category TEXT NOT NULL,
              image_path TEXT NOT NULL,
              captured_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS feedback (
              feedback_id INTEGER PRIMARY KEY AUTOINCREMENT,
              detection_id INTEGER NOT NULL,
              user_id INTEGER NOT NULL,
              category TEXT NOT NULL,
              notes TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detections_captured
              ON detections(captured_at);
            CREATE INDEX IF NOT EXISTS idx_feedback_detection
              ON feedback(detection_id);
            "#,
        )?;
        Ok(())
    }

    /// Total number of persisted detections. Used for health logging.
    pub fn detection_count(&self) -> Result<i64> {
        let count =
            self.conn
                .query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl DetectionStore for SqliteDetectionStore {
    fn insert_detection(&mut self, detection: &NewDetection) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO detections(camera_id, confidence, category, image_path, captured_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                detection.camera_id,
                detection.confidence as f64,
                detection.category.as_str(),
                detection.image_path,
                detection.captured_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_feedback(
        &mut self,
        detection_id: i64,
        user_id: i64,
        category: &str,
        notes: &str,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO feedback(detection_id, user_id, category, notes) VALUES (?1, ?2, ?3, ?4)",
            params![detection_id, user_id, category, notes],
        )?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// In-memory store for tests
// ----------------------------------------------------------------------------

#[derive(Default)]
struct InMemoryInner {
    detections: Vec<NewDetection>,
    feedback: Vec<(i64, i64, String, String)>,
    fail_inserts: bool,
}

/// In-memory store. Clones share the same rows, so a test can keep a handle
/// for inspection after moving the store into the router.
#[derive(Clone, Default)]
pub struct InMemoryDetectionStore {
    inner: Arc<Mutex<InMemoryInner>>,
}

impl InMemoryDetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make every subsequent insert fail. Exercises the router's
    /// partial-failure independence.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.lock().fail_inserts = fail;
    }

    pub fn detections(&self) -> Vec<NewDetection> {
        self.lock().detections.clone()
    }

    pub fn feedback_count(&self) -> usize {
        self.lock().feedback.len()
    }
}

impl DetectionStore for InMemoryDetectionStore {
    fn insert_detection(&mut self, detection: &NewDetection) -> Result<i64> {
        let mut inner = self.lock();
        if inner.fail_inserts {
            anyhow::bail!("simulated store failure");
        }
        inner.detections.push(detection.clone());
        Ok(inner.detections.len() as i64)
    }

    fn insert_feedback(
        &mut self,
        detection_id: i64,
        user_id: i64,
        category: &str,
        notes: &str,
    ) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_inserts {
            anyhow::bail!("simulated store failure");
        }
        inner
            .feedback
            .push((detection_id, user_id, category.to_string(), notes.to_string()));
        Ok(())
    }
}
