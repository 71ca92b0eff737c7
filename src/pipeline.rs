//! Pipeline lifecycle: the two worker loops and their shutdown plumbing.
//!
//! `Pipeline::start` connects the camera source, then spawns the
//! acquisition worker (source -> frame slot) and the inference worker
//! (frame slot -> engine -> router -> render slot). Both loops observe a
//! shared stop flag and exit within one iteration of `PipelineHandle::stop`.
//!
//! State machine: Stopped -> Starting -> Running -> Stopping -> Stopped.
//! Starting falls back to Stopped when the source cannot open its stream;
//! Running is left only through an explicit stop request.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detect::{annotate_frame, InferenceEngine};
use crate::frame::{FrameSlot, RenderSlot};
use crate::ingest::{CameraSource, StreamConfig};
use crate::route::DetectionRouter;

/// How long the inference worker sleeps when the slot is empty.
const IDLE_POLL: Duration = Duration::from_millis(5);

const DEFAULT_SLOW_INFERENCE_WARN: Duration = Duration::from_millis(1_000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl PipelineState {
    fn as_u8(self) -> u8 {
        match self {
            PipelineState::Stopped => 0,
            PipelineState::Starting => 1,
            PipelineState::Running => 2,
            PipelineState::Stopping => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineState::Starting,
            2 => PipelineState::Running,
            3 => PipelineState::Stopping,
            _ => PipelineState::Stopped,
        }
    }
}

#[derive(Default)]
struct Shared {
    state: AtomicU8,
    stop: AtomicBool,
    frames_captured: AtomicU64,
    frames_processed: AtomicU64,
    detections_routed: AtomicU64,
    source_live: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: PipelineState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// Point-in-time counters for health logging.
#[derive(Clone, Copy, Debug)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub detections_routed: u64,
    /// False once the acquisition loop has wound down (end of stream or
    /// read error).
    pub source_live: bool,
}

/// Read-only view of a running pipeline. Cloneable; outlives the handle,
/// so tests and health logs can observe the pipeline after `stop`.
#[derive(Clone)]
pub struct PipelineMonitor {
    shared: Arc<Shared>,
    frame_slot: Arc<FrameSlot>,
    render_slot: RenderSlot,
}

impl PipelineMonitor {
    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_captured: self.shared.frames_captured.load(Ordering::SeqCst),
            frames_processed: self.shared.frames_processed.load(Ordering::SeqCst),
            detections_routed: self.shared.detections_routed.load(Ordering::SeqCst),
            source_live: self.shared.source_live.load(Ordering::SeqCst),
        }
    }

    pub fn frame_slot_is_empty(&self) -> bool {
        self.frame_slot.is_empty()
    }

    /// The slot the render publisher reads from.
    pub fn render_slot(&self) -> RenderSlot {
        self.render_slot.clone()
    }
}

pub struct PipelineHandle {
    shared: Arc<Shared>,
    frame_slot: Arc<FrameSlot>,
    render_slot: RenderSlot,
    acquisition: Option<JoinHandle<()>>,
    inference: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn monitor(&self) -> PipelineMonitor {
        PipelineMonitor {
            shared: self.shared.clone(),
            frame_slot: self.frame_slot.clone(),
            render_slot: self.render_slot.clone(),
        }
    }

    /// The slot the render publisher reads from.
    pub fn render_slot(&self) -> RenderSlot {
        self.render_slot.clone()
    }

    /// Stop both workers and wait for them to exit.
    ///
    /// Workers check the stop flag once per iteration, so an in-flight
    /// inference call may finish, but no new frame is taken afterward. The
    /// frame slot is left empty.
    pub fn stop(mut self) -> Result<()> {
        self.shared.set_state(PipelineState::Stopping);
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.acquisition.take() {
            join.join()
                .map_err(|_| anyhow!("acquisition worker panicked"))?;
        }
        if let Some(join) = self.inference.take() {
            join.join()
                .map_err(|_| anyhow!("inference worker panicked"))?;
        }
        self.frame_slot.clear();
        self.shared.set_state(PipelineState::Stopped);
        Ok(())
    }
}

pub struct Pipeline {
    stream: StreamConfig,
    engine: Box<dyn InferenceEngine>,
    router: DetectionRouter,
    slow_inference_warn: Duration,
}

impl Pipeline {
    pub fn new(
        stream: StreamConfig,
        engine: Box<dyn InferenceEngine>,
        router: DetectionRouter,
    ) -> Self {
        Self {
            stream,
            engine,
            router,
            slow_inference_warn: DEFAULT_SLOW_INFERENCE_WARN,
        }
    }

    /// Inference cycles slower than this are logged with their duration.
    pub fn with_slow_inference_warn(mut self, threshold: Duration) -> Self {
        self.slow_inference_warn = threshold;
        self
    }

    /// Connect the source and spawn both workers.
    ///
    /// Returns an error without spawning anything when the stream cannot be
    /// opened; the pipeline is back in Stopped and the caller reports the
    /// failure.
    pub fn start(mut self) -> Result<PipelineHandle> {
        let shared = Arc::new(Shared::default());
        shared.set_state(PipelineState::Starting);

        let mut source = match CameraSource::new(self.stream.clone())
            .and_then(|mut source| source.connect().map(|()| source))
        {
            Ok(source) => source,
            Err(e) => {
                shared.set_state(PipelineState::Stopped);
                return Err(e.context("open camera stream"));
            }
        };

        if let Err(e) = self.engine.warm_up() {
            log::warn!("engine warm-up failed ({}): {}", self.engine.name(), e);
        }

        let frame_slot = Arc::new(FrameSlot::new());
        let render_slot = RenderSlot::new();
        shared.source_live.store(true, Ordering::SeqCst);
        shared.set_state(PipelineState::Running);

        let frame_interval =
            Duration::from_millis((1_000 / self.stream.target_fps.max(1)).max(1) as u64);
        let acq_shared = shared.clone();
        let acq_slot = frame_slot.clone();
        let acquisition = std::thread::spawn(move || {
            let mut last_health_log = Instant::now();
            while !acq_shared.stop.load(Ordering::SeqCst) {
                match source.next_frame() {
                    Ok(frame) => {
                        acq_slot.publish(frame);
                        acq_shared.frames_captured.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        // End of stream or a read failure winds acquisition
                        // down; inference keeps draining whatever is left.
                        log::info!("acquisition loop ended: {}", e);
                        break;
                    }
                }
                if last_health_log.elapsed() >= Duration::from_secs(5) {
                    let stats = source.stats();
                    log::debug!(
                        "stream health={} frames={} url={}",
                        source.is_healthy(),
                        stats.frames_captured,
                        stats.url
                    );
                    last_health_log = Instant::now();
                }
                std::thread::sleep(frame_interval);
            }
            acq_shared.source_live.store(false, Ordering::SeqCst);
            log::debug!("acquisition worker exited");
        });

        let inf_shared = shared.clone();
        let inf_slot = frame_slot.clone();
        let inf_render = render_slot.clone();
        let mut engine = self.engine;
        let mut router = self.router;
        let slow_warn = self.slow_inference_warn;
        let inference = std::thread::spawn(move || {
            while !inf_shared.stop.load(Ordering::SeqCst) {
                let Some(frame) = inf_slot.take() else {
                    std::thread::sleep(IDLE_POLL);
                    continue;
                };

                let started = Instant::now();
                let detections =
                    match engine.detect(&frame.pixels, frame.width, frame.height) {
                        Ok(detections) => detections,
                        Err(e) => {
                            // One bad frame never terminates the worker.
                            log::warn!("inference failed, skipping frame: {}", e);
                            continue;
                        }
                    };
                let elapsed = started.elapsed();
                if elapsed > slow_warn {
                    log::warn!(
                        "slow inference cycle: {} ms for {} detection(s)",
                        elapsed.as_millis(),
                        detections.len()
                    );
                }

                // Engine order is preserved; each detection fans out fully
                // before the next one starts.
                for detection in &detections {
                    router.route(&frame, &detection.label, detection.confidence);
                    inf_shared.detections_routed.fetch_add(1, Ordering::SeqCst);
                }

                // One annotated frame per processed frame, detections or
                // not, so the render path always has something current.
                inf_render.publish(annotate_frame(&frame, &detections));
                inf_shared.frames_processed.fetch_add(1, Ordering::SeqCst);
            }
            log::debug!(
                "inference worker exited after {} frame(s)",
                inf_shared.frames_processed.load(Ordering::SeqCst)
            );
        });

        Ok(PipelineHandle {
            shared,
            frame_slot,
            render_slot,
            acquisition: Some(acquisition),
            inference: Some(inference),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertEmitter, AlertNotice, ChannelAlertSink};
    use crate::detect::StubEngine;
    use crate::snapshot::SnapshotWriter;
    use crate::storage::InMemoryDetectionStore;
    use std::sync::mpsc::Receiver;

    struct Fixture {
        handle: PipelineHandle,
        store: InMemoryDetectionStore,
        alerts: Receiver<AlertNotice>,
        _root: tempfile::TempDir,
    }

    fn start_pipeline(stream: StreamConfig, engine: StubEngine) -> Fixture {
        let root = tempfile::tempdir().expect("tempdir");
        let snapshots = SnapshotWriter::new(root.path()).expect("snapshot writer");
        let store = InMemoryDetectionStore::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let emitter = AlertEmitter::new(Box::new(ChannelAlertSink::new(tx)), Duration::ZERO);
        let router = DetectionRouter::new(1, snapshots, Box::new(store.clone()), emitter);
        let handle = Pipeline::new(stream, Box::new(engine), router)
            .start()
            .expect("pipeline start");
        Fixture {
            handle,
            store,
            alerts: rx,
            _root: root,
        }
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let started = Instant::now();
        while started.elapsed() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn fast_stub_stream() -> StreamConfig {
        StreamConfig {
            url: "stub://pipeline_test".to_string(),
            target_fps: 200,
            width: 32,
            height: 24,
            stub_frames: None,
        }
    }

    #[test]
    fn start_fails_back_to_stopped_on_bad_source() {
        let stream = StreamConfig {
            // No gstreamer in the test build, so a non-stub URL cannot open.
            url: "rtsp://nonexistent.local/stream1".to_string(),
            ..fast_stub_stream()
        };
        let root = tempfile::tempdir().expect("tempdir");
        let snapshots = SnapshotWriter::new(root.path()).expect("snapshot writer");
        let emitter = AlertEmitter::new(Box::new(crate::alert::LogAlertSink), Duration::ZERO);
        let router = DetectionRouter::new(
            1,
            snapshots,
            Box::new(InMemoryDetectionStore::new()),
            emitter,
        );
        let result = Pipeline::new(stream, Box::new(StubEngine::new()), router).start();

        #[cfg(not(feature = "stream-gstreamer"))]
        assert!(result.is_err());
        #[cfg(feature = "stream-gstreamer")]
        drop(result);
    }

    #[test]
    fn workers_process_frames_until_stopped() {
        let fx = start_pipeline(fast_stub_stream(), StubEngine::new());
        let monitor = fx.handle.monitor();
        assert_eq!(monitor.state(), PipelineState::Running);

        assert!(wait_until(Duration::from_secs(5), || {
            monitor.stats().frames_processed >= 3
        }));

        fx.handle.stop().expect("pipeline stop");
        assert_eq!(monitor.state(), PipelineState::Stopped);
        assert!(monitor.frame_slot_is_empty());

        // No new frames are taken after the stop flag is observed.
        let processed = monitor.stats().frames_processed;
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(monitor.stats().frames_processed, processed);
    }

    #[test]
    fn inference_errors_skip_the_frame_but_keep_the_worker_alive() {
        struct FlakyEngine {
            calls: u32,
        }
        impl InferenceEngine for FlakyEngine {
            fn name(&self) -> &'static str {
                "flaky"
            }
            fn detect(
                &mut self,
                _pixels: &[u8],
                _width: u32,
                _height: u32,
            ) -> Result<Vec<crate::detect::RawDetection>> {
                self.calls += 1;
                if self.calls == 1 {
                    anyhow::bail!("transient model failure");
                }
                Ok(Vec::new())
            }
        }

        let root = tempfile::tempdir().expect("tempdir");
        let snapshots = SnapshotWriter::new(root.path()).expect("snapshot writer");
        let emitter = AlertEmitter::new(Box::new(crate::alert::LogAlertSink), Duration::ZERO);
        let router = DetectionRouter::new(
            1,
            snapshots,
            Box::new(InMemoryDetectionStore::new()),
            emitter,
        );
        let handle = Pipeline::new(
            fast_stub_stream(),
            Box::new(FlakyEngine { calls: 0 }),
            router,
        )
        .start()
        .expect("pipeline start");
        let monitor = handle.monitor();

        // The first frame errors out; later frames still get processed.
        assert!(wait_until(Duration::from_secs(5), || {
            monitor.stats().frames_processed >= 2
        }));
        handle.stop().expect("pipeline stop");
    }

    #[test]
    fn scripted_detections_reach_store_and_alerts() {
        let det = |label: &str, confidence: f32| crate::detect::RawDetection {
            label: label.to_string(),
            confidence,
            bbox: crate::detect::BoundingBox {
                x: 0.1,
                y: 0.1,
                w: 0.2,
                h: 0.2,
            },
        };
        let engine = StubEngine::scripted(vec![vec![det("no_id", 0.77)]]);
        let fx = start_pipeline(fast_stub_stream(), engine);

        assert!(wait_until(Duration::from_secs(5), || {
            fx.store.detections().len() == 1
        }));
        fx.handle.stop().expect("pipeline stop");

        let notice = fx.alerts.try_recv().expect("one alert");
        assert_eq!(notice.category, crate::Category::Unidentified);
    }

    #[test]
    fn render_slot_goes_live_with_the_first_processed_frame() {
        let fx = start_pipeline(fast_stub_stream(), StubEngine::new());
        let render = fx.handle.render_slot();

        assert!(wait_until(Duration::from_secs(5), || {
            render.latest().is_some()
        }));
        fx.handle.stop().expect("pipeline stop");
    }
}
