//! sentineld - badge-detection daemon
//!
//! This daemon:
//! 1. Opens the camera stream and runs the acquisition/inference workers
//! 2. Classifies every detection and files snapshots into the partitions
//! 3. Records detections in the SQLite store
//! 4. Forwards alerts to the operator console
//! 5. Drives the render publisher on a fixed ~33 ms tick

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use badge_sentinel::config::SentineldConfig;
use badge_sentinel::{
    AlertEmitter, AnnotatedFrame, ChannelAlertSink, DetectionRouter, DisplaySink, InferenceEngine,
    Pipeline, RenderPublisher, SnapshotWriter, SqliteDetectionStore, StubEngine,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,
    /// Stream URL override (e.g. rtsp://camera.local/stream1).
    #[arg(long)]
    stream_url: Option<String>,
    /// Path to an ONNX badge-detection model.
    #[cfg(feature = "backend-tract")]
    #[arg(long, env = "SENTINEL_MODEL")]
    model: Option<PathBuf>,
    /// Class labels for the model, in index order, comma separated.
    #[cfg(feature = "backend-tract")]
    #[arg(long, default_value = "person_with_id,person_without_id")]
    model_labels: String,
}

/// Headless display sink: counts frames and logs the render cadence.
struct ConsoleDisplay {
    frames_shown: u64,
    last_log: Instant,
}

impl ConsoleDisplay {
    fn new() -> Self {
        Self {
            frames_shown: 0,
            last_log: Instant::now(),
        }
    }
}

impl DisplaySink for ConsoleDisplay {
    fn display(&mut self, frame: &AnnotatedFrame) {
        self.frames_shown += 1;
        if self.last_log.elapsed() >= HEALTH_LOG_INTERVAL {
            log::debug!(
                "render: {} frames shown, current frame has {} detection(s)",
                self.frames_shown,
                frame.detection_count
            );
            self.last_log = Instant::now();
        }
    }
}

fn build_engine(args: &Args, cfg: &SentineldConfig) -> Result<Box<dyn InferenceEngine>> {
    #[cfg(feature = "backend-tract")]
    if let Some(model_path) = &args.model {
        let labels: Vec<String> = args
            .model_labels
            .split(',')
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .collect();
        let engine = badge_sentinel::TractEngine::new(
            model_path,
            labels,
            cfg.stream.width,
            cfg.stream.height,
        )?;
        log::info!("inference engine: tract ({})", model_path.display());
        return Ok(Box::new(engine));
    }

    let _ = (args, cfg);
    log::info!("inference engine: stub (scene-change)");
    Ok(Box::new(StubEngine::new()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = SentineldConfig::load_from(args.config.as_deref())?;
    if let Some(url) = &args.stream_url {
        cfg.stream.url = url.clone();
    }

    log::info!(
        "sentineld {} starting: camera={} stream={} db={}",
        env!("CARGO_PKG_VERSION"),
        cfg.camera_id,
        cfg.stream.url,
        cfg.db_path
    );

    let store = SqliteDetectionStore::open(&cfg.db_path)?;
    let snapshots = SnapshotWriter::new(&cfg.output_root)?;
    log::info!("snapshot partitions ready under {}", cfg.output_root.display());

    // Alerts flow over a channel to the operator console thread.
    let (alert_tx, alert_rx) = mpsc::channel();
    let emitter = AlertEmitter::new(Box::new(ChannelAlertSink::new(alert_tx)), cfg.alert_cooldown);
    if cfg.alert_cooldown.is_zero() {
        log::info!("alert cooldown disabled: every detection alerts");
    } else {
        log::info!(
            "alert cooldown: {}s per category",
            cfg.alert_cooldown.as_secs()
        );
    }
    let console = std::thread::spawn(move || {
        for notice in alert_rx {
            log::warn!("ALERT [{}] {}", notice.category, notice.message);
        }
        log::debug!("operator console closed");
    });

    let engine = build_engine(&args, &cfg)?;
    let router = DetectionRouter::new(cfg.camera_id, snapshots, Box::new(store), emitter);
    let handle = Pipeline::new(cfg.stream_config(), engine, router).start()?;
    let monitor = handle.monitor();
    let mut publisher = RenderPublisher::new(handle.render_slot(), Box::new(ConsoleDisplay::new()));

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })?;

    log::info!("sentineld running (Ctrl-C to stop)");
    let mut last_health_log = Instant::now();
    loop {
        match shutdown_rx.recv_timeout(cfg.render_interval) {
            Ok(()) => {
                log::info!("shutdown signal received");
                break;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        publisher.tick();

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = monitor.stats();
            log::info!(
                "health: captured={} processed={} detections={} source_live={}",
                stats.frames_captured,
                stats.frames_processed,
                stats.detections_routed,
                stats.source_live
            );
            last_health_log = Instant::now();
        }

        if !monitor.stats().source_live {
            log::info!("stream ended, shutting down");
            break;
        }
    }

    handle.stop()?;
    // Stopping the pipeline drops the alert sender; the console drains and
    // exits on its own.
    let _ = console.join();
    log::info!("sentineld stopped");
    Ok(())
}
