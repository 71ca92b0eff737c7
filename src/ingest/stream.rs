//! Camera stream source.
//!
//! `CameraSource` is the Frame Source Adapter: it opens a video stream and
//! hands out frames already normalized to the configured resolution.
//!
//! Backends:
//! - Synthetic (`stub://` URLs): deterministic frames, always available.
//! - GStreamer RTSP (feature: stream-gstreamer): production IP cameras.

#[cfg(feature = "stream-gstreamer")]
use anyhow::Context;
use anyhow::{anyhow, Result};
use chrono::Local;
#[cfg(feature = "stream-gstreamer")]
use std::time::{Duration, Instant};

use super::scale_rgb;
use crate::frame::Frame;

/// Configuration for a camera stream.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Stream URL (e.g., "rtsp://192.168.1.33:554/stream1").
    pub url: String,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    /// Width every frame is normalized to before leaving the adapter.
    pub width: u32,
    /// Height every frame is normalized to before leaving the adapter.
    pub height: u32,
    /// Synthetic sources only: stop after this many frames (end of stream).
    pub stub_frames: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "stub://front_gate".to_string(),
            target_fps: 10,
            width: 640,
            height: 384,
            stub_frames: None,
        }
    }
}

/// Camera frame source.
///
/// Uses GStreamer for real RTSP decode, with a synthetic fallback for
/// `stub://` URLs.
pub struct CameraSource {
    backend: StreamBackend,
}

enum StreamBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "stream-gstreamer")]
    Gstreamer(GstreamerSource),
}

impl CameraSource {
    pub fn new(config: StreamConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("stream width and height must be non-zero"));
        }
        if config.url.starts_with("stub://") {
            Ok(Self {
                backend: StreamBackend::Synthetic(SyntheticSource::new(config)),
            })
        } else {
            #[cfg(feature = "stream-gstreamer")]
            {
                Ok(Self {
                    backend: StreamBackend::Gstreamer(GstreamerSource::new(config)?),
                })
            }
            #[cfg(not(feature = "stream-gstreamer"))]
            {
                anyhow::bail!("RTSP ingestion requires the stream-gstreamer feature")
            }
        }
    }

    /// Open the stream. Failure here is fatal to pipeline start: the caller
    /// must report it and not spawn the worker loops.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            StreamBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "stream-gstreamer")]
            StreamBackend::Gstreamer(source) => source.connect(),
        }
    }

    /// Read and normalize the next frame.
    ///
    /// Errors are recoverable at the pipeline level: the acquisition loop
    /// winds down gracefully on end-of-stream or a read failure.
    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            StreamBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "stream-gstreamer")]
            StreamBackend::Gstreamer(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            StreamBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "stream-gstreamer")]
            StreamBackend::Gstreamer(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> StreamStats {
        match &self.backend {
            StreamBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "stream-gstreamer")]
            StreamBackend::Gstreamer(source) => source.stats(),
        }
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct StreamStats {
    pub frames_captured: u64,
    pub url: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and demos
// ----------------------------------------------------------------------------

struct SyntheticSource {
    config: StreamConfig,
    frame_count: u64,
    /// Simulated "scene" state so consecutive frames differ occasionally.
    scene_state: u8,
}

impl SyntheticSource {
    fn new(config: StreamConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!(
            "CameraSource: connected to {} (synthetic)",
            self.config.url
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if let Some(limit) = self.config.stub_frames {
            if self.frame_count >= limit {
                return Err(anyhow!("end of stream after {} frames", limit));
            }
        }
        self.frame_count += 1;

        // Generate at a fake native resolution, then normalize like a real
        // source would. Exercises the same path production frames take.
        let native_w = self.config.width.saturating_mul(2).max(2);
        let native_h = self.config.height.saturating_mul(2).max(2);
        let pixels = self.generate_synthetic_pixels(native_w, native_h);
        let normalized = scale_rgb(
            &pixels,
            native_w,
            native_h,
            self.config.width,
            self.config.height,
        )?;

        Ok(Frame::new(
            normalized,
            self.config.width,
            self.config.height,
            Local::now(),
        ))
    }

    fn generate_synthetic_pixels(&mut self, width: u32, height: u32) -> Vec<u8> {
        let pixel_count = (width as usize) * (height as usize) * 3;

        // Change scene state occasionally to simulate motion.
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> StreamStats {
        StreamStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "stream-gstreamer")]
struct GstreamerSource {
    config: StreamConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

#[cfg(feature = "stream-gstreamer")]
impl GstreamerSource {
    fn new(config: StreamConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        // max-buffers=1 drop=true keeps the appsink itself from queueing:
        // the latest-frame-only policy starts at the decoder.
        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url
        );
        let pipeline = gstreamer::parse_launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            config,
            pipeline,
            appsink,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
        })
    }

    fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        self.connected_at = Some(Instant::now());
        log::info!("CameraSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.poll_bus();

        let timeout = self.frame_timeout();
        let sample = self
            .appsink
            .try_pull_sample(timeout)
            .context("pull RTSP sample")?
            .ok_or_else(|| anyhow!("RTSP stream stalled"))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        let normalized = scale_rgb(&pixels, width, height, self.config.width, self.config.height)?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        Ok(Frame::new(
            normalized,
            self.config.width,
            self.config.height,
            Local::now(),
        ))
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> StreamStats {
        StreamStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }

    fn frame_timeout(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            500
        } else {
            (1000 / self.config.target_fps).saturating_mul(4)
        };
        Duration::from_millis(base_ms.max(500) as u64)
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }

    fn poll_bus(&mut self) {
        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(Duration::from_millis(0)) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "stream-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride(0) as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
