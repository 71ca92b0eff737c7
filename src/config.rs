use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::StreamConfig;

const DEFAULT_DB_PATH: &str = "sentinel.db";
const DEFAULT_CAMERA_ID: u32 = 1;
const DEFAULT_OUTPUT_ROOT: &str = "output";
const DEFAULT_STREAM_URL: &str = "stub://front_gate";
const DEFAULT_STREAM_FPS: u32 = 10;
const DEFAULT_STREAM_WIDTH: u32 = 640;
const DEFAULT_STREAM_HEIGHT: u32 = 384;
const DEFAULT_ALERT_COOLDOWN_SECS: u64 = 0;
const DEFAULT_RENDER_INTERVAL_MS: u64 = 33;

#[derive(Debug, Deserialize, Default)]
struct SentineldConfigFile {
    db_path: Option<String>,
    camera_id: Option<u32>,
    output_root: Option<String>,
    stream: Option<StreamConfigFile>,
    alerts: Option<AlertConfigFile>,
    render_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SentineldConfig {
    pub db_path: String,
    pub camera_id: u32,
    pub output_root: PathBuf,
    pub stream: StreamSettings,
    /// Zero disables alert cooldown gating entirely.
    pub alert_cooldown: Duration,
    pub render_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl SentineldConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit config file path (or defaults when `None`),
    /// then apply environment overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentineldConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let camera_id = file.camera_id.unwrap_or(DEFAULT_CAMERA_ID);
        let output_root = PathBuf::from(
            file.output_root
                .unwrap_or_else(|| DEFAULT_OUTPUT_ROOT.to_string()),
        );
        let stream = StreamSettings {
            url: file
                .stream
                .as_ref()
                .and_then(|stream| stream.url.clone())
                .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            target_fps: file
                .stream
                .as_ref()
                .and_then(|stream| stream.target_fps)
                .unwrap_or(DEFAULT_STREAM_FPS),
            width: file
                .stream
                .as_ref()
                .and_then(|stream| stream.width)
                .unwrap_or(DEFAULT_STREAM_WIDTH),
            height: file
                .stream
                .as_ref()
                .and_then(|stream| stream.height)
                .unwrap_or(DEFAULT_STREAM_HEIGHT),
        };
        let alert_cooldown = Duration::from_secs(
            file.alerts
                .and_then(|alerts| alerts.cooldown_secs)
                .unwrap_or(DEFAULT_ALERT_COOLDOWN_SECS),
        );
        let render_interval = Duration::from_millis(
            file.render_interval_ms
                .unwrap_or(DEFAULT_RENDER_INTERVAL_MS),
        );
        Self {
            db_path,
            camera_id,
            output_root,
            stream,
            alert_cooldown,
            render_interval,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SENTINEL_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(camera_id) = std::env::var("SENTINEL_CAMERA_ID") {
            let parsed: u32 = camera_id
                .parse()
                .map_err(|_| anyhow!("SENTINEL_CAMERA_ID must be a positive integer"))?;
            self.camera_id = parsed;
        }
        if let Ok(root) = std::env::var("SENTINEL_OUTPUT_ROOT") {
            if !root.trim().is_empty() {
                self.output_root = PathBuf::from(root);
            }
        }
        if let Ok(url) = std::env::var("SENTINEL_STREAM_URL") {
            if !url.trim().is_empty() {
                self.stream.url = url;
            }
        }
        if let Ok(cooldown) = std::env::var("SENTINEL_ALERT_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.parse().map_err(|_| {
                anyhow!("SENTINEL_ALERT_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.alert_cooldown = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.camera_id == 0 {
            return Err(anyhow!("camera_id must be greater than zero"));
        }
        if self.stream.url.trim().is_empty() {
            return Err(anyhow!("stream url must not be empty"));
        }
        if self.stream.target_fps == 0 {
            return Err(anyhow!("stream target_fps must be greater than zero"));
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(anyhow!("stream width and height must be non-zero"));
        }
        if self.render_interval.is_zero() {
            return Err(anyhow!("render_interval_ms must be greater than zero"));
        }
        Ok(())
    }

    /// Stream configuration for the camera source.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            url: self.stream.url.clone(),
            target_fps: self.stream.target_fps,
            width: self.stream.width,
            height: self.stream.height,
            stub_frames: None,
        }
    }
}

fn read_config_file(path: &Path) -> Result<SentineldConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
