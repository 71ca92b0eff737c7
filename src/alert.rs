//! Alert emission.
//!
//! Alerts leave the pipeline through the [`AlertSink`] seam: plain
//! message-passing, no UI framework in sight. The daemon wires a channel
//! sink whose receiver is the operator console; tests record into memory.
//!
//! Emission is fire-and-forget. The optional cooldown gates repeats per
//! category; it defaults to disabled, in which case every detection
//! produces exactly one alert.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use crate::{Category, DetectionEvent};

/// One alert as delivered to a sink.
#[derive(Clone, Debug)]
pub struct AlertNotice {
    pub message: String,
    pub category: Category,
}

/// Destination for alert notifications. Delivery mechanism is the sink's
/// concern; the emitter never waits on it.
pub trait AlertSink: Send {
    fn emit(&mut self, message: &str, category: Category);
}

/// Sink that forwards alerts over an mpsc channel.
pub struct ChannelAlertSink {
    tx: Sender<AlertNotice>,
}

impl ChannelAlertSink {
    pub fn new(tx: Sender<AlertNotice>) -> Self {
        Self { tx }
    }
}

impl AlertSink for ChannelAlertSink {
    fn emit(&mut self, message: &str, category: Category) {
        // A hung-up receiver means the console is gone; the alert is lost,
        // not the pipeline.
        let _ = self.tx.send(AlertNotice {
            message: message.to_string(),
            category,
        });
    }
}

/// Sink that writes alerts to the log.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn emit(&mut self, message: &str, category: Category) {
        log::warn!("ALERT [{}] {}", category, message);
    }
}

/// Formats and dispatches alerts for detection events.
pub struct AlertEmitter {
    sink: Box<dyn AlertSink>,
    cooldown: Duration,
    last_emitted: HashMap<Category, Instant>,
}

impl AlertEmitter {
    /// `cooldown` of zero disables gating entirely.
    pub fn new(sink: Box<dyn AlertSink>, cooldown: Duration) -> Self {
        Self {
            sink,
            cooldown,
            last_emitted: HashMap::new(),
        }
    }

    /// Emit an alert for one detection event. Returns false when the
    /// per-category cooldown suppressed it.
    pub fn emit_detection(&mut self, event: &DetectionEvent) -> bool {
        if !self.cooldown.is_zero() {
            if let Some(last) = self.last_emitted.get(&event.category) {
                if last.elapsed() < self.cooldown {
                    log::debug!(
                        "alert suppressed by cooldown: category={} seq={}",
                        event.category,
                        event.sequence
                    );
                    return false;
                }
            }
        }

        let message = format_alert(event);
        self.sink.emit(&message, event.category);
        self.last_emitted.insert(event.category, Instant::now());
        true
    }
}

fn format_alert(event: &DetectionEvent) -> String {
    format!(
        "{} detected | Camera: {} | Det: {}",
        event.category.as_str().to_uppercase(),
        event.camera_id,
        event.sequence
    )
}
