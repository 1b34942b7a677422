// In crates/events/src/lib.rs

use chrono::{DateTime, Utc};
use core_types::TradeRecord;
use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    /// Needs an operator, e.g. a close that could not be placed.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("INFO"),
            Severity::Warning => f.write_str("WARNING"),
            Severity::Critical => f.write_str("CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything the engine tells the outside world about.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    TradeRecorded(Box<TradeRecord>),
    Alert(Alert),
}

/// Fan-out of engine events to any number of listeners.
///
/// Publishing never blocks and never fails; with no subscribers the event is dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn record(&self, record: &TradeRecord) {
        let _ = self.tx.send(EngineEvent::TradeRecorded(Box::new(record.clone())));
    }

    pub fn alert(&self, severity: Severity, message: impl Into<String>, timestamp: DateTime<Utc>) {
        let message = message.into();
        match severity {
            Severity::Critical => tracing::error!(%message, "ALERT"),
            Severity::Warning => tracing::warn!(%message, "ALERT"),
            Severity::Info => tracing::info!(%message, "ALERT"),
        }
        let _ = self.tx.send(EngineEvent::Alert(Alert { severity, message, timestamp }));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
