//! Operator-facing event stream
//!
//! Sinks are synchronous and never fail: a sink that cannot deliver drops
//! the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    Info,
    Success,
    Warn,
    Error,
}

impl NotifyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyLevel::Info => "info",
            NotifyLevel::Success => "success",
            NotifyLevel::Warn => "warn",
            NotifyLevel::Error => "error",
        }
    }
}

/// Event record handed to sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub level: NotifyLevel,
    pub message: String,
    pub fields: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    pub fn new(level: NotifyLevel, message: impl Into<String>, fields: serde_json::Value) -> Self {
        Self {
            level,
            message: message.into(),
            fields,
            timestamp: Utc::now(),
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn emit(&self, level: NotifyLevel, message: &str, fields: serde_json::Value);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn emit(&self, level: NotifyLevel, message: &str, fields: serde_json::Value) {
        match level {
            NotifyLevel::Info | NotifyLevel::Success => {
                info!(kind = level.as_str(), fields = %fields, "{}", message)
            }
            NotifyLevel::Warn => warn!(fields = %fields, "{}", message),
            NotifyLevel::Error => error!(fields = %fields, "{}", message),
        }
    }
}

/// Logs through `tracing` and publishes on a broadcast channel for
/// external subscribers. Lagging or absent subscribers lose events.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<AgentEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn emit(&self, level: NotifyLevel, message: &str, fields: serde_json::Value) {
        TracingSink.emit(level, message, fields.clone());
        // No receivers is not an error for us
        let _ = self.tx.send(AgentEvent::new(level, message, fields));
    }
}
