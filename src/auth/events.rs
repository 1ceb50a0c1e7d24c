//! Structured security event log.
//!
//! Events are immutable records routed through `tracing` by severity. Logging
//! is fire-and-forget: a failure to log must never fail the operation that
//! produced the event, so this module exposes no fallible paths.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Write-once audit record. Never mutated or deleted after emission.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub severity: Severity,
    pub properties: serde_json::Value,
}

impl SecurityEvent {
    #[must_use]
    pub fn new(name: &str, severity: Severity, properties: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            name: name.to_string(),
            severity,
            properties,
        }
    }
}

/// Emit a security event and return its id for response correlation.
///
/// Severity picks the output channel: `critical` -> error, `warning` -> warn,
/// `info` -> info.
pub fn log_security_event(name: &str, severity: Severity, properties: serde_json::Value) -> Uuid {
    let event = SecurityEvent::new(name, severity, properties);
    let timestamp = event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);

    match event.severity {
        Severity::Critical => error!(
            security_event = true,
            event_id = %event.id,
            %timestamp,
            name = %event.name,
            properties = %event.properties,
            "security event"
        ),
        Severity::Warning => warn!(
            security_event = true,
            event_id = %event.id,
            %timestamp,
            name = %event.name,
            properties = %event.properties,
            "security event"
        ),
        Severity::Info => info!(
            security_event = true,
            event_id = %event.id,
            %timestamp,
            name = %event.name,
            properties = %event.properties,
            "security event"
        ),
    }

    event.id
}
