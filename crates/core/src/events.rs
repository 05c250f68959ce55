//! Audit events for sandbox operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One audited operation, as handed to an [`crate::traits::EventEmitter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    pub sandbox_id: Option<String>,
    /// Component that produced the event, e.g. `sandbox-service`.
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub severity: EventSeverity,
    /// One of the payload structs below, serialized.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sandbox_id: None,
            actor: "system".to_string(),
            timestamp: Utc::now(),
            event_type,
            severity: EventSeverity::Info,
            payload,
        }
    }

    pub fn with_sandbox(mut self, sandbox_id: &str) -> Self {
        self.sandbox_id = Some(sandbox_id.to_string());
        self
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Sandbox created and running
    SandboxCreated,
    /// Sandbox started
    SandboxStarted,
    /// Sandbox stopped
    SandboxStopped,
    /// Sandbox and its mirror removed
    SandboxRemoved,
    /// Mirror file written
    FsWrite,
    /// Mirror file deleted
    FsDelete,
    /// Mirror pushed into the sandbox
    SyncCompleted,
    /// Command finished inside the sandbox
    ExecFinished,
    /// Rebuild pipeline finished (successfully or not)
    RebuildFinished,
    /// System error or exception
    SystemError,
    /// Generic/Other event
    Other(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// Payloads

#[derive(Serialize, Deserialize)]
pub struct LifecyclePayload {
    pub name: Option<String>,
    pub port: Option<u16>,
    pub image: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct ExecPayload {
    pub command: String,
    pub output_bytes: Option<u64>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct FsPayload {
    pub path: String,
    /// `write` or `delete`.
    pub operation: String,
    pub size_bytes: Option<u64>,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct SyncPayload {
    pub archive_bytes: u64,
}

#[derive(Serialize, Deserialize)]
pub struct RebuildPayload {
    pub port: u16,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_builders() {
        let event = EventEnvelope::new(
            EventType::SyncCompleted,
            serde_json::to_value(SyncPayload { archive_bytes: 2048 }).unwrap(),
        )
        .with_sandbox("abc123")
        .with_actor("sandbox-service")
        .with_severity(EventSeverity::Warning);

        assert_eq!(event.sandbox_id.as_deref(), Some("abc123"));
        assert_eq!(event.actor, "sandbox-service");
        assert_eq!(event.payload["archive_bytes"], 2048);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "SYNC_COMPLETED");
        assert_eq!(json["severity"], "WARNING");
    }
}
