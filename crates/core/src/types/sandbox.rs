//! Sandbox identity, state, and lifecycle data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Engine-assigned identifier of a sandbox. Never changes across start/stop.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxId(pub String);

impl SandboxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SandboxId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SandboxId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle state of a sandbox.
///
/// ```text
/// Creating -> Running -> { Stopped <-> Running } -> Removing -> Removed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Creating,
    Running,
    Stopped,
    Removing,
    Removed,
}

impl SandboxState {
    /// Map a container engine status string (`created`, `running`, `exited`, ...).
    pub fn from_engine_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "created" => Self::Creating,
            "running" | "restarting" => Self::Running,
            "removing" => Self::Removing,
            "" => Self::Removed,
            // exited, paused, dead
            _ => Self::Stopped,
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SandboxState) -> bool {
        use SandboxState::*;
        matches!(
            (self, next),
            (Creating, Running)
                | (Running, Stopped)
                | (Stopped, Running)
                | (Creating, Removing)
                | (Running, Removing)
                | (Stopped, Removing)
                | (Removing, Removed)
        )
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Removing => "removing",
            Self::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// An isolated execution environment for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sandbox {
    pub id: SandboxId,
    pub name: String,
    pub state: SandboxState,
    /// Host port bound for the dev server. Stable for the sandbox's lifetime.
    pub port: u16,
    /// Fixed path inside the sandbox where the workspace is unpacked.
    pub working_root: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Steps of the rebuild pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildStep {
    StopDevServer,
    Sync,
    Install,
    LaunchDevServer,
}

impl std::fmt::Display for RebuildStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StopDevServer => "stop dev server",
            Self::Sync => "sync",
            Self::Install => "install",
            Self::LaunchDevServer => "launch dev server",
        };
        f.write_str(s)
    }
}

/// One progress event observed while pulling an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullProgress {
    pub image: String,
    pub status: String,
    pub progress: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_status_mapping() {
        assert_eq!(SandboxState::from_engine_status("created"), SandboxState::Creating);
        assert_eq!(SandboxState::from_engine_status("running"), SandboxState::Running);
        assert_eq!(SandboxState::from_engine_status("exited"), SandboxState::Stopped);
        assert_eq!(SandboxState::from_engine_status("paused"), SandboxState::Stopped);
        assert_eq!(SandboxState::from_engine_status("removing"), SandboxState::Removing);
    }

    #[test]
    fn test_transitions() {
        use SandboxState::*;
        assert!(Creating.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Running));
        assert!(Running.can_transition_to(Removing));
        assert!(Removing.can_transition_to(Removed));

        assert!(!Removed.can_transition_to(Running));
        assert!(!Removing.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Creating));
    }

    #[test]
    fn test_sandbox_serializes_camel_case() {
        let sandbox = Sandbox {
            id: SandboxId::new("abc"),
            name: "ai-dev-calc-1".into(),
            state: SandboxState::Running,
            port: 41234,
            working_root: "/app".into(),
            created_at: None,
        };
        let json = serde_json::to_value(&sandbox).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["state"], "running");
        assert_eq!(json["workingRoot"], "/app");
        assert!(json.get("createdAt").is_some());
    }
}
