//! Error types for Devbox.

use std::time::Duration;

use thiserror::Error;

use crate::types::RebuildStep;

/// Result type alias using Devbox's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Devbox.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Container Engine Errors
    // =========================================================================
    #[error("Container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Image unavailable: {0}")]
    ImageUnavailable(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // =========================================================================
    // Workspace Errors
    // =========================================================================
    #[error("Invalid path: {0}")]
    PathInvalid(String),

    #[error("Workspace mirror missing for sandbox {0}")]
    MirrorMissing(String),

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    // =========================================================================
    // Execution Errors
    // =========================================================================
    #[error("Command '{command}' in sandbox {sandbox} timed out after {timeout:?}")]
    ExecutionTimeout {
        sandbox: String,
        command: String,
        timeout: Duration,
    },

    #[error("Rebuild of sandbox {sandbox} failed at step '{step}': {source}")]
    RebuildFailed {
        sandbox: String,
        step: RebuildStep,
        #[source]
        source: Box<Error>,
    },

    #[error("Rebuild already in progress for sandbox {0}")]
    RebuildInProgress(String),

    // =========================================================================
    // Configuration / Template Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template hydration error: {0}")]
    Template(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an engine-unavailable error.
    pub fn engine_unavailable(msg: impl Into<String>) -> Self {
        Self::EngineUnavailable(msg.into())
    }

    /// Create an image-unavailable error.
    pub fn image_unavailable(msg: impl Into<String>) -> Self {
        Self::ImageUnavailable(msg.into())
    }

    /// Create a generic lifecycle error.
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid path error.
    pub fn path_invalid(msg: impl Into<String>) -> Self {
        Self::PathInvalid(msg.into())
    }

    /// Create a mirror-missing error.
    pub fn mirror_missing(sandbox: impl Into<String>) -> Self {
        Self::MirrorMissing(sandbox.into())
    }

    /// Create a transfer error.
    pub fn transfer_failed(msg: impl Into<String>) -> Self {
        Self::TransferFailed(msg.into())
    }

    /// Create a gateway error.
    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EngineUnavailable(_) => "ENGINE_UNAVAILABLE",
            Self::ImageUnavailable(_) => "IMAGE_UNAVAILABLE",
            Self::Engine(_) => "ENGINE_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::PathInvalid(_) => "PATH_INVALID",
            Self::MirrorMissing(_) => "MIRROR_MISSING",
            Self::TransferFailed(_) => "TRANSFER_FAILED",
            Self::ExecutionTimeout { .. } => "EXECUTION_TIMEOUT",
            Self::RebuildFailed { .. } => "REBUILD_FAILED",
            Self::RebuildInProgress(_) => "REBUILD_IN_PROGRESS",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Template(_) => "TEMPLATE_ERROR",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may reasonably retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransferFailed(_)
                | Self::ExecutionTimeout { .. }
                | Self::Engine(_)
                | Self::RebuildFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::path_invalid("../x").code(), "PATH_INVALID");
        assert_eq!(Error::mirror_missing("abc").code(), "MIRROR_MISSING");
        assert_eq!(
            Error::ExecutionTimeout {
                sandbox: "abc".into(),
                command: "sleep 60".into(),
                timeout: Duration::from_secs(30),
            }
            .code(),
            "EXECUTION_TIMEOUT"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::transfer_failed("interrupted").is_retryable());
        assert!(Error::engine("stop rejected").is_retryable());
        assert!(!Error::path_invalid("/etc/passwd").is_retryable());
        assert!(!Error::image_unavailable("node:18").is_retryable());
    }

    #[test]
    fn test_rebuild_failure_names_step() {
        let err = Error::RebuildFailed {
            sandbox: "abc".into(),
            step: RebuildStep::Install,
            source: Box::new(Error::engine("npm not found")),
        };
        let msg = err.to_string();
        assert!(msg.contains("install"));
        assert!(msg.contains("npm not found"));
    }
}
