//! Unified error types for the kubetrace workspace.
//!
//! Per-container attach/detach failures live in `kubetrace-ebpf` and never
//! cross the attachment controller; everything that can abort a run is a
//! variant here.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum KubetraceError {
    /// A user-facing parameter failed validation.
    #[error("invalid value for parameter {key:?}: {message}")]
    Validation {
        /// Parameter key that was rejected.
        key: String,
        /// Description of the expected format.
        message: String,
    },

    /// The container registry or filter manager could not provide a resource.
    #[error("{operation}: {message}")]
    Resource {
        /// Operation that failed (e.g. "adding tracer").
        operation: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is missing or invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// An operation was called in a lifecycle phase that does not allow it.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the violated transition.
        message: String,
    },

    /// A record could not be delivered to a downstream sink.
    #[error("publishing failed: {message}")]
    Publish {
        /// Description of the delivery failure.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl KubetraceError {
    /// Builds a [`KubetraceError::Resource`] from any displayable cause.
    pub fn resource(operation: &'static str, cause: impl std::fmt::Display) -> Self {
        Self::Resource {
            operation,
            message: cause.to_string(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, KubetraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_parameter() {
        let err = KubetraceError::Validation {
            key: "selector".into(),
            message: "bad".into(),
        };
        assert_eq!(err.to_string(), "invalid value for parameter \"selector\": bad");
    }

    #[test]
    fn resource_error_prefixes_operation() {
        let err = KubetraceError::resource("adding tracer", "registry unavailable");
        assert_eq!(err.to_string(), "adding tracer: registry unavailable");
    }
}
