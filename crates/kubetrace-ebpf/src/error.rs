//! Errors raised by instrumentation instances.

use thiserror::Error;

/// Failure of a per-container instrumentation operation.
#[derive(Debug, Error)]
pub enum EbpfError {
    /// The kernel verifier rejected a program.
    #[error("verifier rejected program {program}")]
    Verifier {
        /// Program that failed verification.
        program: String,
        /// Verifier log output.
        log: String,
    },

    /// Attaching to a container failed.
    #[error("attaching to container {container}: {message}")]
    Attach {
        /// Container the attach targeted.
        container: String,
        /// Description of the failure.
        message: String,
    },

    /// Detaching from a container failed.
    #[error("detaching from container {container}: {message}")]
    Detach {
        /// Container the detach targeted.
        container: String,
        /// Description of the failure.
        message: String,
    },
}

/// Convenience alias for instrumentation results.
pub type Result<T> = std::result::Result<T, EbpfError>;
