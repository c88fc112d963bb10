//! Unified error types for the layerbox workspace.
//!
//! Every library crate returns [`LayerboxError`]. Teardown problems are never
//! errors: they travel as [`crate::types::TeardownWarning`] values instead.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum LayerboxError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value or request is invalid.
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

    /// The kernel rejected a system call.
    #[error("{operation} failed (errno {errno}): {description}")]
    Kernel {
        /// The attempted operation, including its arguments.
        operation: String,
        /// Raw error number returned by the kernel.
        errno: i32,
        /// Human-readable description of the error number.
        description: String,
    },

    /// Host or container network wiring failed.
    #[error("network error: {message}")]
    Network {
        /// Description of the failure.
        message: String,
    },

    /// An image's parent chain cannot be resolved into a layer stack.
    #[error("corrupt image chain at {id}: {message}")]
    CorruptImageChain {
        /// Image at which the problem was detected.
        id: String,
        /// Description of the problem.
        message: String,
    },

    /// A hash validation failed.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected hash value.
        expected: String,
        /// Actual computed hash value.
        actual: String,
    },

    /// A permission or privilege error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// The image registry returned an unusable response.
    #[error("registry error: {message}")]
    Registry {
        /// Description of the failure.
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

impl LayerboxError {
    /// Builds an [`LayerboxError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the raw OS error number carried by this error, if any.
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } => Some(*errno),
            Self::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, LayerboxError>;
