//! Error types for bundle packaging and backend communication.

use thiserror::Error;

/// Errors that can occur while packing or unpacking label bundles.
#[derive(Error, Debug)]
pub enum BundleError {
    /// I/O error while reading or writing archive bytes
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Zip archive error
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A required archive entry is missing
    #[error("Missing bundle entry: {name}")]
    MissingEntry {
        /// Name of the missing entry
        name: String,
    },

    /// A raw buffer does not match the expected dimensions
    #[error("Buffer size mismatch for {name}: expected {expected} bytes, found {found}")]
    SizeMismatch {
        /// Name of the offending entry
        name: String,
        /// Expected byte count from the declared dimensions
        expected: usize,
        /// Byte count actually present
        found: usize,
    },

    /// Bundle structure or content is invalid
    #[error("Invalid bundle: {message}")]
    InvalidBundle {
        /// Description of the problem
        message: String,
    },
}

impl BundleError {
    /// Create a missing entry error.
    pub fn missing_entry(name: impl Into<String>) -> Self {
        Self::MissingEntry { name: name.into() }
    }

    /// Create a size mismatch error.
    pub fn size_mismatch(name: impl Into<String>, expected: usize, found: usize) -> Self {
        Self::SizeMismatch {
            name: name.into(),
            expected,
            found,
        }
    }

    /// Create an invalid bundle error with a message.
    pub fn invalid_bundle(message: impl Into<String>) -> Self {
        Self::InvalidBundle {
            message: message.into(),
        }
    }
}

/// Errors surfaced by the backend gateway.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Packing or unpacking a bundle failed
    #[error("Bundle error: {0}")]
    Bundle(#[from] BundleError),

    /// The backend answered with a non-success status code
    #[error("Backend returned status {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body or status text
        message: String,
    },

    /// The request never reached the backend
    #[error("Transport error: {0}")]
    Transport(String),
}

impl BackendError {
    /// Create a status error.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Create a transport error from any displayable cause.
    pub fn transport(cause: impl std::fmt::Display) -> Self {
        Self::Transport(cause.to_string())
    }
}

/// Errors that can occur while setting up a session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The HTTP worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
}
