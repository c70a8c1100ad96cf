//! Error types for the connection manager and its host backends.

use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by an [`ExcelHost`](crate::ExcelHost) backend.
#[derive(Debug, Error)]
pub enum HostError {
    /// The automation server could not be reached or created.
    #[error("Excel is not available: {0}")]
    Unavailable(String),

    /// A call into the running application failed.
    #[error("{operation} failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },

    /// The handle is unknown to the host, usually because it was already released.
    #[error("Unknown or released handle: {0}")]
    InvalidHandle(u64),
}

impl HostError {
    pub fn operation(operation: &'static str, message: impl Into<String>) -> Self {
        HostError::Operation {
            operation,
            message: message.into(),
        }
    }
}

/// Errors surfaced by [`ConnectionManager`](crate::ConnectionManager) operations.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("Template workbook not found: {}", .0.display())]
    TemplateMissing(PathBuf),
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// Result alias used by host backends.
pub type HostResult<T> = std::result::Result<T, HostError>;
