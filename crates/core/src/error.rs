//! Error types for the tensor column store
//!
//! This module defines all recoverable error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Conditions that can only arise from a bug in the encode/compact logic are
//! not represented here; they go through [`invariant_violation`], which logs
//! and terminates the process.

use std::fmt::Display;
use std::io;
use thiserror::Error;

/// Result type alias for tensor column operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the tensor column store
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations during save/load)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A tensor was assigned to a column with an incompatible type
    #[error("Field tensor type is '{expected}' but other tensor type is '{actual}'")]
    WrongTensorType {
        /// Declared type of the column
        expected: String,
        /// Type of the rejected value
        actual: String,
    },

    /// Malformed wire bytes (impossible lengths, truncated buffers)
    #[error("Corrupt tensor encoding: {0}")]
    CorruptEncoding(String),

    /// Persisted column carries a version tag we do not understand
    #[error("Unsupported tensor attribute version {version}, expected {expected}")]
    UnsupportedVersion {
        /// Version found in the file
        version: u32,
        /// Version this build reads and writes
        expected: u32,
    },

    /// A tensor type specification could not be parsed
    #[error("Invalid tensor type: {0}")]
    InvalidType(String),

    /// Invalid argument supplied by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be parsed or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// All buffer ids of the data store are in use
    #[error("Data store is full: no free buffer id (max {max_buffers})")]
    StoreFull {
        /// Number of buffer ids the handle format can address
        max_buffers: u32,
    },
}

impl Error {
    /// Create a corrupt-encoding error
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Error::CorruptEncoding(detail.into())
    }

    /// Check whether this error was caused by bad input bytes
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::CorruptEncoding(_) | Error::UnsupportedVersion { .. }
        )
    }
}

/// Report an internal-consistency failure and terminate the process.
///
/// Used for conditions that cannot happen under correct encode and compact
/// logic, such as a validated block whose label stream no longer parses.
/// Continuing would risk serving corrupted tensors.
#[cold]
#[inline(never)]
pub fn invariant_violation(detail: impl Display) -> ! {
    tracing::error!(target: "tensorcol::invariant", "{}", detail);
    std::process::abort()
}
