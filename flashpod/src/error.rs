//! Error types for flashpod.

use std::io;
use thiserror::Error;

/// Result type for flashpod operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for flashpod operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Operation requires an open connection.
    #[error("Not connected to a device")]
    NotConnected,

    /// A port is already attached to this session.
    #[error("Session is already connected; disconnect first")]
    AlreadyConnected,

    /// The transport is held by an in-flight transaction.
    #[error("Transport busy: a command transaction is in flight")]
    Busy,

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The expected reply tag never arrived within the retry bound.
    #[error("Protocol mismatch: no \"{expected}\" reply within {attempts} read attempts")]
    ProtocolMismatch {
        /// The two-character tag that was expected.
        expected: &'static str,
        /// Number of line reads performed before giving up.
        attempts: u32,
    },

    /// Structured reply had malformed fields.
    #[error("Malformed reply: {0}")]
    Format(String),

    /// No suitable device/port was found.
    #[error("Device not found")]
    DeviceNotFound,

    /// Unsupported operation on this platform or build.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}
