//! # Error Handling
//!
//! This module defines the error types used across the crate. Frame-level decode
//! failures live in [`FrameError`], a small value type the poller can log and drop;
//! everything else surfaces as an [`IotError`].

use thiserror::Error;

/// Reasons a Modbus-RTU reply frame is rejected by the decoder.
///
/// These are recoverable: the poller logs them and keeps waiting for a valid reply
/// or for the watchdog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The CRC trailer does not cancel out over the frame.
    #[error("CRC check fail")]
    CrcError,

    /// The reply is not exactly 25 bytes long.
    #[error("RX message length must be 25 bytes")]
    FrameLengthError { actual: usize },

    /// The byte-count field does not announce 10 registers.
    #[error("Number of input registers must be 10")]
    RegisterCountError { registers: usize },

    /// The device answered with an exception (function code other than 0x04).
    #[error("Error Response from device, code: {code}")]
    DeviceErrorResponse { function: u8, code: u8 },
}

/// Represents the different error types that can occur in the appliance.
#[derive(Debug, Error)]
pub enum IotError {
    /// A reply frame failed validation.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// The watchdog expired before the addressed meter answered.
    #[error("No response from meter {device_index} within {timeout_ms} ms")]
    Timeout { device_index: usize, timeout_ms: u64 },

    /// A persisted checkpoint was not signed by the expected identity.
    #[error("Persistent signed data is invalid: expected signer {expected}, got {recovered}")]
    SignatureMismatch { expected: String, recovered: String },

    /// Disk I/O failed while reading or writing checkpoints.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// An outbound metric or mint submission failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Indicates an error related to the serial port communication.
    #[error("Serial port error: {0}")]
    SerialPort(String),

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The signing capability refused or failed to sign.
    #[error("Signing error: {0}")]
    Signing(String),

    /// A catch-all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}

impl From<std::io::Error> for IotError {
    fn from(err: std::io::Error) -> Self {
        IotError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for IotError {
    fn from(err: serde_json::Error) -> Self {
        IotError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for IotError {
    fn from(err: reqwest::Error) -> Self {
        IotError::Network(err.to_string())
    }
}

impl From<tokio_serial::Error> for IotError {
    fn from(err: tokio_serial::Error) -> Self {
        IotError::SerialPort(err.to_string())
    }
}

impl IotError {
    /// Errors that must abort the owning component instead of being logged and retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IotError::SignatureMismatch { .. } | IotError::Config(_) | IotError::Serialization(_)
        )
    }
}
