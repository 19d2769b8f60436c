//! Error types for Andor SDK3 operations.
//!
//! Callers must be able to tell "no data yet" (timeout) apart from "data lost"
//! (overflow), "malformed data" (decode errors) and "hardware/link fault"
//! (device communication errors), so each of these has its own variant and a
//! classification helper.

use std::time::Duration;
use thiserror::Error;

use crate::components::sdk::SdkError;

/// Result type alias for Andor operations.
pub type Result<T> = std::result::Result<T, AndorError>;

/// Errors that can occur when driving an Andor SDK3 camera.
#[derive(Error, Debug, Clone)]
pub enum AndorError {
    /// The binding reported a hardware or communication fault.
    #[error("Device communication error: {0}")]
    DeviceComm(#[from] SdkError),

    /// A wait exceeded its deadline without the awaited frame arriving.
    #[error("Timed out after {waited:?} waiting for a frame")]
    Timeout {
        /// How long the wait lasted
        waited: Duration,
    },

    /// A hardware buffer overflow was detected under the `error` policy.
    #[error("Buffer overflow: the camera ran out of queued buffers")]
    Overflow,

    /// Payload length does not match `stride * height`.
    #[error("Frame size mismatch: expected {expected} bytes (+<8 slack), got {actual}")]
    SizeMismatch {
        /// `stride * height`
        expected: usize,
        /// Payload bytes found
        actual: usize,
    },

    /// Row stride is too small for the row width.
    #[error("Row stride {stride} is smaller than the minimum {min} bytes")]
    Stride {
        /// Reported stride in bytes
        stride: usize,
        /// Bytes one row of pixels needs
        min: usize,
    },

    /// Metadata was enabled but the buffer carries no image chunk (id 0).
    #[error("Frame buffer carries no image data chunk")]
    MissingImageData,

    /// `BytesPerPixel` is not one of 1, 1.5, 2 or 4.
    #[error("Unsupported pixel format: {bytes_per_pixel} bytes per pixel")]
    UnsupportedPixelFormat {
        /// Reported `BytesPerPixel`
        bytes_per_pixel: f64,
    },

    /// Trailing metadata chunks do not add up to the buffer length.
    #[error("Malformed metadata: {message}")]
    MalformedMetadata {
        /// What did not add up
        message: String,
    },

    /// The device rejected a buffer submission while allocating the ring.
    #[error("Failed to queue ring buffer {slot}: {source}")]
    Allocation {
        /// Ring slot that was rejected
        slot: usize,
        /// Binding error
        #[source]
        source: SdkError,
    },

    /// The device returned a buffer whose size differs from the ring's frame size.
    #[error("Dequeued buffer size {actual} does not match frame size {expected}")]
    BufferSizeMismatch {
        /// Ring frame size
        expected: usize,
        /// Size the device reported
        actual: usize,
    },

    /// The ring slot no longer holds the requested frame.
    #[error("Frame {index} is no longer held by the ring (slot holds {held:?})")]
    StaleFrame {
        /// Requested frame
        index: u64,
        /// Frame the slot holds, `None` while the device owns it
        held: Option<u64>,
    },

    /// The polling thread terminated on an unrecoverable error.
    #[error("Acquisition aborted: {message}")]
    AcquisitionAborted {
        /// Error that stopped the loop
        message: String,
    },

    /// Operation not valid in the current engine state.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// What was attempted
        message: String,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {message}")]
    Config {
        /// What is wrong with the configuration
        message: String,
    },
}

impl AndorError {
    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// No data yet: the wait simply ran out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Data lost to a hardware buffer overflow.
    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::Overflow)
    }

    /// Raw buffer contents disagree with the declared geometry.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::SizeMismatch { .. }
                | Self::Stride { .. }
                | Self::MissingImageData
                | Self::UnsupportedPixelFormat { .. }
                | Self::MalformedMetadata { .. }
        )
    }

    /// Hardware or link fault reported by the SDK, directly or via the polling thread.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::DeviceComm(_)
                | Self::Allocation { .. }
                | Self::BufferSizeMismatch { .. }
                | Self::AcquisitionAborted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AndorError::Stride { stride: 10, min: 12 };
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains("12"));
    }

    #[test]
    fn test_error_classification() {
        let timeout = AndorError::Timeout {
            waited: Duration::from_millis(5),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_overflow());
        assert!(!timeout.is_decode_error());

        assert!(AndorError::Overflow.is_overflow());
        assert!(AndorError::MissingImageData.is_decode_error());

        let comm: AndorError = SdkError::new("AT_GetInt", 17).into();
        assert!(comm.is_device_error());
        assert!(!comm.is_timeout());
    }
}
