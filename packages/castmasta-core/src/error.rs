//! Centralized error types for the CastMasta core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Separates caller mistakes (validation, ordering) from device faults
//! - Attaches the device identifier and operation to every device fault

use thiserror::Error;

use crate::device::{DeviceType, SubProtocol};

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths (CLI output, MCP tool results, logs).
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Opaque failure reported by a device-protocol capability provider.
///
/// Providers have their own error types; this layer only needs to know that
/// the call failed and what the provider said about it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    message: String,
}

impl ProviderError {
    /// Creates a provider error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the provider's failure text.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ProviderError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ProviderError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Convenient Result alias for capability-provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Application-wide error type for CastMasta.
#[derive(Debug, Error)]
pub enum CastError {
    /// Caller input was rejected before any network or subprocess call.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// No backend is connected under this identifier.
    #[error("Device '{0}' not connected")]
    NotConnected(String),

    /// Pairing completion was requested without a prior initiation.
    #[error("No active pairing session for {identifier} ({sub_protocol}). Call pair() first.")]
    NoActiveSession {
        identifier: String,
        sub_protocol: SubProtocol,
    },

    /// The resolved device type does not offer this capability.
    #[error("{operation} is not supported on {device_type} devices")]
    UnsupportedOperation {
        operation: &'static str,
        device_type: DeviceType,
    },

    /// Device unreachable, not found, or rejected the session.
    #[error("Connection to {identifier} failed: {message}")]
    Connection { identifier: String, message: String },

    /// The device accepted media but never reported active playback.
    #[error("Playback did not start on {identifier}: {message}")]
    PlaybackStart { identifier: String, message: String },

    /// A capability-provider call failed during an operation.
    #[error("{operation} failed on {identifier}: {message}")]
    Device {
        identifier: String,
        operation: &'static str,
        message: String,
    },

    /// Credential file could not be written.
    #[error("Failed to persist credentials: {0}")]
    Persistence(String),

    /// The local media bridge could not start or serve.
    #[error("Media bridge error: {0}")]
    Bridge(String),

    /// External media conversion (ffmpeg, piper) failed.
    #[error("Media conversion failed: {0}")]
    Conversion(String),

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error (worker panicked or was cancelled).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ErrorCode for CastError {
    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotConnected(_) => "not_connected",
            Self::NoActiveSession { .. } => "no_active_session",
            Self::UnsupportedOperation { .. } => "unsupported_operation",
            Self::Connection { .. } => "connection_failed",
            Self::PlaybackStart { .. } => "playback_start_failed",
            Self::Device { .. } => "device_error",
            Self::Persistence(_) => "persistence_failed",
            Self::Bridge(_) => "media_bridge_error",
            Self::Conversion(_) => "conversion_failed",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl CastError {
    /// Returns true for errors caused by the caller rather than a device.
    ///
    /// Front ends use this to decide between "fix your input" and
    /// "the device said no" messaging.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::NotConnected(_)
                | Self::NoActiveSession { .. }
                | Self::UnsupportedOperation { .. }
        )
    }

    /// Wraps a provider failure with the device and operation it happened on.
    pub(crate) fn device(identifier: &str, operation: &'static str, err: ProviderError) -> Self {
        Self::Device {
            identifier: identifier.to_string(),
            operation,
            message: err.message,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type CastResult<T> = Result<T, CastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_active_session_has_distinct_code() {
        let err = CastError::NoActiveSession {
            identifier: "dev1".into(),
            sub_protocol: SubProtocol::AirPlay,
        };
        assert_eq!(err.code(), "no_active_session");
        assert!(err.is_caller_error());
        assert!(err.to_string().contains("dev1"));
    }

    #[test]
    fn device_error_carries_identifier_and_operation() {
        let err = CastError::device("dev1", "pause", ProviderError::new("socket closed"));
        assert_eq!(err.code(), "device_error");
        assert!(!err.is_caller_error());
        assert_eq!(err.to_string(), "pause failed on dev1: socket closed");
    }

    #[test]
    fn unsupported_operation_names_device_type() {
        let err = CastError::UnsupportedOperation {
            operation: "send_key",
            device_type: DeviceType::GoogleCast,
        };
        assert_eq!(
            err.to_string(),
            "send_key is not supported on googlecast devices"
        );
    }
}
