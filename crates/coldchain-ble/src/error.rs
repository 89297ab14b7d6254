//! Error types for the BLE device layer

use coldchain_core::{CodecError, Command, DecodeError, DeviceId, Retryable};
use thiserror::Error;

use crate::state::StateTransitionError;

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Link-level failures reported by a transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Link error: {reason}")]
    Io { reason: String },

    #[error("Timed out waiting for the device")]
    Timeout,

    #[error("Device rejected command: {reply}")]
    Nack { reply: String },

    #[error("Device not connected")]
    NotConnected,

    #[error("BLE adapter not available")]
    AdapterUnavailable,
}

impl TransportError {
    pub fn io<T: Into<String>>(reason: T) -> Self {
        TransportError::Io {
            reason: reason.into(),
        }
    }
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Io { .. } | TransportError::Timeout | TransportError::Nack { .. }
        )
    }
}

// ----------------------------------------------------------------------------
// Device Errors
// ----------------------------------------------------------------------------

/// Errors surfaced by the device manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device {device_id} is not connected")]
    NotConnected { device_id: DeviceId },

    #[error("Device {device_id} is not ready")]
    NotReady { device_id: DeviceId },

    #[error("Connection to {device_id} already in progress")]
    AlreadyConnecting { device_id: DeviceId },

    #[error("Device {device_id} is already connected")]
    AlreadyConnected { device_id: DeviceId },

    #[error("Failed to connect to {device_id}: {reason}")]
    ConnectionFailed { device_id: DeviceId, reason: String },

    #[error("Failed to discover capabilities of {device_id}: {reason}")]
    DiscoveryFailed { device_id: DeviceId, reason: String },

    #[error("Command {command} failed after {attempts} attempts: {reason}")]
    CommandFailed {
        command: Command,
        attempts: u32,
        reason: String,
    },

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("Malformed reply: {0}")]
    Decode(#[from] DecodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid transition: {0}")]
    InvalidTransition(#[from] StateTransitionError),
}

impl From<CodecError> for DeviceError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnsupportedCommand { reason } => DeviceError::UnsupportedCommand(reason),
            CodecError::Decode(err) => DeviceError::Decode(err),
        }
    }
}

impl Retryable for DeviceError {
    fn is_retryable(&self) -> bool {
        match self {
            DeviceError::Transport(err) => err.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = core::result::Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::io("gatt").is_retryable());
        assert!(TransportError::Nack { reply: "Err".into() }.is_retryable());
        assert!(!TransportError::NotConnected.is_retryable());
        assert!(!TransportError::AdapterUnavailable.is_retryable());

        let id = DeviceId::new("aa");
        assert!(DeviceError::Transport(TransportError::Timeout).is_retryable());
        assert!(!DeviceError::NotReady { device_id: id.clone() }.is_retryable());
        assert!(!DeviceError::NotConnected { device_id: id }.is_retryable());
        assert!(!DeviceError::Decode(DecodeError::EmptyReply).is_retryable());
    }
}
