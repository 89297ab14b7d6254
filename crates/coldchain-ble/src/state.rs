//! Per-device connection state machine
//!
//! States are consumed by `transition`, which either yields the next state or
//! rejects the event. The device manager owns one state per device and is the
//! only caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Connection State Types
// ----------------------------------------------------------------------------

/// Lifecycle of one device connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Never connected
    Idle,
    /// Link establishment in progress
    Connecting,
    /// Link up, services not yet discovered
    Connected,
    /// Service discovery in progress
    Discovering,
    /// Commands may be written and notifications received
    Ready,
    /// Link closed locally or by the device
    Disconnected,
    /// Connect or discovery failed
    Failed { reason: String },
}

/// Events that drive a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    Connect,
    LinkEstablished,
    StartDiscovery,
    CapabilitiesDiscovered,
    Failure { reason: String },
    Disconnect,
}

/// Result of a state transition
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from_state: &'static str,
    pub new_state: ConnectionState,
}

/// Rejected event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateTransitionError {
    #[error("Invalid transition from {from_state} on event {event}")]
    InvalidTransition { from_state: String, event: String },
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl ConnectionState {
    /// Get current state name for logging
    pub fn state_name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Discovering => "Discovering",
            ConnectionState::Ready => "Ready",
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Failed { .. } => "Failed",
        }
    }

    /// Process an event and move to the next state (consumes self)
    pub fn transition(
        self,
        event: ConnectionEvent,
    ) -> Result<StateTransition, StateTransitionError> {
        let from_state = self.state_name();

        let new_state = match (self, event) {
            (
                ConnectionState::Idle
                | ConnectionState::Disconnected
                | ConnectionState::Failed { .. },
                ConnectionEvent::Connect,
            ) => ConnectionState::Connecting,

            (ConnectionState::Connecting, ConnectionEvent::LinkEstablished) => {
                ConnectionState::Connected
            }

            (
                ConnectionState::Connected | ConnectionState::Ready,
                ConnectionEvent::StartDiscovery,
            ) => ConnectionState::Discovering,

            (ConnectionState::Discovering, ConnectionEvent::CapabilitiesDiscovered) => {
                ConnectionState::Ready
            }

            (
                ConnectionState::Connecting | ConnectionState::Discovering,
                ConnectionEvent::Failure { reason },
            ) => ConnectionState::Failed { reason },

            // Disconnect always succeeds locally
            (_, ConnectionEvent::Disconnect) => ConnectionState::Disconnected,

            (state, event) => {
                return Err(StateTransitionError::InvalidTransition {
                    from_state: state.state_name().to_string(),
                    event: format!("{:?}", event),
                });
            }
        };

        Ok(StateTransition {
            from_state,
            new_state,
        })
    }

    /// Link establishment in progress
    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }

    /// A live link exists
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Discovering | ConnectionState::Ready
        )
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// Whether notifications may be subscribed to
    pub fn can_monitor(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Ready)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
