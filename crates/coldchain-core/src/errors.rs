//! Error types for the cold-chain core
//!
//! Codec, ingestion, configuration and retry errors, plus the unifying
//! `ColdchainError` that the outer crates convert into.

use crate::types::{Celsius, SensorId, Timestamp};

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Malformed or unexpected device reply. Never retried; the frame is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Reply contained no frames")]
    EmptyReply,
    #[error("Reply truncated: expected {expected} records, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },
    #[error("Malformed frame: {reason}")]
    Malformed { reason: String },
}

/// Errors raised while encoding or decoding device traffic
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Unsupported command: {reason}")]
    UnsupportedCommand { reason: String },
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Data-integrity errors surfaced by log ingestion
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error(
        "Conflicting sample for sensor {sensor_id} at {timestamp}: logged {existing}, received {incoming}"
    )]
    ConflictingSample {
        sensor_id: SensorId,
        timestamp: Timestamp,
        existing: Celsius,
        incoming: Celsius,
    },
    #[error("Sample for sensor {found} submitted to the log of {expected}")]
    SensorMismatch { expected: SensorId, found: SensorId },
}

/// Threshold configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unsupported breach configuration id: {id}")]
    UnsupportedConfig { id: String },
    #[error("Invalid band for {id}: minimum {minimum} exceeds maximum {maximum}")]
    InvalidBand {
        id: String,
        minimum: Celsius,
        maximum: Celsius,
    },
    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Outcome of a bounded retry that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: E },
    #[error("Terminal failure: {0}")]
    Terminal(E),
}

impl<E> RetryError<E> {
    /// The underlying error of the final attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::RetriesExhausted { last_error, .. } => last_error,
            RetryError::Terminal(error) => error,
        }
    }
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Core error type for the cold-chain crates
#[derive(Debug, thiserror::Error)]
pub enum ColdchainError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Log store error: {reason}")]
    Store { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl ColdchainError {
    pub fn invalid_input<T: Into<String>>(reason: T) -> Self {
        ColdchainError::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn store_error<T: Into<String>>(reason: T) -> Self {
        ColdchainError::Store {
            reason: reason.into(),
        }
    }
}

impl From<DecodeError> for ColdchainError {
    fn from(err: DecodeError) -> Self {
        ColdchainError::Codec(CodecError::Decode(err))
    }
}

impl DecodeError {
    pub fn malformed<T: Into<String>>(reason: T) -> Self {
        DecodeError::Malformed {
            reason: reason.into(),
        }
    }
}

impl CodecError {
    pub fn unsupported<T: Into<String>>(reason: T) -> Self {
        CodecError::UnsupportedCommand {
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ColdchainError>;
pub type ColdchainResult<T> = Result<T>;
