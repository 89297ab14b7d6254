//! Error handling for the cold-chain CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Cold-chain error: {0}")]
    Core(#[from] coldchain_core::ColdchainError),

    #[error("Threshold configuration error: {0}")]
    Thresholds(#[from] coldchain_core::ConfigError),

    #[error("Device error: {0}")]
    Device(#[from] coldchain_ble::DeviceError),

    #[error("Transport initialization failed: {0}")]
    TransportInit(#[from] coldchain_ble::TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        CliError::Config(err.to_string())
    }
}
