//! Cold-chain CLI library
//!
//! Argument parsing, layered configuration and the command handlers behind
//! the `coldchain` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod simulation;
pub mod sink;

pub use cli::{Cli, Commands};
pub use commands::{load_samples, CommandDispatcher};
pub use config::{AppConfig, BleSettings};
pub use error::{CliError, Result};
pub use sink::WriterSyncSink;
