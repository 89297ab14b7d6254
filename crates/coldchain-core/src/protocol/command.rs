//! Sensor commands and their wire encoding
//!
//! Commands are immutable values. Encoding is pure: the same command and
//! firmware profile always produce the same bytes.

use core::fmt;
use core::ops::RangeInclusive;
use serde::{Deserialize, Serialize};

use crate::errors::CodecError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Every command starts with this byte
pub const COMMAND_PREFIX: u8 = b'*';

const INFO: &str = "info";
const BLINK: &str = "blink";
const TOGGLE_LOGGING: &str = "bd";
const DOWNLOAD_LOGS: &str = "logall";
const SET_LOG_INTERVAL: &str = "lint";

// ----------------------------------------------------------------------------
// Command
// ----------------------------------------------------------------------------

/// A named operation understood by the sensor firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Read the settings block (`*info`)
    Info,
    /// Flash the sensor LED (`*blink`)
    Blink,
    /// Toggle button-controlled logging (`*bd`)
    ToggleLogging,
    /// Download every stored temperature record (`*logall`)
    DownloadLogs,
    /// Change the logging interval (`*lint<seconds>`)
    SetLogInterval { seconds: u32 },
}

impl Command {
    /// Short name used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Command::Info => "info",
            Command::Blink => "blink",
            Command::ToggleLogging => "toggle-logging",
            Command::DownloadLogs => "download-logs",
            Command::SetLogInterval { .. } => "set-log-interval",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetLogInterval { seconds } => write!(f, "{}({}s)", self.name(), seconds),
            _ => f.write_str(self.name()),
        }
    }
}

// ----------------------------------------------------------------------------
// Firmware Profile
// ----------------------------------------------------------------------------

/// What the connected firmware accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareProfile {
    /// Accepted logging interval in seconds
    pub log_interval_range: RangeInclusive<u32>,
    /// Whether `*blink` is implemented
    pub supports_blink: bool,
}

impl Default for FirmwareProfile {
    fn default() -> Self {
        Self {
            log_interval_range: 1..=86_400,
            supports_blink: true,
        }
    }
}

impl FirmwareProfile {
    pub fn with_log_interval_range(mut self, range: RangeInclusive<u32>) -> Self {
        self.log_interval_range = range;
        self
    }

    pub fn with_blink(mut self, supported: bool) -> Self {
        self.supports_blink = supported;
        self
    }
}

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

/// Encode a command into the bytes written to the device
pub fn encode(command: &Command, profile: &FirmwareProfile) -> Result<Vec<u8>, CodecError> {
    let body = match command {
        Command::Info => INFO.to_string(),
        Command::Blink => {
            if !profile.supports_blink {
                return Err(CodecError::unsupported("blink is not supported by this firmware"));
            }
            BLINK.to_string()
        }
        Command::ToggleLogging => TOGGLE_LOGGING.to_string(),
        Command::DownloadLogs => DOWNLOAD_LOGS.to_string(),
        Command::SetLogInterval { seconds } => {
            if !profile.log_interval_range.contains(seconds) {
                return Err(CodecError::unsupported(format!(
                    "log interval {}s outside {}..={}",
                    seconds,
                    profile.log_interval_range.start(),
                    profile.log_interval_range.end()
                )));
            }
            format!("{}{}", SET_LOG_INTERVAL, seconds)
        }
    };

    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.push(COMMAND_PREFIX);
    payload.extend_from_slice(body.as_bytes());
    Ok(payload)
}

/// Parse a written payload back into a command (device side of the link)
pub fn parse_command(payload: &[u8]) -> Option<Command> {
    let body = payload.strip_prefix(&[COMMAND_PREFIX])?;
    let body = core::str::from_utf8(body).ok()?;

    match body {
        INFO => Some(Command::Info),
        BLINK => Some(Command::Blink),
        TOGGLE_LOGGING => Some(Command::ToggleLogging),
        DOWNLOAD_LOGS => Some(Command::DownloadLogs),
        _ => {
            let digits = body.strip_prefix(SET_LOG_INTERVAL)?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits
                .parse()
                .ok()
                .map(|seconds| Command::SetLogInterval { seconds })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodes_reference_payloads() {
        let profile = FirmwareProfile::default();
        assert_eq!(encode(&Command::Info, &profile).unwrap(), b"*info");
        assert_eq!(encode(&Command::Blink, &profile).unwrap(), b"*blink");
        assert_eq!(encode(&Command::ToggleLogging, &profile).unwrap(), b"*bd");
        assert_eq!(encode(&Command::DownloadLogs, &profile).unwrap(), b"*logall");
        assert_eq!(
            encode(&Command::SetLogInterval { seconds: 300 }, &profile).unwrap(),
            b"*lint300"
        );
    }

    #[test]
    fn test_rejects_out_of_range_interval() {
        let profile = FirmwareProfile::default().with_log_interval_range(60..=3600);
        let result = encode(&Command::SetLogInterval { seconds: 30 }, &profile);
        assert!(matches!(result, Err(CodecError::UnsupportedCommand { .. })));
    }

    #[test]
    fn test_rejects_blink_without_support() {
        let profile = FirmwareProfile::default().with_blink(false);
        assert!(encode(&Command::Blink, &profile).is_err());
    }

    #[test]
    fn test_parse_command_inverts_encode() {
        let profile = FirmwareProfile::default();
        for command in [
            Command::Info,
            Command::Blink,
            Command::ToggleLogging,
            Command::DownloadLogs,
            Command::SetLogInterval { seconds: 60 },
        ] {
            let payload = encode(&command, &profile).unwrap();
            assert_eq!(parse_command(&payload), Some(command));
        }
        assert_eq!(parse_command(b"*lint"), None);
        assert_eq!(parse_command(b"*lint-5"), None);
        assert_eq!(parse_command(b"info"), None);
    }
}
