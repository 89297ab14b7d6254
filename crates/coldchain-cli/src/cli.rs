//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Use simulated sensors instead of the BLE adapter
    #[arg(long, global = true)]
    pub simulate: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan for advertising sensors
    Scan {
        /// Seconds to listen (defaults to ble.scan_seconds)
        #[arg(short, long)]
        duration: Option<u64>,
        /// Only report these device addresses
        #[arg(long = "device")]
        devices: Vec<String>,
    },
    /// Configure a new sensor and start logging
    Setup {
        /// Device address
        device: String,
        /// Logging interval in seconds (defaults to default_log_interval)
        #[arg(short, long)]
        interval: Option<u32>,
        /// Attempts per command (defaults to ble.command_attempts)
        #[arg(short, long)]
        attempts: Option<u32>,
    },
    /// Print the settings block of a sensor
    Info {
        device: String,
        #[arg(short, long)]
        attempts: Option<u32>,
    },
    /// Flash the LED of a sensor
    Blink {
        device: String,
        #[arg(short, long)]
        attempts: Option<u32>,
    },
    /// Download stored temperature records as samples
    Download {
        device: String,
        /// Logging interval the sensor was configured with
        #[arg(short, long)]
        interval: Option<u32>,
        #[arg(short, long)]
        attempts: Option<u32>,
        /// Write samples to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Classify a samples file and print ingestion results
    Classify {
        /// JSON array of temperature samples
        samples: PathBuf,
        /// JSON array of threshold records overriding the configuration
        #[arg(short, long)]
        thresholds: Option<PathBuf>,
        /// Print the sync payload for each sensor
        #[arg(long)]
        sync: bool,
    },
    /// Print per-sensor statistics and the classified log
    Report {
        samples: PathBuf,
        #[arg(short, long)]
        thresholds: Option<PathBuf>,
        /// Include the breach report
        #[arg(short, long)]
        breaches: bool,
        /// Reference time for open breaches, seconds since the epoch
        #[arg(long)]
        now: Option<u64>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "coldchain",
            "setup",
            "C8:4B:2D:10:00:01",
            "--interval",
            "60",
            "--simulate",
            "-v",
        ])
        .unwrap();
        assert!(cli.simulate);
        assert!(cli.verbose);
        match cli.command {
            Commands::Setup {
                device, interval, ..
            } => {
                assert_eq!(device, "C8:4B:2D:10:00:01");
                assert_eq!(interval, Some(60));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
