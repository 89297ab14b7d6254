//! Cold-chain CLI configuration
//!
//! Configuration is layered with figment, lowest priority first:
//! - Built-in defaults
//! - `coldchain.toml` in the working directory
//! - `coldchain/config.toml` in the user configuration directory
//! - An explicit `--config` file
//! - `COLDCHAIN_*` environment variables, `__` separating nested keys
//!   (for example `COLDCHAIN_BLE__COMMAND_ATTEMPTS=5`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use coldchain_ble::{DeviceManagerConfig, DEFAULT_COMMAND_ATTEMPTS};
use coldchain_core::config::RawThresholdConfig;
use coldchain_core::ThresholdSet;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CliError, Result};

const LOCAL_CONFIG_FILE: &str = "coldchain.toml";
const ENV_PREFIX: &str = "COLDCHAIN_";

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging interval written to new sensors, in seconds
    pub default_log_interval: u32,

    /// Breach thresholds applied during classification
    pub thresholds: Vec<RawThresholdConfig>,

    /// Device layer settings
    pub ble: BleSettings,
}

/// Device layer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BleSettings {
    pub reply_timeout_ms: u64,
    pub connection_timeout_ms: u64,
    /// Attempts per command
    pub command_attempts: u32,
    pub subscription_buffer: usize,
    /// How long `scan` listens, and how long `setup` looks for an advertisement
    pub scan_seconds: u64,
}

impl Default for BleSettings {
    fn default() -> Self {
        let manager = DeviceManagerConfig::default();
        Self {
            reply_timeout_ms: manager.reply_timeout.as_millis() as u64,
            connection_timeout_ms: manager.connection_timeout.as_millis() as u64,
            command_attempts: DEFAULT_COMMAND_ATTEMPTS,
            subscription_buffer: manager.subscription_buffer,
            scan_seconds: 5,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_log_interval: 300,
            thresholds: raw_thresholds(&ThresholdSet::reference_defaults()),
            ble: BleSettings::default(),
        }
    }
}

fn raw_thresholds(set: &ThresholdSet) -> Vec<RawThresholdConfig> {
    set.iter()
        .map(|config| RawThresholdConfig {
            id: config.id.as_str().to_string(),
            minimum_temperature: config.minimum_temperature.as_f64(),
            maximum_temperature: config.maximum_temperature.as_f64(),
            duration_seconds: config.duration_seconds,
            description: Some(config.description.clone()),
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load with the standard priority order, optionally adding an explicit file
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(LOCAL_CONFIG_FILE));

        if let Some(user) = Self::user_config_path() {
            figment = figment.merge(Toml::file(user));
        }
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(CliError::Config(format!(
                    "configuration file {} not found",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// `coldchain/config.toml` under the platform configuration directory
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("coldchain").join("config.toml"))
    }

    /// Reject settings no command could run with
    pub fn validate(&self) -> Result<()> {
        if self.default_log_interval == 0 {
            return Err(CliError::Config(
                "default_log_interval must be greater than 0".to_string(),
            ));
        }
        if self.ble.command_attempts == 0 {
            return Err(CliError::Config(
                "ble.command_attempts must be greater than 0".to_string(),
            ));
        }
        if self.ble.reply_timeout_ms == 0 {
            return Err(CliError::Config(
                "ble.reply_timeout_ms must be greater than 0".to_string(),
            ));
        }
        // Unknown threshold ids fail here rather than during classification
        self.threshold_set()?;
        Ok(())
    }

    pub fn threshold_set(&self) -> Result<ThresholdSet> {
        Ok(ThresholdSet::from_raw(self.thresholds.clone())?)
    }

    pub fn manager_config(&self) -> DeviceManagerConfig {
        DeviceManagerConfig::new()
            .with_reply_timeout(Duration::from_millis(self.ble.reply_timeout_ms))
            .with_connection_timeout(Duration::from_millis(self.ble.connection_timeout_ms))
            .with_command_attempts(self.ble.command_attempts)
            .with_subscription_buffer(self.ble.subscription_buffer)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coldchain_core::BreachConfigId;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.default_log_interval, 300);
        assert_eq!(config.ble.command_attempts, 10);
        assert_eq!(
            config.threshold_set().unwrap(),
            ThresholdSet::reference_defaults()
        );
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "coldchain.toml",
                r#"
                default_log_interval = 60

                [ble]
                command_attempts = 4
                "#,
            )?;
            jail.set_env("COLDCHAIN_BLE__REPLY_TIMEOUT_MS", "250");

            let config = AppConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.default_log_interval, 60);
            assert_eq!(config.ble.command_attempts, 4);
            assert_eq!(config.ble.reply_timeout_ms, 250);
            assert_eq!(config.ble.scan_seconds, 5);

            let manager = config.manager_config();
            assert_eq!(manager.reply_timeout, Duration::from_millis(250));
            assert_eq!(manager.command_attempts, 4);
            Ok(())
        });
    }

    #[test]
    fn test_unknown_threshold_id_fails_at_load() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "coldchain.toml",
                r#"
                [[thresholds]]
                id = "WARM_BREACH"
                minimumTemperature = 2.0
                maximumTemperature = 8.0
                durationSeconds = 0
                "#,
            )?;

            let err = AppConfig::load(None).unwrap_err();
            assert!(matches!(err, CliError::Thresholds(_)));
            Ok(())
        });
    }

    #[test]
    fn test_thresholds_replace_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
                [[thresholds]]
                id = "HOT_BREACH"
                minimumTemperature = 0.0
                maximumTemperature = 5.0
                durationSeconds = 0
                "#,
            )?;

            let config =
                AppConfig::load(Some(Path::new("custom.toml"))).map_err(|e| e.to_string())?;
            let set = config.threshold_set().map_err(|e| e.to_string())?;
            assert!(set.get(BreachConfigId::HotBreach).is_some());
            assert!(set.get(BreachConfigId::ColdBreach).is_none());
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        Jail::expect_with(|_| {
            let err = AppConfig::load(Some(Path::new("missing.toml"))).unwrap_err();
            assert!(matches!(err, CliError::Config(_)));
            Ok(())
        });
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = AppConfig::default();
        config.ble.command_attempts = 0;
        assert!(config.validate().is_err());
    }
}
