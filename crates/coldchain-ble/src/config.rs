//! Device manager configuration

use std::time::Duration;

use coldchain_core::FirmwareProfile;
use uuid::Uuid;

use crate::protocol::{
    SENSOR_NOTIFY_CHARACTERISTIC_UUID, SENSOR_SERVICE_UUID, SENSOR_WRITE_CHARACTERISTIC_UUID,
};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Attempts used by the sensor workflows unless the caller overrides them
pub const DEFAULT_COMMAND_ATTEMPTS: u32 = 10;

/// Configuration for the device manager
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceManagerConfig {
    /// Service scanned for and written to
    pub service_uuid: Uuid,
    /// Characteristic commands are written to
    pub write_characteristic_uuid: Uuid,
    /// Characteristic replies are notified on
    pub notify_characteristic_uuid: Uuid,
    /// Maximum time to wait for a complete reply to one write
    pub reply_timeout: Duration,
    /// Maximum time to wait for link establishment
    pub connection_timeout: Duration,
    /// Attempts per command
    pub command_attempts: u32,
    /// Events buffered per subscription before new ones are dropped
    pub subscription_buffer: usize,
    /// Command ranges accepted by the firmware
    pub firmware: FirmwareProfile,
}

impl Default for DeviceManagerConfig {
    fn default() -> Self {
        Self {
            service_uuid: SENSOR_SERVICE_UUID,
            write_characteristic_uuid: SENSOR_WRITE_CHARACTERISTIC_UUID,
            notify_characteristic_uuid: SENSOR_NOTIFY_CHARACTERISTIC_UUID,
            reply_timeout: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(10),
            command_attempts: DEFAULT_COMMAND_ATTEMPTS,
            subscription_buffer: 64,
            firmware: FirmwareProfile::default(),
        }
    }
}

impl DeviceManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set reply timeout
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Set connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set attempts per command
    pub fn with_command_attempts(mut self, attempts: u32) -> Self {
        self.command_attempts = attempts;
        self
    }

    /// Set subscription buffer size
    pub fn with_subscription_buffer(mut self, size: usize) -> Self {
        self.subscription_buffer = size.max(1);
        self
    }

    pub fn with_firmware(mut self, firmware: FirmwareProfile) -> Self {
        self.firmware = firmware;
        self
    }
}
