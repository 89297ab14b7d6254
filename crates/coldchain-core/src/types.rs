//! Core types for cold-chain monitoring
//!
//! Newtypes for device and sensor identity, epoch timestamps, and the signed
//! fixed-point temperature used on the wire and in the log.

use core::fmt;
use core::ops::{Add, Sub};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::errors::ColdchainError;

// ----------------------------------------------------------------------------
// Device Identity
// ----------------------------------------------------------------------------

/// Hardware address of a physical sensor, stable for the sensor's lifetime
///
/// Addresses are normalised to upper case so `ab:cd` and `AB:CD` name the
/// same device.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device id from any address string
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_ascii_uppercase())
    }

    /// Get the address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = ColdchainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ColdchainError::invalid_input("Device address must not be empty"));
        }
        Ok(Self::new(s))
    }
}

// ----------------------------------------------------------------------------
// Sensor Identity
// ----------------------------------------------------------------------------

/// Identifier of a sensor's log; the key for ingestion and classification
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(String);

impl SensorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&DeviceId> for SensorId {
    fn from(device: &DeviceId) -> Self {
        Self(device.as_str().to_string())
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Seconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn new(seconds: u64) -> Self {
        Self(seconds)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_secs())
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Step back by `seconds`, saturating at the epoch
    pub fn saturating_sub_secs(self, seconds: u64) -> Self {
        Self(self.0.saturating_sub(seconds))
    }
}

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, seconds: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(seconds))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Temperature
// ----------------------------------------------------------------------------

/// Signed fixed-point temperature in tenths of a degree Celsius
///
/// This is the device's native resolution. Serialised as a floating point
/// number of degrees so the sync payload matches what the server expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Celsius(i32);

impl Celsius {
    /// Create from tenths of a degree
    pub const fn from_tenths(tenths: i32) -> Self {
        Self(tenths)
    }

    /// Create from whole degrees
    pub const fn from_degrees(degrees: i32) -> Self {
        Self(degrees * 10)
    }

    pub fn tenths(&self) -> i32 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.0) / 10.0
    }

    /// Tenths as the device's signed 16-bit field, saturating at its limits
    pub fn wire_tenths(&self) -> i16 {
        i16::try_from(self.0).unwrap_or(if self.0 < 0 { i16::MIN } else { i16::MAX })
    }
}

impl From<f64> for Celsius {
    fn from(degrees: f64) -> Self {
        Self((degrees * 10.0).round() as i32)
    }
}

impl From<Celsius> for f64 {
    fn from(value: Celsius) -> f64 {
        value.as_f64()
    }
}

impl fmt::Display for Celsius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}°C", self.as_f64())
    }
}

// ----------------------------------------------------------------------------
// Temperature Sample
// ----------------------------------------------------------------------------

/// One temperature reading as logged by a sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureSample {
    pub sensor_id: SensorId,
    pub timestamp: Timestamp,
    pub temperature: Celsius,
    pub log_interval: u32,
}

impl TemperatureSample {
    pub fn new(
        sensor_id: SensorId,
        timestamp: Timestamp,
        temperature: Celsius,
        log_interval: u32,
    ) -> Self {
        Self {
            sensor_id,
            timestamp,
            temperature,
            log_interval,
        }
    }
}
