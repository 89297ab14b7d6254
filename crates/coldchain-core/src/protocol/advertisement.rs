//! Manufacturer advertisement data
//!
//! Sensors broadcast their battery level, logging interval and latest reading
//! in the manufacturer-specific section of every advertisement.

use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;
use crate::types::Celsius;

/// Bluetooth SIG company identifier of the sensor vendor
pub const SENSOR_COMPANY_ID: u16 = 0x0133;

const MIN_PAYLOAD_LEN: usize = 8;

/// Parsed advertisement payload (company id already stripped)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub version: u8,
    pub battery_level: u8,
    pub log_interval: u16,
    pub log_count: u16,
    pub current_temperature: Celsius,
}

impl Advertisement {
    /// Parse the manufacturer payload that follows the company id
    pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < MIN_PAYLOAD_LEN {
            return Err(DecodeError::malformed(format!(
                "advertisement payload too short: {} bytes",
                payload.len()
            )));
        }

        Ok(Self {
            version: payload[0],
            battery_level: payload[1].min(100),
            log_interval: u16::from_be_bytes([payload[2], payload[3]]),
            log_count: u16::from_be_bytes([payload[4], payload[5]]),
            current_temperature: Celsius::from_tenths(i32::from(i16::from_be_bytes([
                payload[6], payload[7],
            ]))),
        })
    }

    /// Parse a raw manufacturer data block that still carries the company id
    pub fn parse_with_company(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 2 {
            return Err(DecodeError::malformed("manufacturer data missing company id"));
        }
        let company = u16::from_le_bytes([data[0], data[1]]);
        if company != SENSOR_COMPANY_ID {
            return Err(DecodeError::malformed(format!(
                "unexpected company id {:#06x}",
                company
            )));
        }
        Self::parse(&data[2..])
    }
}
