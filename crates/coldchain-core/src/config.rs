//! Breach threshold configuration
//!
//! Thresholds are read-only configuration loaded from outside the core. The
//! ids form a small fixed set; anything else is rejected at load time.

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ConfigError;
use crate::types::Celsius;

// ----------------------------------------------------------------------------
// Configuration Ids
// ----------------------------------------------------------------------------

/// Breach family a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreachKind {
    Continuous,
    Cumulative,
}

/// The fixed set of threshold configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreachConfigId {
    HotBreach,
    ColdBreach,
    HotCumulative,
    ColdCumulative,
}

impl BreachConfigId {
    pub const ALL: [BreachConfigId; 4] = [
        BreachConfigId::HotBreach,
        BreachConfigId::ColdBreach,
        BreachConfigId::HotCumulative,
        BreachConfigId::ColdCumulative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BreachConfigId::HotBreach => "HOT_BREACH",
            BreachConfigId::ColdBreach => "COLD_BREACH",
            BreachConfigId::HotCumulative => "HOT_CUMULATIVE",
            BreachConfigId::ColdCumulative => "COLD_CUMULATIVE",
        }
    }

    pub fn is_hot(&self) -> bool {
        matches!(self, BreachConfigId::HotBreach | BreachConfigId::HotCumulative)
    }

    pub fn kind(&self) -> BreachKind {
        match self {
            BreachConfigId::HotBreach | BreachConfigId::ColdBreach => BreachKind::Continuous,
            BreachConfigId::HotCumulative | BreachConfigId::ColdCumulative => {
                BreachKind::Cumulative
            }
        }
    }
}

impl fmt::Display for BreachConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreachConfigId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BreachConfigId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ConfigError::UnsupportedConfig { id: s.to_string() })
    }
}

// ----------------------------------------------------------------------------
// Threshold Configuration
// ----------------------------------------------------------------------------

/// One threshold configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreachThresholdConfig {
    pub id: BreachConfigId,
    pub minimum_temperature: Celsius,
    pub maximum_temperature: Celsius,
    pub duration_seconds: u64,
    pub description: String,
}

impl BreachThresholdConfig {
    pub fn new(
        id: BreachConfigId,
        minimum_temperature: Celsius,
        maximum_temperature: Celsius,
        duration_seconds: u64,
    ) -> Self {
        Self {
            id,
            minimum_temperature,
            maximum_temperature,
            duration_seconds,
            description: id.as_str().to_string(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Inclusive band membership
    pub fn contains(&self, temperature: Celsius) -> bool {
        temperature >= self.minimum_temperature && temperature <= self.maximum_temperature
    }

    /// Whether a single reading breaches a continuous config on its side of the band
    pub fn is_exceeded_by(&self, temperature: Celsius) -> bool {
        if self.id.is_hot() {
            temperature > self.maximum_temperature
        } else {
            temperature < self.minimum_temperature
        }
    }

    pub fn is_valid(&self) -> bool {
        self.minimum_temperature <= self.maximum_temperature
    }
}

/// Untyped threshold record as it arrives from a file or the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawThresholdConfig {
    pub id: String,
    pub minimum_temperature: f64,
    pub maximum_temperature: f64,
    #[serde(alias = "duration")]
    pub duration_seconds: u64,
    #[serde(default)]
    pub description: Option<String>,
}

impl TryFrom<RawThresholdConfig> for BreachThresholdConfig {
    type Error = ConfigError;

    fn try_from(raw: RawThresholdConfig) -> Result<Self, Self::Error> {
        let id: BreachConfigId = raw.id.parse()?;
        Ok(Self {
            id,
            minimum_temperature: Celsius::from(raw.minimum_temperature),
            maximum_temperature: Celsius::from(raw.maximum_temperature),
            duration_seconds: raw.duration_seconds,
            description: raw.description.unwrap_or_else(|| id.as_str().to_string()),
        })
    }
}

// ----------------------------------------------------------------------------
// Threshold Set
// ----------------------------------------------------------------------------

/// The active configuration set for a sensor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdSet {
    configs: BTreeMap<BreachConfigId, BreachThresholdConfig>,
}

impl ThresholdSet {
    pub fn new(configs: impl IntoIterator<Item = BreachThresholdConfig>) -> Self {
        let mut set = Self::default();
        for config in configs {
            set.insert(config);
        }
        set
    }

    /// Build from untyped records, rejecting unknown ids
    pub fn from_raw(records: Vec<RawThresholdConfig>) -> Result<Self, ConfigError> {
        let configs = records
            .into_iter()
            .map(BreachThresholdConfig::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(configs))
    }

    /// Parse a JSON array of threshold records
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let records: Vec<RawThresholdConfig> =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse {
                reason: e.to_string(),
            })?;
        Self::from_raw(records)
    }

    /// Stock cold-chain profile: 2..8 °C safe range, cumulative hot 8..30 °C for
    /// an hour, cumulative cold -30..2 °C for twenty minutes
    pub fn reference_defaults() -> Self {
        Self::new([
            BreachThresholdConfig::new(
                BreachConfigId::HotBreach,
                Celsius::from_degrees(2),
                Celsius::from_degrees(8),
                0,
            )
            .with_description("Single hot excursion"),
            BreachThresholdConfig::new(
                BreachConfigId::ColdBreach,
                Celsius::from_degrees(2),
                Celsius::from_degrees(8),
                0,
            )
            .with_description("Single cold excursion"),
            BreachThresholdConfig::new(
                BreachConfigId::HotCumulative,
                Celsius::from_degrees(8),
                Celsius::from_degrees(30),
                3600,
            )
            .with_description("Cumulative hot exposure"),
            BreachThresholdConfig::new(
                BreachConfigId::ColdCumulative,
                Celsius::from_degrees(-30),
                Celsius::from_degrees(2),
                1200,
            )
            .with_description("Cumulative cold exposure"),
        ])
    }

    /// Insert or replace a configuration
    pub fn insert(&mut self, config: BreachThresholdConfig) {
        if let Some(previous) = self.configs.insert(config.id, config) {
            warn!("Replaced threshold configuration {}", previous.id);
        }
    }

    /// A usable configuration; inverted bands are treated as absent
    pub fn get(&self, id: BreachConfigId) -> Option<&BreachThresholdConfig> {
        let config = self.configs.get(&id)?;
        if !config.is_valid() {
            warn!(
                "Ignoring threshold {}: minimum {} exceeds maximum {}",
                id, config.minimum_temperature, config.maximum_temperature
            );
            return None;
        }
        Some(config)
    }

    /// Strict validation for callers that want inverted bands to be an error
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.configs.values().find(|c| !c.is_valid()) {
            Some(config) => Err(ConfigError::InvalidBand {
                id: config.id.to_string(),
                minimum: config.minimum_temperature,
                maximum: config.maximum_temperature,
            }),
            None => Ok(()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &BreachThresholdConfig> {
        self.configs.values()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_id_is_unsupported() {
        let json = r#"[{"id": "WARM_BREACH", "minimumTemperature": 2, "maximumTemperature": 8, "durationSeconds": 0}]"#;
        assert_eq!(
            ThresholdSet::from_json(json),
            Err(ConfigError::UnsupportedConfig {
                id: "WARM_BREACH".to_string()
            })
        );
    }

    #[test]
    fn test_loads_reference_records() {
        let json = r#"[
            {"id": "HOT_BREACH", "minimumTemperature": 2, "maximumTemperature": 8, "duration": 1200, "description": "Hot"},
            {"id": "COLD_CUMULATIVE", "minimumTemperature": -30, "maximumTemperature": 2, "durationSeconds": 3600}
        ]"#;
        let set = ThresholdSet::from_json(json).unwrap();
        let hot = set.get(BreachConfigId::HotBreach).unwrap();
        assert_eq!(hot.maximum_temperature, Celsius::from_degrees(8));
        assert_eq!(hot.duration_seconds, 1200);
        assert_eq!(hot.description, "Hot");
        assert!(set.get(BreachConfigId::ColdBreach).is_none());
        assert_eq!(
            set.get(BreachConfigId::ColdCumulative).unwrap().description,
            "COLD_CUMULATIVE"
        );
    }

    #[test]
    fn test_inverted_band_degrades_to_absent() {
        let set = ThresholdSet::new([BreachThresholdConfig::new(
            BreachConfigId::HotCumulative,
            Celsius::from_degrees(30),
            Celsius::from_degrees(8),
            60,
        )]);
        assert!(set.get(BreachConfigId::HotCumulative).is_none());
        assert!(matches!(set.validate(), Err(ConfigError::InvalidBand { .. })));
    }

    #[test]
    fn test_exceedance_direction() {
        let hot = BreachThresholdConfig::new(
            BreachConfigId::HotBreach,
            Celsius::from_degrees(2),
            Celsius::from_degrees(8),
            0,
        );
        let cold = BreachThresholdConfig { id: BreachConfigId::ColdBreach, ..hot.clone() };
        assert!(hot.is_exceeded_by(Celsius::from_degrees(9)));
        assert!(!hot.is_exceeded_by(Celsius::from_degrees(8)));
        assert!(!hot.is_exceeded_by(Celsius::from_degrees(1)));
        assert!(cold.is_exceeded_by(Celsius::from_degrees(1)));
        assert!(!cold.is_exceeded_by(Celsius::from_degrees(9)));
    }
}
