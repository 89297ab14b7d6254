//! Export records for the upstream sync client
//!
//! The sync client itself is a collaborator behind [`SyncSink`]; this module
//! only shapes the JSON it uploads.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::breach::{BreachId, BreachRecord};
use crate::config::{BreachConfigId, BreachKind, ThresholdSet};
use crate::errors::Result;
use crate::ingestion::{LoggedSample, SensorLog};
use crate::types::{Celsius, SensorId, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleSyncRecord {
    pub id: Uuid,
    pub log_interval: u32,
    pub sensor_id: SensorId,
    pub temperature_breach_id: Option<BreachId>,
    pub timestamp: Timestamp,
    pub temperature: Celsius,
}

impl From<&LoggedSample> for SampleSyncRecord {
    fn from(logged: &LoggedSample) -> Self {
        Self {
            id: logged.id,
            log_interval: logged.sample.log_interval,
            sensor_id: logged.sample.sensor_id.clone(),
            temperature_breach_id: logged.breach_id,
            timestamp: logged.sample.timestamp,
            temperature: logged.sample.temperature,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncBreachType {
    HotConsecutive,
    ColdConsecutive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreachSyncRecord {
    pub id: BreachId,
    #[serde(rename = "type")]
    pub breach_type: SyncBreachType,
    pub threshold_minimum_temperature: Celsius,
    pub threshold_maximum_temperature: Celsius,
    pub threshold_duration: u64,
    pub sensor_id: SensorId,
    pub start_timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<Timestamp>,
    pub acknowledged: bool,
}

impl BreachSyncRecord {
    /// Pair a continuous record with its threshold
    ///
    /// `None` for cumulative records, which have no upstream type, and when
    /// the config is no longer present.
    pub fn new(record: &BreachRecord, thresholds: &ThresholdSet) -> Option<Self> {
        let breach_type = match record.config_id {
            BreachConfigId::HotBreach => SyncBreachType::HotConsecutive,
            BreachConfigId::ColdBreach => SyncBreachType::ColdConsecutive,
            BreachConfigId::HotCumulative | BreachConfigId::ColdCumulative => return None,
        };
        let config = thresholds.get(record.config_id)?;
        Some(Self {
            id: record.id,
            breach_type,
            threshold_minimum_temperature: config.minimum_temperature,
            threshold_maximum_temperature: config.maximum_temperature,
            threshold_duration: config.duration_seconds,
            sensor_id: record.sensor_id.clone(),
            start_timestamp: record.start_timestamp,
            end_timestamp: record.end_timestamp,
            acknowledged: record.acknowledged,
        })
    }
}

/// Ordered samples and breaches ready for upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatch {
    pub samples: Vec<SampleSyncRecord>,
    pub breaches: Vec<BreachSyncRecord>,
}

impl SyncBatch {
    pub fn from_log(log: &SensorLog, thresholds: &ThresholdSet) -> Self {
        let breaches = log
            .breaches()
            .iter()
            .filter(|record| record.kind == BreachKind::Continuous)
            .filter_map(|record| {
                let synced = BreachSyncRecord::new(record, thresholds);
                if synced.is_none() {
                    warn!(
                        "Skipping breach {} for sync: no threshold {}",
                        record.id, record.config_id
                    );
                }
                synced
            })
            .collect();

        Self {
            samples: log.samples().map(SampleSyncRecord::from).collect(),
            breaches,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() && self.breaches.is_empty()
    }
}

/// The upstream HTTP-push collaborator
#[async_trait]
pub trait SyncSink: Send + Sync {
    async fn push(&self, batch: &SyncBatch) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::LogPipeline;
    use crate::store::MemoryLogStore;
    use crate::types::TemperatureSample;

    #[test]
    fn test_open_breach_omits_end_timestamp() {
        let thresholds = ThresholdSet::reference_defaults();
        let pipeline = LogPipeline::new(thresholds.clone(), MemoryLogStore::new());
        let sensor = SensorId::new("s1");
        pipeline
            .ingest(
                &sensor,
                vec![TemperatureSample::new(
                    sensor.clone(),
                    Timestamp::new(60),
                    Celsius::from_tenths(-15),
                    60,
                )],
            )
            .unwrap();

        let batch = pipeline
            .with_log(&sensor, |log| SyncBatch::from_log(log, &thresholds))
            .unwrap();
        let json = serde_json::to_value(&batch).unwrap();

        let breach = &json["breaches"][0];
        assert_eq!(breach["type"], "COLD_CONSECUTIVE");
        assert_eq!(breach["thresholdMinimumTemperature"], 2.0);
        assert_eq!(breach["sensorId"], "s1");
        assert!(breach.get("endTimestamp").is_none());

        let sample = &json["samples"][0];
        assert_eq!(sample["temperature"], -1.5);
        assert_eq!(sample["logInterval"], 60);
        assert_eq!(sample["temperatureBreachId"], breach["id"]);
    }

    #[test]
    fn test_cumulative_activation_is_not_exported() {
        let thresholds = ThresholdSet::reference_defaults();
        let pipeline = LogPipeline::new(thresholds.clone(), MemoryLogStore::new());
        let sensor = SensorId::new("s2");
        // 2.0 is on the edge of the cold cumulative band, never a continuous breach
        let samples = (1..=25)
            .map(|i| {
                TemperatureSample::new(
                    sensor.clone(),
                    Timestamp::new(i * 60),
                    Celsius::from_tenths(20),
                    60,
                )
            })
            .collect();
        pipeline.ingest(&sensor, samples).unwrap();

        let breaches = pipeline.breaches(&sensor);
        assert!(breaches
            .iter()
            .any(|record| record.config_id == BreachConfigId::ColdCumulative));
        assert!(breaches
            .iter()
            .all(|record| record.kind == BreachKind::Cumulative));

        let batch = pipeline
            .with_log(&sensor, |log| SyncBatch::from_log(log, &thresholds))
            .unwrap();
        assert_eq!(batch.samples.len(), 25);
        assert!(batch.breaches.is_empty());
    }
}
