//! Read-side reports over a sensor log

use serde::{Deserialize, Serialize};

use crate::breach::{BreachRecord, ContinuousLabel, CumulativeLabel};
use crate::config::{BreachConfigId, BreachKind};
use crate::ingestion::SensorLog;
use crate::types::{Celsius, SensorId, Timestamp};

/// Summary statistics for one sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorStats {
    pub sensor_id: SensorId,
    pub sample_count: usize,
    pub first_timestamp: Option<Timestamp>,
    pub last_timestamp: Option<Timestamp>,
    pub max_temperature: Option<Celsius>,
    pub min_temperature: Option<Celsius>,
    pub continuous_breaches: usize,
    pub active_cumulative_breaches: usize,
}

pub fn sensor_stats(log: &SensorLog) -> SensorStats {
    let temperatures = || log.samples().map(|s| s.sample.temperature);
    let classifier = log.classifier();
    let active_cumulative_breaches = [BreachConfigId::HotCumulative, BreachConfigId::ColdCumulative]
        .into_iter()
        .filter(|id| classifier.is_cumulative_active(*id))
        .count();

    SensorStats {
        sensor_id: log.sensor_id().clone(),
        sample_count: log.len(),
        first_timestamp: log.samples().next().map(|s| s.sample.timestamp),
        last_timestamp: log.samples().next_back().map(|s| s.sample.timestamp),
        max_temperature: temperatures().max(),
        min_temperature: temperatures().min(),
        continuous_breaches: classifier.ledger().count(BreachKind::Continuous),
        active_cumulative_breaches,
    }
}

// ----------------------------------------------------------------------------
// Log Report
// ----------------------------------------------------------------------------

/// One line of the per-sample log report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogReportRow {
    pub timestamp: Timestamp,
    pub temperature: Celsius,
    pub log_interval: u32,
    pub continuous: ContinuousLabel,
    pub cumulative: String,
}

/// Report label for a cumulative classification
pub fn cumulative_marker(label: CumulativeLabel) -> &'static str {
    match label {
        CumulativeLabel::Hot => "Hot",
        CumulativeLabel::Cold => "Cold",
        CumulativeLabel::None => "x",
    }
}

pub fn log_report(log: &SensorLog) -> Vec<LogReportRow> {
    log.samples()
        .map(|s| LogReportRow {
            timestamp: s.sample.timestamp,
            temperature: s.sample.temperature,
            log_interval: s.sample.log_interval,
            continuous: s.continuous,
            cumulative: cumulative_marker(s.cumulative).to_string(),
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Breach Report
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreachReportRow {
    pub breach: BreachRecord,
    pub exposure_seconds: u64,
    pub sample_count: usize,
    pub min_temperature: Option<Celsius>,
    pub max_temperature: Option<Celsius>,
}

/// Every breach of a sensor with the samples that make it up
///
/// Open breaches are measured up to `now`.
pub fn breach_report(log: &SensorLog, now: Timestamp) -> Vec<BreachReportRow> {
    log.breaches()
        .iter()
        .map(|breach| {
            let end = breach.end_timestamp.unwrap_or(now);
            let members: Vec<Celsius> = log
                .samples()
                .filter(|s| match breach.kind {
                    BreachKind::Continuous => s.breach_id == Some(breach.id),
                    BreachKind::Cumulative => {
                        let wanted = if breach.config_id.is_hot() {
                            CumulativeLabel::Hot
                        } else {
                            CumulativeLabel::Cold
                        };
                        s.cumulative == wanted
                            && s.sample.timestamp >= breach.start_timestamp
                            && s.sample.timestamp <= end
                    }
                })
                .map(|s| s.sample.temperature)
                .collect();

            BreachReportRow {
                exposure_seconds: breach.exposure_seconds(now),
                sample_count: members.len(),
                min_temperature: members.iter().min().copied(),
                max_temperature: members.iter().max().copied(),
                breach: breach.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdSet;
    use crate::ingestion::LogPipeline;
    use crate::store::MemoryLogStore;
    use crate::types::TemperatureSample;

    fn ingest(readings: &[(u64, i32)]) -> LogPipeline<MemoryLogStore> {
        let pipeline = LogPipeline::new(ThresholdSet::reference_defaults(), MemoryLogStore::new());
        let sensor = SensorId::new("s1");
        let samples = readings
            .iter()
            .map(|(ts, deg)| {
                TemperatureSample::new(
                    sensor.clone(),
                    Timestamp::new(*ts),
                    Celsius::from_degrees(*deg),
                    600,
                )
            })
            .collect();
        pipeline.ingest(&sensor, samples).unwrap();
        pipeline
    }

    #[test]
    fn test_stats() {
        let pipeline = ingest(&[(600, 5), (1200, 12), (1800, 4), (2400, -1)]);
        let stats = pipeline.with_log(&SensorId::new("s1"), sensor_stats).unwrap();
        assert_eq!(stats.sample_count, 4);
        assert_eq!(stats.max_temperature, Some(Celsius::from_degrees(12)));
        assert_eq!(stats.min_temperature, Some(Celsius::from_degrees(-1)));
        assert_eq!(stats.continuous_breaches, 2);
        assert_eq!(stats.first_timestamp, Some(Timestamp::new(600)));
        assert_eq!(stats.last_timestamp, Some(Timestamp::new(2400)));
    }

    #[test]
    fn test_log_report_markers() {
        // Six hot samples at ten minutes each reach the hour of cumulative exposure
        let readings: Vec<(u64, i32)> = (1..=7).map(|i| (i * 600, 12)).collect();
        let pipeline = ingest(&readings);
        let rows = pipeline.with_log(&SensorId::new("s1"), log_report).unwrap();
        let markers: Vec<&str> = rows.iter().map(|r| r.cumulative.as_str()).collect();
        assert_eq!(markers, vec!["x", "x", "x", "x", "x", "Hot", "Hot"]);
        assert!(rows.iter().all(|r| r.continuous == ContinuousLabel::HotContinuous));
    }

    #[test]
    fn test_breach_report_members() {
        let pipeline = ingest(&[(600, 9), (1200, 14), (1800, 5)]);
        let rows = pipeline
            .with_log(&SensorId::new("s1"), |log| breach_report(log, Timestamp::new(5000)))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].exposure_seconds, 1200);
        assert_eq!(rows[0].sample_count, 2);
        assert_eq!(rows[0].min_temperature, Some(Celsius::from_degrees(9)));
        assert_eq!(rows[0].max_temperature, Some(Celsius::from_degrees(14)));
    }
}
