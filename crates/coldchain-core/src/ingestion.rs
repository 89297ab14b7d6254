//! Log ingestion pipeline
//!
//! Merges batches of samples into each sensor's canonical, timestamp-ordered
//! log and drives the breach classifier over the newly inserted samples only.
//! Each sensor log has a single writer; different sensors ingest concurrently.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::breach::{
    BreachClassifier, BreachId, BreachRecord, ContinuousLabel, CumulativeLabel,
    SampleClassification,
};
use crate::config::ThresholdSet;
use crate::errors::{IngestError, Result};
use crate::protocol::LogDownload;
use crate::store::LogStore;
use crate::types::{SensorId, TemperatureSample, Timestamp};

// ----------------------------------------------------------------------------
// Sensor Log
// ----------------------------------------------------------------------------

/// A sample as held in the canonical log, with its classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedSample {
    pub id: Uuid,
    #[serde(flatten)]
    pub sample: TemperatureSample,
    pub continuous: ContinuousLabel,
    pub cumulative: CumulativeLabel,
    pub breach_id: Option<BreachId>,
}

impl LoggedSample {
    fn new(sample: TemperatureSample, classification: &SampleClassification) -> Self {
        Self {
            id: Uuid::new_v4(),
            sample,
            continuous: classification.continuous,
            cumulative: classification.cumulative,
            breach_id: classification.breach_id,
        }
    }
}

/// Canonical log and breach state of one sensor
#[derive(Debug, Clone)]
pub struct SensorLog {
    sensor_id: SensorId,
    entries: BTreeMap<Timestamp, LoggedSample>,
    classifier: BreachClassifier,
}

impl SensorLog {
    pub fn new(sensor_id: SensorId) -> Self {
        Self {
            classifier: BreachClassifier::new(sensor_id.clone()),
            sensor_id,
            entries: BTreeMap::new(),
        }
    }

    pub fn sensor_id(&self) -> &SensorId {
        &self.sensor_id
    }

    /// Samples in timestamp order
    pub fn samples(&self) -> impl DoubleEndedIterator<Item = &LoggedSample> {
        self.entries.values()
    }

    pub fn get(&self, timestamp: Timestamp) -> Option<&LoggedSample> {
        self.entries.get(&timestamp)
    }

    pub fn breaches(&self) -> &[BreachRecord] {
        self.classifier.ledger().records()
    }

    pub fn classifier(&self) -> &BreachClassifier {
        &self.classifier
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Split a batch into samples new to this log, rejecting it on any conflict
    fn stage(&self, mut samples: Vec<TemperatureSample>) -> Result<Staged> {
        if let Some(foreign) = samples.iter().find(|s| s.sensor_id != self.sensor_id) {
            return Err(IngestError::SensorMismatch {
                expected: self.sensor_id.clone(),
                found: foreign.sensor_id.clone(),
            }
            .into());
        }

        samples.sort_by_key(|s| s.timestamp);

        let mut staged = Staged::default();
        for sample in samples {
            let existing = self
                .entries
                .get(&sample.timestamp)
                .map(|e| &e.sample)
                .or_else(|| staged.fresh.last().filter(|s| s.timestamp == sample.timestamp));

            match existing {
                Some(existing) if existing.temperature == sample.temperature => {
                    staged.duplicates += 1;
                }
                Some(existing) => {
                    warn!(
                        "Conflicting sample for {} at {}: logged {}, received {}",
                        self.sensor_id, sample.timestamp, existing.temperature, sample.temperature
                    );
                    return Err(IngestError::ConflictingSample {
                        sensor_id: self.sensor_id.clone(),
                        timestamp: sample.timestamp,
                        existing: existing.temperature,
                        incoming: sample.temperature,
                    }
                    .into());
                }
                None => staged.fresh.push(sample),
            }
        }

        Ok(staged)
    }
}

#[derive(Debug, Default)]
struct Staged {
    fresh: Vec<TemperatureSample>,
    duplicates: usize,
}

/// Outcome of a successful ingest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicates: usize,
    /// Inserted samples that arrived behind the classification cursor
    pub late: usize,
    /// Breach records opened or closed by this batch
    pub changed_breaches: Vec<BreachRecord>,
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

/// Per-sensor logs plus the threshold sets they are classified against
pub struct LogPipeline<S> {
    logs: DashMap<SensorId, SensorLog>,
    thresholds: ThresholdSet,
    sensor_thresholds: DashMap<SensorId, ThresholdSet>,
    store: S,
}

impl<S: LogStore> LogPipeline<S> {
    pub fn new(thresholds: ThresholdSet, store: S) -> Self {
        Self {
            logs: DashMap::new(),
            thresholds,
            sensor_thresholds: DashMap::new(),
            store,
        }
    }

    /// Override the threshold set for one sensor
    pub fn set_sensor_thresholds(&self, sensor_id: SensorId, thresholds: ThresholdSet) {
        self.sensor_thresholds.insert(sensor_id, thresholds);
    }

    /// Active threshold set of a sensor
    pub fn thresholds_for(&self, sensor_id: &SensorId) -> ThresholdSet {
        self.sensor_thresholds
            .get(sensor_id)
            .map(|t| t.clone())
            .unwrap_or_else(|| self.thresholds.clone())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Merge a batch into the sensor's log
    ///
    /// Exact duplicates are skipped. A timestamp already logged with another
    /// temperature rejects the whole batch and leaves the log untouched. Only
    /// the inserted samples are classified, and they reach the store before
    /// the in-memory log is committed.
    pub fn ingest(
        &self,
        sensor_id: &SensorId,
        samples: Vec<TemperatureSample>,
    ) -> Result<IngestReport> {
        let thresholds = self.thresholds_for(sensor_id);
        let mut log = self
            .logs
            .entry(sensor_id.clone())
            .or_insert_with(|| SensorLog::new(sensor_id.clone()));

        let staged = log.stage(samples)?;
        if staged.fresh.is_empty() {
            debug!(
                "Batch for {} contained only {} duplicate samples",
                sensor_id, staged.duplicates
            );
            return Ok(IngestReport {
                duplicates: staged.duplicates,
                ..IngestReport::default()
            });
        }

        let late = staged
            .fresh
            .iter()
            .filter(|s| !log.classifier.is_after_cursor(s.timestamp))
            .count();
        if late > 0 {
            warn!(
                "{} late samples for {} behind cursor {:?}; counted toward cumulative exposure only",
                late,
                sensor_id,
                log.classifier.cursor()
            );
        }

        let checkpoint = log.classifier.checkpoint();
        let mut outcome = log.classifier.stage(&thresholds, &staged.fresh);

        let logged: Vec<LoggedSample> = staged
            .fresh
            .into_iter()
            .zip(outcome.samples.iter())
            .map(|(sample, classification)| LoggedSample::new(sample, classification))
            .collect();
        let changed = log.classifier.ledger().preview(&outcome.delta);

        let stored = self.store.append_samples(&logged).and_then(|()| {
            changed
                .iter()
                .try_for_each(|record| self.store.record_breach(record))
        });
        if let Err(err) = stored {
            log.classifier.restore(checkpoint);
            return Err(err);
        }

        log.classifier.commit(std::mem::take(&mut outcome.delta));
        let inserted = logged.len();
        for entry in logged {
            log.entries.insert(entry.sample.timestamp, entry);
        }

        info!(
            "Ingested {} samples for {} ({} duplicates, {} late, {} breach changes)",
            inserted,
            sensor_id,
            staged.duplicates,
            late,
            changed.len()
        );

        Ok(IngestReport {
            inserted,
            duplicates: staged.duplicates,
            late,
            changed_breaches: changed,
        })
    }

    /// Acknowledge a breach record and append the new version to the store
    pub fn acknowledge(&self, sensor_id: &SensorId, breach_id: BreachId) -> Result<BreachRecord> {
        let mut log = self.logs.get_mut(sensor_id).ok_or_else(|| {
            crate::errors::ColdchainError::invalid_input(format!("Unknown sensor {}", sensor_id))
        })?;
        let record = log.classifier.ledger_mut().acknowledge(breach_id)?.clone();
        self.store.record_breach(&record)?;
        info!("Acknowledged breach {} for {}", breach_id, sensor_id);
        Ok(record)
    }

    /// Run `f` against a sensor's log
    pub fn with_log<R>(&self, sensor_id: &SensorId, f: impl FnOnce(&SensorLog) -> R) -> Option<R> {
        self.logs.get(sensor_id).map(|log| f(&log))
    }

    /// Snapshot of a sensor's samples in timestamp order
    pub fn samples(&self, sensor_id: &SensorId) -> Vec<LoggedSample> {
        self.with_log(sensor_id, |log| log.samples().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of a sensor's breach records in creation order
    pub fn breaches(&self, sensor_id: &SensorId) -> Vec<BreachRecord> {
        self.with_log(sensor_id, |log| log.breaches().to_vec())
            .unwrap_or_default()
    }

    pub fn sensors(&self) -> Vec<SensorId> {
        let mut sensors: Vec<SensorId> = self.logs.iter().map(|e| e.key().clone()).collect();
        sensors.sort();
        sensors
    }
}

// ----------------------------------------------------------------------------
// Download Conversion
// ----------------------------------------------------------------------------

/// Timestamp a log download
///
/// The device stores readings without time; the newest record is taken to be
/// `downloaded_at` and each earlier record one `log_interval` before the next.
pub fn samples_from_download(
    sensor_id: &SensorId,
    download: &LogDownload,
    log_interval: u32,
    downloaded_at: Timestamp,
) -> Vec<TemperatureSample> {
    let count = download.temperatures.len() as u64;
    download
        .temperatures
        .iter()
        .enumerate()
        .map(|(i, temperature)| {
            let steps_back = count - 1 - i as u64;
            TemperatureSample::new(
                sensor_id.clone(),
                downloaded_at.saturating_sub_secs(steps_back * u64::from(log_interval)),
                *temperature,
                log_interval,
            )
        })
        .collect()
}
