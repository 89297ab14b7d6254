//! Incremental breach classification for one sensor
//!
//! Continuous breaches open on the first sample beyond a HOT_BREACH or
//! COLD_BREACH limit, stay open across consecutive breaching samples, and
//! close on the first sample that does not breach. Cumulative breaches sum the
//! log interval of every in-band sample over the sensor's lifetime; once the
//! sum reaches the configured duration the breach is active for good.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::breach::ledger::{BreachDelta, BreachId, BreachLedger};
use crate::config::{BreachConfigId, ThresholdSet};
use crate::types::{SensorId, TemperatureSample, Timestamp};

const CONTINUOUS_IDS: [BreachConfigId; 2] = [BreachConfigId::HotBreach, BreachConfigId::ColdBreach];
const CUMULATIVE_IDS: [BreachConfigId; 2] =
    [BreachConfigId::HotCumulative, BreachConfigId::ColdCumulative];

// ----------------------------------------------------------------------------
// Labels
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContinuousLabel {
    HotContinuous,
    ColdContinuous,
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CumulativeLabel {
    Hot,
    Cold,
    #[default]
    None,
}

/// Classification of a single sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleClassification {
    pub timestamp: Timestamp,
    pub continuous: ContinuousLabel,
    pub cumulative: CumulativeLabel,
    /// Continuous breach this sample belongs to
    pub breach_id: Option<BreachId>,
}

/// Result of classifying a run of samples
#[derive(Debug, Clone, Default)]
pub struct ClassificationOutcome {
    pub samples: Vec<SampleClassification>,
    /// Records opened or closed
    pub changed_breaches: BTreeSet<BreachId>,
    /// Ledger changes not yet committed by [`BreachClassifier::stage`]
    pub delta: BreachDelta,
}

/// Cursor and running state of a classifier, without its ledger
#[derive(Debug, Clone)]
pub struct ClassifierCheckpoint {
    cursor: Option<Timestamp>,
    open_continuous: BTreeMap<BreachConfigId, BreachId>,
    cumulative: BTreeMap<BreachConfigId, CumulativeExposure>,
}

// ----------------------------------------------------------------------------
// Cumulative Exposure
// ----------------------------------------------------------------------------

/// Running lifetime exposure for one sensor/config pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeExposure {
    pub exposure_seconds: u64,
    pub activated_at: Option<Timestamp>,
    pub breach_id: Option<BreachId>,
}

impl CumulativeExposure {
    pub fn is_active(&self) -> bool {
        self.activated_at.is_some()
    }
}

// ----------------------------------------------------------------------------
// Classifier
// ----------------------------------------------------------------------------

/// Breach state of one sensor, advanced sample by sample
#[derive(Debug, Clone)]
pub struct BreachClassifier {
    sensor_id: SensorId,
    cursor: Option<Timestamp>,
    open_continuous: BTreeMap<BreachConfigId, BreachId>,
    cumulative: BTreeMap<BreachConfigId, CumulativeExposure>,
    ledger: BreachLedger,
}

impl BreachClassifier {
    pub fn new(sensor_id: SensorId) -> Self {
        Self {
            sensor_id,
            cursor: None,
            open_continuous: BTreeMap::new(),
            cumulative: BTreeMap::new(),
            ledger: BreachLedger::new(),
        }
    }

    /// Timestamp of the last sample classified in order
    pub fn cursor(&self) -> Option<Timestamp> {
        self.cursor
    }

    pub fn ledger(&self) -> &BreachLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut BreachLedger {
        &mut self.ledger
    }

    pub fn exposure(&self, id: BreachConfigId) -> Option<&CumulativeExposure> {
        self.cumulative.get(&id)
    }

    pub fn is_cumulative_active(&self, id: BreachConfigId) -> bool {
        self.cumulative.get(&id).is_some_and(CumulativeExposure::is_active)
    }

    /// Whether `timestamp` can be classified in order
    pub fn is_after_cursor(&self, timestamp: Timestamp) -> bool {
        self.cursor.map_or(true, |cursor| timestamp > cursor)
    }

    /// Classify samples and commit the resulting breach changes
    pub fn classify(
        &mut self,
        thresholds: &ThresholdSet,
        samples: &[TemperatureSample],
    ) -> ClassificationOutcome {
        let mut outcome = self.stage(thresholds, samples);
        self.commit(std::mem::take(&mut outcome.delta));
        outcome
    }

    /// Classify samples in timestamp order, leaving the ledger untouched
    ///
    /// Samples at or before the cursor are routed to [`Self::account_late`].
    /// Breach changes are returned in `outcome.delta`; the running state
    /// advances immediately and can be rewound with [`Self::restore`].
    pub fn stage(
        &mut self,
        thresholds: &ThresholdSet,
        samples: &[TemperatureSample],
    ) -> ClassificationOutcome {
        let mut outcome = ClassificationOutcome::default();
        for sample in samples {
            let classification = if self.is_after_cursor(sample.timestamp) {
                self.step(thresholds, sample, &mut outcome)
            } else {
                self.account_late(thresholds, sample, &mut outcome)
            };
            outcome.samples.push(classification);
        }
        outcome
    }

    pub fn commit(&mut self, delta: BreachDelta) {
        self.ledger.commit(delta);
    }

    pub fn checkpoint(&self) -> ClassifierCheckpoint {
        ClassifierCheckpoint {
            cursor: self.cursor,
            open_continuous: self.open_continuous.clone(),
            cumulative: self.cumulative.clone(),
        }
    }

    /// Rewind the running state to a checkpoint taken before an uncommitted stage
    pub fn restore(&mut self, checkpoint: ClassifierCheckpoint) {
        self.cursor = checkpoint.cursor;
        self.open_continuous = checkpoint.open_continuous;
        self.cumulative = checkpoint.cumulative;
    }

    /// A sample that arrived behind the cursor
    ///
    /// It still adds to lifetime cumulative exposure, but continuous breach
    /// boundaries already emitted are never revisited.
    pub fn account_late(
        &mut self,
        thresholds: &ThresholdSet,
        sample: &TemperatureSample,
        outcome: &mut ClassificationOutcome,
    ) -> SampleClassification {
        debug!(
            "Late sample for {} at {} (cursor {:?})",
            self.sensor_id, sample.timestamp, self.cursor
        );
        SampleClassification {
            timestamp: sample.timestamp,
            continuous: ContinuousLabel::None,
            cumulative: self.accumulate(thresholds, sample, outcome),
            breach_id: None,
        }
    }

    fn step(
        &mut self,
        thresholds: &ThresholdSet,
        sample: &TemperatureSample,
        outcome: &mut ClassificationOutcome,
    ) -> SampleClassification {
        let (continuous, breach_id) = self.advance_continuous(thresholds, sample, outcome);
        let cumulative = self.accumulate(thresholds, sample, outcome);
        self.cursor = Some(sample.timestamp);

        SampleClassification {
            timestamp: sample.timestamp,
            continuous,
            cumulative,
            breach_id,
        }
    }

    fn advance_continuous(
        &mut self,
        thresholds: &ThresholdSet,
        sample: &TemperatureSample,
        outcome: &mut ClassificationOutcome,
    ) -> (ContinuousLabel, Option<BreachId>) {
        let t = sample.temperature;
        // Hot wins when a malformed configuration lets a reading breach both sides
        let breaching = CONTINUOUS_IDS
            .into_iter()
            .find(|id| thresholds.get(*id).is_some_and(|c| c.is_exceeded_by(t)));

        let mut member_of = None;
        for id in CONTINUOUS_IDS {
            match (self.open_continuous.get(&id).copied(), breaching == Some(id)) {
                (Some(open), true) => member_of = Some(open),
                (None, true) => {
                    let opened = outcome
                        .delta
                        .open(self.sensor_id.clone(), id, sample.timestamp);
                    info!(
                        "Opened {} breach {} for {} at {} ({})",
                        id, opened, self.sensor_id, sample.timestamp, t
                    );
                    self.open_continuous.insert(id, opened);
                    outcome.changed_breaches.insert(opened);
                    member_of = Some(opened);
                }
                (Some(open), false) => {
                    outcome.delta.close(open, sample.timestamp);
                    self.open_continuous.remove(&id);
                    info!(
                        "Closed {} breach {} for {} at {}",
                        id, open, self.sensor_id, sample.timestamp
                    );
                    outcome.changed_breaches.insert(open);
                }
                (None, false) => {}
            }
        }

        let label = match breaching {
            Some(BreachConfigId::HotBreach) => ContinuousLabel::HotContinuous,
            Some(BreachConfigId::ColdBreach) => ContinuousLabel::ColdContinuous,
            _ => ContinuousLabel::None,
        };
        (label, member_of)
    }

    fn accumulate(
        &mut self,
        thresholds: &ThresholdSet,
        sample: &TemperatureSample,
        outcome: &mut ClassificationOutcome,
    ) -> CumulativeLabel {
        let mut label = CumulativeLabel::None;

        for id in CUMULATIVE_IDS {
            let Some(config) = thresholds.get(id) else {
                continue;
            };
            if !config.contains(sample.temperature) {
                continue;
            }

            let exposure = self.cumulative.entry(id).or_default();
            exposure.exposure_seconds += u64::from(sample.log_interval);

            if !exposure.is_active() && exposure.exposure_seconds >= config.duration_seconds {
                let opened = outcome
                    .delta
                    .open(self.sensor_id.clone(), id, sample.timestamp);
                exposure.activated_at = Some(sample.timestamp);
                exposure.breach_id = Some(opened);
                outcome.changed_breaches.insert(opened);
                info!(
                    "Cumulative {} breach {} active for {} after {}s of exposure",
                    id, opened, self.sensor_id, exposure.exposure_seconds
                );
            }

            if exposure.is_active() && label == CumulativeLabel::None {
                label = if id.is_hot() {
                    CumulativeLabel::Hot
                } else {
                    CumulativeLabel::Cold
                };
            }
        }

        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreachKind, BreachThresholdConfig};
    use crate::types::Celsius;

    fn sensor() -> SensorId {
        SensorId::new("sensor-1")
    }

    fn samples(readings: &[(u64, i32)], interval: u32) -> Vec<TemperatureSample> {
        readings
            .iter()
            .map(|(ts, deg)| {
                TemperatureSample::new(
                    sensor(),
                    Timestamp::new(*ts),
                    Celsius::from_degrees(*deg),
                    interval,
                )
            })
            .collect()
    }

    fn continuous_thresholds() -> ThresholdSet {
        ThresholdSet::new([
            BreachThresholdConfig::new(
                BreachConfigId::HotBreach,
                Celsius::from_degrees(2),
                Celsius::from_degrees(8),
                0,
            ),
            BreachThresholdConfig::new(
                BreachConfigId::ColdBreach,
                Celsius::from_degrees(2),
                Celsius::from_degrees(8),
                0,
            ),
        ])
    }

    #[test]
    fn test_continuous_breach_boundaries() {
        let mut classifier = BreachClassifier::new(sensor());
        let outcome = classifier.classify(
            &continuous_thresholds(),
            &samples(&[(60, 18), (120, 9), (180, 8), (240, 19)], 60),
        );

        let records = classifier.ledger().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].start_timestamp, Timestamp::new(60));
        assert_eq!(records[0].end_timestamp, Some(Timestamp::new(180)));
        assert_eq!(records[1].start_timestamp, Timestamp::new(240));
        assert_eq!(records[1].end_timestamp, None);
        assert!(records.iter().all(|r| r.config_id == BreachConfigId::HotBreach));

        let labels: Vec<_> = outcome.samples.iter().map(|s| s.continuous).collect();
        assert_eq!(
            labels,
            vec![
                ContinuousLabel::HotContinuous,
                ContinuousLabel::HotContinuous,
                ContinuousLabel::None,
                ContinuousLabel::HotContinuous
            ]
        );
        assert_eq!(outcome.samples[0].breach_id, Some(records[0].id));
        assert_eq!(outcome.samples[1].breach_id, Some(records[0].id));
        assert_eq!(outcome.samples[2].breach_id, None);
        assert_eq!(outcome.samples[3].breach_id, Some(records[1].id));
    }

    #[test]
    fn test_hot_to_cold_switch_closes_and_opens() {
        let mut classifier = BreachClassifier::new(sensor());
        classifier.classify(&continuous_thresholds(), &samples(&[(60, 12), (120, -1)], 60));

        let records = classifier.ledger().records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].config_id, BreachConfigId::HotBreach);
        assert_eq!(records[0].end_timestamp, Some(Timestamp::new(120)));
        assert_eq!(records[1].config_id, BreachConfigId::ColdBreach);
        assert!(records[1].is_open());
    }

    #[test]
    fn test_incremental_batches_extend_open_breach() {
        let thresholds = continuous_thresholds();
        let mut classifier = BreachClassifier::new(sensor());
        classifier.classify(&thresholds, &samples(&[(60, 10)], 60));
        let outcome = classifier.classify(&thresholds, &samples(&[(120, 11), (180, 5)], 60));

        assert_eq!(classifier.ledger().len(), 1);
        let record = &classifier.ledger().records()[0];
        assert_eq!(record.start_timestamp, Timestamp::new(60));
        assert_eq!(record.end_timestamp, Some(Timestamp::new(180)));
        assert_eq!(outcome.samples[0].breach_id, Some(record.id));
        assert!(outcome.changed_breaches.contains(&record.id));
    }

    #[test]
    fn test_cumulative_activation_is_monotonic() {
        let thresholds = ThresholdSet::new([BreachThresholdConfig::new(
            BreachConfigId::HotCumulative,
            Celsius::from_degrees(2),
            Celsius::from_degrees(8),
            120,
        )]);
        let mut classifier = BreachClassifier::new(sensor());
        let outcome = classifier.classify(
            &thresholds,
            &samples(&[(60, 2), (120, 4), (180, 6), (240, 20), (300, 5)], 60),
        );

        let labels: Vec<_> = outcome.samples.iter().map(|s| s.cumulative).collect();
        assert_eq!(
            labels,
            vec![
                CumulativeLabel::None,
                CumulativeLabel::Hot,
                CumulativeLabel::Hot,
                CumulativeLabel::None,
                CumulativeLabel::Hot
            ]
        );
        let exposure = classifier.exposure(BreachConfigId::HotCumulative).unwrap();
        assert_eq!(exposure.activated_at, Some(Timestamp::new(120)));
        assert_eq!(exposure.exposure_seconds, 240);
        assert_eq!(classifier.ledger().count(BreachKind::Cumulative), 1);
        assert!(classifier.ledger().records()[0].is_open());
    }

    #[test]
    fn test_hot_band_takes_priority() {
        let thresholds = ThresholdSet::new([
            BreachThresholdConfig::new(
                BreachConfigId::HotCumulative,
                Celsius::from_degrees(0),
                Celsius::from_degrees(10),
                0,
            ),
            BreachThresholdConfig::new(
                BreachConfigId::ColdCumulative,
                Celsius::from_degrees(0),
                Celsius::from_degrees(10),
                0,
            ),
        ]);
        let mut classifier = BreachClassifier::new(sensor());
        let outcome = classifier.classify(&thresholds, &samples(&[(60, 5)], 60));
        assert_eq!(outcome.samples[0].cumulative, CumulativeLabel::Hot);
        assert!(classifier.is_cumulative_active(BreachConfigId::ColdCumulative));
    }

    #[test]
    fn test_missing_configuration_classifies_none() {
        let mut classifier = BreachClassifier::new(sensor());
        let outcome = classifier.classify(&ThresholdSet::default(), &samples(&[(60, 50)], 60));
        assert_eq!(outcome.samples[0].continuous, ContinuousLabel::None);
        assert_eq!(outcome.samples[0].cumulative, CumulativeLabel::None);
        assert!(classifier.ledger().is_empty());
    }

    #[test]
    fn test_late_sample_counts_only_toward_exposure() {
        let mut thresholds = continuous_thresholds();
        thresholds.insert(BreachThresholdConfig::new(
            BreachConfigId::HotCumulative,
            Celsius::from_degrees(9),
            Celsius::from_degrees(30),
            600,
        ));
        let mut classifier = BreachClassifier::new(sensor());
        classifier.classify(&thresholds, &samples(&[(600, 5)], 60));
        let outcome = classifier.classify(&thresholds, &samples(&[(300, 20)], 60));

        assert_eq!(outcome.samples[0].continuous, ContinuousLabel::None);
        assert!(classifier.ledger().is_empty());
        assert_eq!(
            classifier.exposure(BreachConfigId::HotCumulative).unwrap().exposure_seconds,
            60
        );
        assert_eq!(classifier.cursor(), Some(Timestamp::new(600)));
    }
}
