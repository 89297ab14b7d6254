//! Breach records and the per-sensor ledger that owns them

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{BreachConfigId, BreachKind};
use crate::errors::ColdchainError;
use crate::types::{SensorId, Timestamp};

/// Identifier of a breach record
pub type BreachId = Uuid;

/// An excursion classified by the engine
///
/// Only the engine opens and closes records; acknowledgement is the one
/// external mutation. A set `end_timestamp` is never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreachRecord {
    pub id: BreachId,
    pub sensor_id: SensorId,
    pub config_id: BreachConfigId,
    pub kind: BreachKind,
    pub start_timestamp: Timestamp,
    pub end_timestamp: Option<Timestamp>,
    pub acknowledged: bool,
}

impl BreachRecord {
    fn open(sensor_id: SensorId, config_id: BreachConfigId, start_timestamp: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            sensor_id,
            config_id,
            kind: config_id.kind(),
            start_timestamp,
            end_timestamp: None,
            acknowledged: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_timestamp.is_none()
    }

    /// Seconds of exposure, measured to `now` while open
    pub fn exposure_seconds(&self, now: Timestamp) -> u64 {
        self.end_timestamp.unwrap_or(now) - self.start_timestamp
    }
}

/// Ledger changes staged by one classification run
///
/// Records opened by the run live here until committed; closes of records
/// already in the ledger are kept as `(id, end)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreachDelta {
    opened: Vec<BreachRecord>,
    closed: Vec<(BreachId, Timestamp)>,
}

impl BreachDelta {
    pub(crate) fn open(
        &mut self,
        sensor_id: SensorId,
        config_id: BreachConfigId,
        start: Timestamp,
    ) -> BreachId {
        let record = BreachRecord::open(sensor_id, config_id, start);
        let id = record.id;
        self.opened.push(record);
        id
    }

    pub(crate) fn close(&mut self, id: BreachId, end: Timestamp) {
        match self.opened.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                if record.is_open() {
                    record.end_timestamp = Some(end);
                }
            }
            None => self.closed.push((id, end)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.closed.is_empty()
    }
}

/// All breach records of one sensor, in creation order
#[derive(Debug, Clone, Default)]
pub struct BreachLedger {
    records: Vec<BreachRecord>,
    index: HashMap<BreachId, usize>,
}

impl BreachLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close an open record; closed records are terminal and left untouched
    pub(crate) fn close(&mut self, id: BreachId, end: Timestamp) -> bool {
        match self.get_mut(id) {
            Some(record) if record.is_open() => {
                record.end_timestamp = Some(end);
                true
            }
            _ => false,
        }
    }

    /// Records as they will read once `delta` is committed
    ///
    /// Closed records come first, then opened ones in creation order.
    pub fn preview(&self, delta: &BreachDelta) -> Vec<BreachRecord> {
        let closed = delta.closed.iter().filter_map(|(id, end)| {
            let mut record = self.get(*id)?.clone();
            if record.is_open() {
                record.end_timestamp = Some(*end);
            }
            Some(record)
        });
        closed.chain(delta.opened.iter().cloned()).collect()
    }

    /// Apply a staged delta
    pub fn commit(&mut self, delta: BreachDelta) {
        for (id, end) in delta.closed {
            self.close(id, end);
        }
        for record in delta.opened {
            self.index.insert(record.id, self.records.len());
            self.records.push(record);
        }
    }

    /// Mark a record as acknowledged by an operator
    pub fn acknowledge(&mut self, id: BreachId) -> Result<&BreachRecord, ColdchainError> {
        let record = self
            .get_mut(id)
            .ok_or_else(|| ColdchainError::invalid_input(format!("Unknown breach {}", id)))?;
        record.acknowledged = true;
        Ok(record)
    }

    pub fn get(&self, id: BreachId) -> Option<&BreachRecord> {
        self.index.get(&id).map(|i| &self.records[*i])
    }

    fn get_mut(&mut self, id: BreachId) -> Option<&mut BreachRecord> {
        let i = *self.index.get(&id)?;
        self.records.get_mut(i)
    }

    pub fn records(&self) -> &[BreachRecord] {
        &self.records
    }

    pub fn count(&self, kind: BreachKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(ledger: &mut BreachLedger, config_id: BreachConfigId, start: u64) -> BreachId {
        let mut delta = BreachDelta::default();
        let id = delta.open(SensorId::new("s1"), config_id, Timestamp::new(start));
        ledger.commit(delta);
        id
    }

    #[test]
    fn test_closed_record_is_terminal() {
        let mut ledger = BreachLedger::new();
        let id = open(&mut ledger, BreachConfigId::HotBreach, 10);
        assert!(ledger.close(id, Timestamp::new(20)));
        assert!(!ledger.close(id, Timestamp::new(30)));
        assert_eq!(ledger.get(id).unwrap().end_timestamp, Some(Timestamp::new(20)));
    }

    #[test]
    fn test_acknowledge() {
        let mut ledger = BreachLedger::new();
        let id = open(&mut ledger, BreachConfigId::ColdBreach, 10);
        assert!(!ledger.get(id).unwrap().acknowledged);
        ledger.acknowledge(id).unwrap();
        assert!(ledger.get(id).unwrap().acknowledged);
        assert!(ledger.acknowledge(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_exposure_seconds() {
        let mut ledger = BreachLedger::new();
        let id = open(&mut ledger, BreachConfigId::HotBreach, 100);
        assert_eq!(ledger.get(id).unwrap().exposure_seconds(Timestamp::new(160)), 60);
        ledger.close(id, Timestamp::new(130));
        assert_eq!(ledger.get(id).unwrap().exposure_seconds(Timestamp::new(500)), 30);
        assert_eq!(ledger.count(BreachKind::Continuous), 1);
    }

    #[test]
    fn test_delta_is_invisible_until_committed() {
        let mut ledger = BreachLedger::new();
        let existing = open(&mut ledger, BreachConfigId::HotBreach, 10);

        let mut delta = BreachDelta::default();
        delta.close(existing, Timestamp::new(70));
        let opened = delta.open(
            SensorId::new("s1"),
            BreachConfigId::HotBreach,
            Timestamp::new(130),
        );
        delta.close(opened, Timestamp::new(190));

        let preview = ledger.preview(&delta);
        assert_eq!(preview.len(), 2);
        assert_eq!(preview[0].id, existing);
        assert_eq!(preview[0].end_timestamp, Some(Timestamp::new(70)));
        assert_eq!(preview[1].id, opened);
        assert_eq!(preview[1].end_timestamp, Some(Timestamp::new(190)));
        assert!(ledger.get(existing).unwrap().is_open());
        assert!(ledger.get(opened).is_none());

        ledger.commit(delta);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get(existing).unwrap().end_timestamp, Some(Timestamp::new(70)));
        assert_eq!(ledger.get(opened).unwrap().start_timestamp, Timestamp::new(130));
    }
}
