//! Append-only log store
//!
//! The pipeline hands every newly ingested sample and every breach record
//! change to a [`LogStore`]. The persistence format belongs to the host.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::breach::{BreachId, BreachRecord};
use crate::errors::{ColdchainError, Result};
use crate::ingestion::LoggedSample;

/// Append-only sink for ingested samples and breach record versions
pub trait LogStore: Send + Sync {
    /// Append samples in canonical order
    fn append_samples(&self, samples: &[LoggedSample]) -> Result<()>;

    /// Append the latest version of a breach record
    fn record_breach(&self, record: &BreachRecord) -> Result<()>;
}

impl<S: LogStore + ?Sized> LogStore for Arc<S> {
    fn append_samples(&self, samples: &[LoggedSample]) -> Result<()> {
        (**self).append_samples(samples)
    }

    fn record_breach(&self, record: &BreachRecord) -> Result<()> {
        (**self).record_breach(record)
    }
}

/// In-memory store, used by the CLI and in tests
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    samples: Mutex<Vec<LoggedSample>>,
    breaches: Mutex<Vec<BreachRecord>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sample appended so far
    pub fn samples(&self) -> Vec<LoggedSample> {
        self.samples.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Every breach version appended so far, oldest first
    pub fn breach_history(&self) -> Vec<BreachRecord> {
        self.breaches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Latest version of each breach record
    pub fn latest_breaches(&self) -> Vec<BreachRecord> {
        let history = self.breach_history();
        let mut order: Vec<BreachId> = Vec::new();
        let mut latest: HashMap<BreachId, BreachRecord> = HashMap::new();
        for record in history {
            if !latest.contains_key(&record.id) {
                order.push(record.id);
            }
            latest.insert(record.id, record);
        }
        order.into_iter().filter_map(|id| latest.remove(&id)).collect()
    }
}

impl LogStore for MemoryLogStore {
    fn append_samples(&self, samples: &[LoggedSample]) -> Result<()> {
        let mut stored = self
            .samples
            .lock()
            .map_err(|_| ColdchainError::store_error("sample log lock poisoned"))?;
        stored.extend_from_slice(samples);
        Ok(())
    }

    fn record_breach(&self, record: &BreachRecord) -> Result<()> {
        let mut stored = self
            .breaches
            .lock()
            .map_err(|_| ColdchainError::store_error("breach log lock poisoned"))?;
        stored.push(record.clone());
        Ok(())
    }
}
