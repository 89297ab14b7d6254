//! Breach classification
//!
//! The classifier advances a sensor's breach state sample by sample and the
//! ledger owns the resulting records.

pub mod classifier;
pub mod ledger;

pub use classifier::{
    BreachClassifier, ClassificationOutcome, ClassifierCheckpoint, ContinuousLabel,
    CumulativeExposure, CumulativeLabel, SampleClassification,
};
pub use ledger::{BreachDelta, BreachId, BreachLedger, BreachRecord};
