//! Cold-chain Core
//!
//! Wire codec for cold-chain temperature sensors, the bounded retry executor,
//! threshold configuration, the breach classification engine and the log
//! ingestion pipeline that feeds it. Runtime agnostic: no I/O happens here.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod breach;
pub mod config;
pub mod errors;
pub mod ingestion;
pub mod protocol;
pub mod report;
pub mod retry;
pub mod store;
pub mod sync;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use breach::{
    BreachClassifier, BreachId, BreachLedger, BreachRecord, ContinuousLabel, CumulativeLabel,
    SampleClassification,
};
pub use config::{BreachConfigId, BreachKind, BreachThresholdConfig, ThresholdSet};
pub use errors::{
    CodecError, ColdchainError, ColdchainResult, ConfigError, DecodeError, IngestError,
    Result, RetryError,
};
pub use ingestion::{samples_from_download, IngestReport, LogPipeline, LoggedSample, SensorLog};
pub use protocol::{
    decode_reply, encode, Advertisement, Command, DeviceEvent, DeviceInfo, FirmwareProfile,
    LogDownload, ReplyAssembler,
};
pub use retry::{execute, Retryable};
pub use store::{LogStore, MemoryLogStore};
pub use sync::{SyncBatch, SyncSink};
pub use types::{Celsius, DeviceId, SensorId, TemperatureSample, Timestamp};
