//! Sync sink that writes payloads instead of uploading them

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use coldchain_core::{ColdchainError, SyncBatch, SyncSink};

/// Writes each batch as pretty JSON to the wrapped writer
pub struct WriterSyncSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSyncSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WriterSyncSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

#[async_trait]
impl<W: Write + Send> SyncSink for WriterSyncSink<W> {
    async fn push(&self, batch: &SyncBatch) -> coldchain_core::Result<()> {
        let json = batch.to_json()?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| ColdchainError::store_error("sync writer poisoned"))?;
        writeln!(writer, "{}", json)
            .and_then(|_| writer.flush())
            .map_err(|e| ColdchainError::store_error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches_are_written_as_json() {
        let sink = WriterSyncSink::new(Vec::new());
        tokio_test::block_on(sink.push(&SyncBatch::default())).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(parsed["samples"], serde_json::json!([]));
        assert_eq!(parsed["breaches"], serde_json::json!([]));
    }
}
