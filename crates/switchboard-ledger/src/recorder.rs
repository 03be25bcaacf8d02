use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{LedgerError, UsageRecord};

/// External store receiving every usage record
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn write(&self, record: &UsageRecord) -> Result<(), LedgerError>;
}

/// Async usage recorder that dispatches records to a background task
///
/// Records are sent via an unbounded channel and written asynchronously so
/// recording never blocks the response.
#[derive(Clone)]
pub struct UsageRecorder {
    tx: mpsc::UnboundedSender<UsageRecord>,
}

impl UsageRecorder {
    /// Create a new recorder and spawn its background task
    ///
    /// The background task runs until every sender is dropped.
    pub fn new(sink: Arc<dyn UsageSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(process_records(rx, sink));

        Self { tx }
    }

    /// Enqueue a record for the sink
    ///
    /// Fire-and-forget. If the background task stopped, the record is
    /// dropped with a warning.
    pub fn record(&self, record: UsageRecord) {
        if let Err(e) = self.tx.send(record) {
            tracing::warn!(record_id = %e.0.id, "failed to enqueue usage record, channel closed");
        }
    }
}

impl std::fmt::Debug for UsageRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageRecorder").finish_non_exhaustive()
    }
}

async fn process_records(mut rx: mpsc::UnboundedReceiver<UsageRecord>, sink: Arc<dyn UsageSink>) {
    while let Some(record) = rx.recv().await {
        if let Err(e) = sink.write(&record).await {
            tracing::warn!(
                error = %e,
                record_id = %record.id,
                caller = %record.caller_id,
                "failed to write usage record"
            );
        }
    }

    tracing::debug!("usage recorder shutting down");
}
