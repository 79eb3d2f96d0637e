// Async audit writer: keeps database inserts off the request path
use crate::database::{self, DbPool, Tables};
use crate::records::{
    BlockSimResultEntry, BuilderBlockSubmissionEntry, DeliveredPayloadEntry,
    ValidatorRegistrationEntry,
};
use anyhow::Result;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

#[derive(Debug, Clone)]
pub enum AuditRecord {
    ValidatorRegistration(ValidatorRegistrationEntry),
    /// A submission together with its simulation outcome, if known yet.
    /// The sim row needs the submission's id, so both go in one job.
    BlockSubmission {
        entry: BuilderBlockSubmissionEntry,
        sim_result: Option<Result<(), String>>,
    },
    DeliveredPayload(DeliveredPayloadEntry),
}

impl AuditRecord {
    fn kind(&self) -> &'static str {
        match self {
            Self::ValidatorRegistration(_) => "validator_registration",
            Self::BlockSubmission { .. } => "builder_block_submission",
            Self::DeliveredPayload(_) => "payload_delivered",
        }
    }
}

/// Anything that can persist one audit record. Implemented by the Postgres
/// sink; tests plug in a collector.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync + 'static {
    async fn write(&self, record: &AuditRecord) -> Result<()>;
}

pub struct PostgresSink {
    pool: DbPool,
    tables: Tables,
}

impl PostgresSink {
    pub fn new(pool: DbPool, tables: Tables) -> Self {
        Self { pool, tables }
    }
}

#[async_trait::async_trait]
impl AuditSink for PostgresSink {
    async fn write(&self, record: &AuditRecord) -> Result<()> {
        match record {
            AuditRecord::ValidatorRegistration(entry) => {
                database::save_validator_registration(&self.pool, &self.tables, entry).await
            }
            AuditRecord::BlockSubmission { entry, sim_result } => {
                let id = database::save_builder_block_submission(&self.pool, &self.tables, entry).await?;
                if let Some(result) = sim_result {
                    let sim = BlockSimResultEntry::new(id, result.clone());
                    database::save_block_sim_result(&self.pool, &self.tables, &sim).await?;
                }
                Ok(())
            }
            AuditRecord::DeliveredPayload(entry) => {
                database::save_delivered_payload(&self.pool, &self.tables, entry).await
            }
        }
    }
}

/// Handle to the background writer. Dropping every clone closes the channel;
/// the task then flushes what it holds and exits.
#[derive(Clone)]
pub struct AuditWriter {
    record_tx: mpsc::UnboundedSender<AuditRecord>,
}

impl AuditWriter {
    pub fn spawn<S: AuditSink>(sink: S, batch_size: usize, flush_interval: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(writer_task(sink, rx, batch_size.max(1), flush_interval));
        (Self { record_tx: tx }, handle)
    }

    /// Queue a record (non-blocking)
    pub fn send(&self, record: AuditRecord) -> Result<()> {
        self.record_tx
            .send(record)
            .map_err(|_| anyhow::anyhow!("Failed to queue audit record - writer task may have died"))?;
        Ok(())
    }

    pub fn validator_registration(&self, entry: ValidatorRegistrationEntry) -> Result<()> {
        self.send(AuditRecord::ValidatorRegistration(entry))
    }

    pub fn block_submission(
        &self,
        entry: BuilderBlockSubmissionEntry,
        sim_result: Option<Result<(), String>>,
    ) -> Result<()> {
        self.send(AuditRecord::BlockSubmission { entry, sim_result })
    }

    pub fn delivered_payload(&self, entry: DeliveredPayloadEntry) -> Result<()> {
        self.send(AuditRecord::DeliveredPayload(entry))
    }
}

async fn writer_task<S: AuditSink>(
    sink: S,
    mut rx: mpsc::UnboundedReceiver<AuditRecord>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut batch = Vec::with_capacity(batch_size);
    let mut flush_timer = interval(flush_interval);

    info!("Audit writer started (batch_size: {}, flush_interval: {:?})", batch_size, flush_interval);

    loop {
        tokio::select! {
            record = rx.recv() => {
                match record {
                    Some(r) => {
                        batch.push(r);
                        if batch.len() >= batch_size {
                            flush_batch(&sink, &mut batch).await;
                        }
                    }
                    None => {
                        flush_batch(&sink, &mut batch).await;
                        info!("Audit writer shutting down");
                        break;
                    }
                }
            }
            _ = flush_timer.tick() => {
                flush_batch(&sink, &mut batch).await;
            }
        }
    }
}

// Failed records are logged and dropped; the audit trail is best effort
async fn flush_batch<S: AuditSink>(sink: &S, batch: &mut Vec<AuditRecord>) {
    if batch.is_empty() {
        return;
    }

    let start = std::time::Instant::now();
    let total = batch.len();
    let mut written = 0;
    for record in batch.drain(..) {
        match sink.write(&record).await {
            Ok(()) => written += 1,
            Err(e) => error!("Failed to write {} record: {:#}", record.kind(), e),
        }
    }
    debug!("Flushed {}/{} audit records in {:?}", written, total, start.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Collector {
        seen: Arc<Mutex<Vec<&'static str>>>,
        fail_registrations: bool,
    }

    #[async_trait::async_trait]
    impl AuditSink for Collector {
        async fn write(&self, record: &AuditRecord) -> Result<()> {
            if self.fail_registrations && matches!(record, AuditRecord::ValidatorRegistration(_)) {
                anyhow::bail!("constraint violation");
            }
            self.seen.lock().unwrap().push(record.kind());
            Ok(())
        }
    }

    fn registration() -> ValidatorRegistrationEntry {
        ValidatorRegistrationEntry {
            pubkey: "0xaa".into(),
            fee_recipient: "0xbb".into(),
            timestamp: 1,
            gas_limit: 30_000_000,
            signature: "0xcc".into(),
        }
    }

    #[tokio::test]
    async fn test_flushes_remaining_on_close() {
        let sink = Collector::default();
        let seen = sink.seen.clone();
        let (writer, handle) = AuditWriter::spawn(sink, 100, Duration::from_secs(3600));
        writer.validator_registration(registration()).unwrap();
        writer.validator_registration(registration()).unwrap();
        drop(writer);
        handle.await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_record_does_not_block_others() {
        let sink = Collector { fail_registrations: true, ..Default::default() };
        let seen = sink.seen.clone();
        let (writer, handle) = AuditWriter::spawn(sink, 1, Duration::from_secs(3600));
        writer.validator_registration(registration()).unwrap();
        writer
            .send(AuditRecord::DeliveredPayload(DeliveredPayloadEntry {
                bid: crate::records::BidColumns {
                    epoch: 0,
                    slot: 1,
                    builder_pubkey: String::new(),
                    proposer_pubkey: String::new(),
                    proposer_fee_recipient: String::new(),
                    parent_hash: String::new(),
                    block_hash: String::new(),
                    block_number: 0,
                    num_tx: 0,
                    value: Default::default(),
                    gas_used: 0,
                    gas_limit: 0,
                },
                execution_payload: serde_json::Value::Null,
                bid_trace: serde_json::Value::Null,
                bid_trace_builder_sig: String::new(),
                signed_builder_bid: serde_json::Value::Null,
                signed_blinded_beacon_block: serde_json::Value::Null,
            }))
            .unwrap();
        drop(writer);
        handle.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["payload_delivered"]);
    }
}
