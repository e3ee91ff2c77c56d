use crate::commit::tx::{TxnId, TxnStatus};
use crate::config::TxnConfig;
use crate::error::TxnError;
use crate::intent::IntentLog;
use crate::savepoint::SubTransactionMetadata;
use crate::storage::{ApplyChunk, ChunkWrite, StorageBackend};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    pub txn_id: TxnId,
    pub chunks_flushed: usize,
    pub intents_applied: usize,
    pub intents_discarded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplySettings {
    pub threshold: usize,
    pub chunk_timeout: Duration,
    pub finalize_timeout: Duration,
}

impl From<&TxnConfig> for ApplySettings {
    fn from(config: &TxnConfig) -> Self {
        Self {
            threshold: config.max_apply_batch_records,
            chunk_timeout: Duration::from_millis(config.chunk_apply_timeout_ms),
            finalize_timeout: Duration::from_millis(config.finalize_timeout_ms),
        }
    }
}

/// Lazily groups the live intents of `log` into consecutive chunks of at most
/// `threshold` writes, in sequence order. Dead intents never take a slot.
pub fn live_chunks(
    log: &IntentLog,
    threshold: usize,
) -> impl Iterator<Item = Vec<ChunkWrite>> + '_ {
    let threshold = threshold.max(1);
    let mut live = log.live();
    std::iter::from_fn(move || {
        let chunk: Vec<ChunkWrite> = live
            .by_ref()
            .take(threshold)
            .map(|intent| ChunkWrite {
                sequence: intent.sequence,
                op: intent.op.clone(),
            })
            .collect();
        (!chunk.is_empty()).then_some(chunk)
    })
}

pub fn plan_chunks(log: &IntentLog, threshold: usize) -> Vec<Vec<ChunkWrite>> {
    live_chunks(log, threshold).collect()
}

/// Flushes the live intents of an active transaction to `storage` chunk by
/// chunk, then publishes them. The transaction is Aborted for the whole
/// duration of the flush and only becomes Committed once `finalize` returns,
/// so an error, a timeout, or a dropped future all leave it Aborted.
pub(crate) async fn apply_on_commit<S: StorageBackend>(
    txn: &mut Transaction,
    storage: &S,
    settings: ApplySettings,
) -> Result<CommitResult, TxnError> {
    txn.require_active()?;
    txn.set_status(TxnStatus::Aborted);

    let txn_id = txn.id();
    let metadata = Arc::new(txn.sub_transaction_metadata().clone());
    let total = txn.intents().len();

    let outcome = flush_live_intents(txn.intents(), storage, txn_id, &metadata, settings).await;
    match outcome {
        Ok((chunks_flushed, intents_applied)) => {
            txn.set_status(TxnStatus::Committed);
            let result = CommitResult {
                txn_id,
                chunks_flushed,
                intents_applied,
                intents_discarded: total - intents_applied,
            };
            info!(
                txn_id = %txn_id,
                chunks_flushed,
                intents_applied,
                intents_discarded = result.intents_discarded,
                threshold = settings.threshold,
                "transaction committed"
            );
            Ok(result)
        }
        Err(err) => {
            storage.discard(txn_id).await;
            warn!(txn_id = %txn_id, error = %err, "commit apply failed; transaction aborted");
            Err(err)
        }
    }
}

async fn flush_live_intents<S: StorageBackend>(
    log: &IntentLog,
    storage: &S,
    txn_id: TxnId,
    metadata: &Arc<SubTransactionMetadata>,
    settings: ApplySettings,
) -> Result<(usize, usize), TxnError> {
    let mut chunks_flushed = 0;
    let mut intents_applied = 0;
    for (chunk_index, writes) in live_chunks(log, settings.threshold).enumerate() {
        intents_applied += writes.len();
        flush_chunk(storage, txn_id, chunk_index, writes, metadata, settings).await?;
        chunks_flushed += 1;
    }

    match tokio::time::timeout(settings.finalize_timeout, storage.finalize(txn_id)).await {
        Ok(Ok(())) => Ok((chunks_flushed, intents_applied)),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(TxnError::FinalizeTimeout { chunks_flushed }),
    }
}

async fn flush_chunk<S: StorageBackend>(
    storage: &S,
    txn_id: TxnId,
    chunk_index: usize,
    writes: Vec<ChunkWrite>,
    metadata: &Arc<SubTransactionMetadata>,
    settings: ApplySettings,
) -> Result<(), TxnError> {
    let chunk = ApplyChunk {
        txn_id,
        chunk_index,
        writes,
        metadata: Arc::clone(metadata),
    };
    match tokio::time::timeout(settings.chunk_timeout, storage.apply_chunk(chunk)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(TxnError::ApplyTimeout { chunk_index }),
    }
}
