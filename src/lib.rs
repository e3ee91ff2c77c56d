pub mod commit;
pub mod config;
pub mod error;
pub mod intent;
pub mod savepoint;
pub mod session;
pub mod storage;
pub mod sync_bridge;
pub mod transaction;

pub use crate::commit::apply::{ApplySettings, CommitResult};
pub use crate::commit::tx::{Intent, Key, SubTransactionId, TxnId, TxnStatus, Value, WriteOp};
pub use crate::config::TxnConfig;
pub use crate::error::{StorageError, TxnError, TxnErrorCode};
pub use crate::session::{Session, Statement, StatementOutcome};
pub use crate::storage::{MemoryStorage, StorageBackend};
pub use crate::transaction::Transaction;

use crate::commit::apply::apply_on_commit;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct TxnTelemetry {
    begun: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    commit_failures: AtomicU64,
    chunks_flushed: AtomicU64,
    intents_applied: AtomicU64,
    intents_discarded: AtomicU64,
}

impl TxnTelemetry {
    fn record_failed_commit(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxnMetrics {
    pub begun: u64,
    pub committed: u64,
    pub aborted: u64,
    pub commit_failures: u64,
    pub chunks_flushed: u64,
    pub intents_applied: u64,
    pub intents_discarded: u64,
}

/// Entry point for the SQL execution layer: hands out transactions that share
/// one configuration and commits them against one storage backend.
pub struct TxnManager<S: StorageBackend> {
    config: Arc<TxnConfig>,
    storage: Arc<S>,
    telemetry: Arc<TxnTelemetry>,
    pending_discards: Arc<Mutex<Vec<TxnId>>>,
}

/// Held across a commit's flush. Dropping it while armed means the commit
/// future was cancelled: the abort is counted and the staged chunks are
/// discarded on the current runtime, or on the next commit when there is none.
struct CommitGuard<S: StorageBackend> {
    txn_id: TxnId,
    storage: Arc<S>,
    telemetry: Arc<TxnTelemetry>,
    pending_discards: Arc<Mutex<Vec<TxnId>>>,
    armed: bool,
}

impl<S: StorageBackend> CommitGuard<S> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S: StorageBackend> Drop for CommitGuard<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.telemetry.record_failed_commit();
        let txn_id = self.txn_id;
        match Handle::try_current() {
            Ok(handle) => {
                let storage = Arc::clone(&self.storage);
                handle.spawn(async move { storage.discard(txn_id).await });
            }
            Err(_) => self.pending_discards.lock().push(txn_id),
        }
        warn!(txn_id = %txn_id, "commit cancelled; transaction aborted");
    }
}

impl<S: StorageBackend> Clone for TxnManager<S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            storage: Arc::clone(&self.storage),
            telemetry: Arc::clone(&self.telemetry),
            pending_discards: Arc::clone(&self.pending_discards),
        }
    }
}

impl<S: StorageBackend> TxnManager<S> {
    pub fn new(config: TxnConfig, storage: Arc<S>) -> Result<Self, TxnError> {
        config.validate()?;
        info!(
            savepoints_enabled = config.savepoints_enabled,
            max_apply_batch_records = config.max_apply_batch_records,
            chunk_apply_timeout_ms = config.chunk_apply_timeout_ms,
            finalize_timeout_ms = config.finalize_timeout_ms,
            max_intents_per_txn = config.max_intents_per_txn,
            max_savepoint_depth = config.max_savepoint_depth,
            "txn manager config"
        );
        Ok(Self {
            config: Arc::new(config),
            storage,
            telemetry: Arc::new(TxnTelemetry::default()),
            pending_discards: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn config(&self) -> &TxnConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn begin(&self) -> Transaction {
        self.telemetry.begun.fetch_add(1, Ordering::Relaxed);
        Transaction::new(Arc::clone(&self.config))
    }

    /// Applies the live intents of `txn` using the configured apply threshold.
    pub async fn commit(&self, txn: &mut Transaction) -> Result<CommitResult, TxnError> {
        self.commit_with_settings(txn, ApplySettings::from(self.config.as_ref()))
            .await
    }

    pub async fn commit_with_threshold(
        &self,
        txn: &mut Transaction,
        threshold: usize,
    ) -> Result<CommitResult, TxnError> {
        let settings = ApplySettings {
            threshold,
            ..ApplySettings::from(self.config.as_ref())
        };
        self.commit_with_settings(txn, settings).await
    }

    pub async fn commit_with_settings(
        &self,
        txn: &mut Transaction,
        settings: ApplySettings,
    ) -> Result<CommitResult, TxnError> {
        self.drain_pending_discards().await;
        txn.require_active()?;
        let guard = CommitGuard {
            txn_id: txn.id(),
            storage: Arc::clone(&self.storage),
            telemetry: Arc::clone(&self.telemetry),
            pending_discards: Arc::clone(&self.pending_discards),
            armed: true,
        };
        let outcome = apply_on_commit(txn, self.storage.as_ref(), settings).await;
        guard.disarm();
        match outcome {
            Ok(result) => {
                self.telemetry.committed.fetch_add(1, Ordering::Relaxed);
                self.telemetry
                    .chunks_flushed
                    .fetch_add(result.chunks_flushed as u64, Ordering::Relaxed);
                self.telemetry
                    .intents_applied
                    .fetch_add(result.intents_applied as u64, Ordering::Relaxed);
                self.telemetry
                    .intents_discarded
                    .fetch_add(result.intents_discarded as u64, Ordering::Relaxed);
                Ok(result)
            }
            Err(err) => {
                self.telemetry.record_failed_commit();
                Err(err)
            }
        }
    }

    async fn drain_pending_discards(&self) {
        let pending = std::mem::take(&mut *self.pending_discards.lock());
        for txn_id in pending {
            self.storage.discard(txn_id).await;
        }
    }

    pub fn abort(&self, txn: &mut Transaction) -> Result<(), TxnError> {
        txn.abort()?;
        self.telemetry.aborted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn metrics(&self) -> TxnMetrics {
        TxnMetrics {
            begun: self.telemetry.begun.load(Ordering::Relaxed),
            committed: self.telemetry.committed.load(Ordering::Relaxed),
            aborted: self.telemetry.aborted.load(Ordering::Relaxed),
            commit_failures: self.telemetry.commit_failures.load(Ordering::Relaxed),
            chunks_flushed: self.telemetry.chunks_flushed.load(Ordering::Relaxed),
            intents_applied: self.telemetry.intents_applied.load(Ordering::Relaxed),
            intents_discarded: self.telemetry.intents_discarded.load(Ordering::Relaxed),
        }
    }
}
