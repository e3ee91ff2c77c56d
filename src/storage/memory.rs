use super::{ApplyChunk, StorageBackend, apply_write};
use crate::commit::tx::{Key, TxnId, Value};
use crate::error::StorageError;
use im::OrdMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRecord {
    pub txn_id: TxnId,
    pub chunk_index: usize,
    pub writes: usize,
}

#[derive(Debug, Clone)]
enum ChunkFault {
    Fail(String),
    Stall(Duration),
}

#[derive(Debug, Default)]
struct FaultPlan {
    chunks: HashMap<usize, ChunkFault>,
    fail_finalize: Option<String>,
    stall_finalize: Option<Duration>,
}

#[derive(Debug, Default)]
struct MemoryState {
    committed: OrdMap<Key, Value>,
    staged: HashMap<TxnId, BTreeMap<usize, ApplyChunk>>,
    chunk_log: Vec<ChunkRecord>,
    finalized_txns: u64,
}

/// In-process storage backend. Staged chunks are invisible to `get` until the
/// owning transaction is finalized; faults can be armed per chunk index.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
    faults: Mutex<FaultPlan>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every staging call for `chunk_index` fails with `Unavailable`.
    pub fn fail_on_chunk(&self, chunk_index: usize, message: impl Into<String>) {
        self.faults
            .lock()
            .chunks
            .insert(chunk_index, ChunkFault::Fail(message.into()));
    }

    /// Staging `chunk_index` sleeps for `delay` before it takes effect.
    pub fn stall_on_chunk(&self, chunk_index: usize, delay: Duration) {
        self.faults
            .lock()
            .chunks
            .insert(chunk_index, ChunkFault::Stall(delay));
    }

    pub fn fail_finalize(&self, message: impl Into<String>) {
        self.faults.lock().fail_finalize = Some(message.into());
    }

    /// `finalize` sleeps for `delay` before publishing.
    pub fn stall_finalize(&self, delay: Duration) {
        self.faults.lock().stall_finalize = Some(delay);
    }

    pub fn clear_faults(&self) {
        let mut faults = self.faults.lock();
        faults.chunks.clear();
        faults.fail_finalize = None;
        faults.stall_finalize = None;
    }

    pub fn snapshot(&self) -> OrdMap<Key, Value> {
        self.state.read().committed.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().committed.is_empty()
    }

    pub fn staged_chunks(&self, txn_id: TxnId) -> usize {
        self.state
            .read()
            .staged
            .get(&txn_id)
            .map_or(0, BTreeMap::len)
    }

    /// Write counts of every chunk staged for `txn_id`, in staging order.
    pub fn chunk_sizes(&self, txn_id: TxnId) -> Vec<usize> {
        self.state
            .read()
            .chunk_log
            .iter()
            .filter(|record| record.txn_id == txn_id)
            .map(|record| record.writes)
            .collect()
    }

    pub fn finalized_txns(&self) -> u64 {
        self.state.read().finalized_txns
    }

    fn stage(&self, chunk: ApplyChunk) {
        let mut state = self.state.write();
        state.chunk_log.push(ChunkRecord {
            txn_id: chunk.txn_id,
            chunk_index: chunk.chunk_index,
            writes: chunk.writes.len(),
        });
        state
            .staged
            .entry(chunk.txn_id)
            .or_default()
            .insert(chunk.chunk_index, chunk);
    }

    fn publish(&self, txn_id: TxnId) {
        let mut state = self.state.write();
        let staged = state.staged.remove(&txn_id).unwrap_or_default();
        let mut committed = state.committed.clone();
        for chunk in staged.values() {
            for write in &chunk.writes {
                apply_write(&mut committed, &write.op);
            }
        }
        state.committed = committed;
        state.finalized_txns += 1;
    }
}

impl StorageBackend for MemoryStorage {
    fn apply_chunk(
        &self,
        chunk: ApplyChunk,
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        let fault = self.faults.lock().chunks.get(&chunk.chunk_index).cloned();
        async move {
            match fault {
                Some(ChunkFault::Fail(message)) => return Err(StorageError::Unavailable(message)),
                Some(ChunkFault::Stall(delay)) => tokio::time::sleep(delay).await,
                None => {}
            }
            self.stage(chunk);
            Ok(())
        }
    }

    fn finalize(&self, txn_id: TxnId) -> impl Future<Output = Result<(), StorageError>> + Send {
        let (fail, stall) = {
            let faults = self.faults.lock();
            (faults.fail_finalize.clone(), faults.stall_finalize)
        };
        async move {
            if let Some(message) = fail {
                return Err(StorageError::Io(message));
            }
            if let Some(delay) = stall {
                tokio::time::sleep(delay).await;
            }
            self.publish(txn_id);
            Ok(())
        }
    }

    fn discard(&self, txn_id: TxnId) -> impl Future<Output = ()> + Send {
        self.state.write().staged.remove(&txn_id);
        async {}
    }

    fn get(&self, key: &[u8]) -> Option<Value> {
        self.state.read().committed.get(key).cloned()
    }
}
