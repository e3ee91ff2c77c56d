pub mod memory;

use crate::commit::tx::{Key, TxnId, Value, WriteOp};
use crate::error::StorageError;
use crate::savepoint::SubTransactionMetadata;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

pub use memory::MemoryStorage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkWrite {
    pub sequence: u64,
    pub op: WriteOp,
}

/// One bounded group of live writes, in ascending sequence order. Every chunk
/// of a commit shares one metadata snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyChunk {
    pub txn_id: TxnId,
    pub chunk_index: usize,
    pub writes: Vec<ChunkWrite>,
    pub metadata: Arc<SubTransactionMetadata>,
}

/// Durable side of the commit pipeline.
///
/// Chunks are staged per transaction and only become visible once `finalize`
/// succeeds. Staging the same `chunk_index` twice must replace the earlier
/// copy so a chunk can be retried. Chunks that are never finalized must never
/// become visible.
pub trait StorageBackend: Send + Sync + 'static {
    fn apply_chunk(
        &self,
        chunk: ApplyChunk,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn finalize(&self, txn_id: TxnId) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn discard(&self, txn_id: TxnId) -> impl Future<Output = ()> + Send;

    /// Latest committed value for `key`.
    fn get(&self, key: &[u8]) -> Option<Value>;
}

pub(crate) fn apply_write(map: &mut im::OrdMap<Key, Value>, op: &WriteOp) {
    match op {
        WriteOp::Put { key, value } => {
            map.insert(key.clone(), value.clone());
        }
        WriteOp::Delete { key } => {
            map.remove(key);
        }
    }
}
