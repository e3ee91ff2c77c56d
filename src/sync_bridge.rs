use crate::TxnManager;
use crate::commit::apply::CommitResult;
use crate::commit::tx::Value;
use crate::error::TxnError;
use crate::session::{Session, Statement, StatementOutcome};
use crate::storage::StorageBackend;
use crate::transaction::Transaction;
use std::future::Future;
use tokio::runtime::Handle;

pub fn block_on_txn<F, T>(rt: &Handle, f: F) -> T
where
    F: Future<Output = T>,
{
    match Handle::try_current() {
        Ok(_) => tokio::task::block_in_place(|| rt.block_on(f)),
        Err(_) => rt.block_on(f),
    }
}

/// Blocking facade over [`TxnManager`] for callers without an async runtime.
pub struct TxnManagerSync<S: StorageBackend> {
    inner: TxnManager<S>,
    rt: Handle,
}

impl<S: StorageBackend> TxnManagerSync<S> {
    pub fn new(inner: TxnManager<S>, rt: Handle) -> Self {
        Self { inner, rt }
    }

    pub fn begin(&self) -> Transaction {
        self.inner.begin()
    }

    pub fn commit(&self, txn: &mut Transaction) -> Result<CommitResult, TxnError> {
        block_on_txn(&self.rt, self.inner.commit(txn))
    }

    pub fn commit_with_threshold(
        &self,
        txn: &mut Transaction,
        threshold: usize,
    ) -> Result<CommitResult, TxnError> {
        block_on_txn(&self.rt, self.inner.commit_with_threshold(txn, threshold))
    }

    pub fn abort(&self, txn: &mut Transaction) -> Result<(), TxnError> {
        self.inner.abort(txn)
    }

    pub fn inner(&self) -> &TxnManager<S> {
        &self.inner
    }
}

pub struct SessionSync<S: StorageBackend> {
    inner: Session<S>,
    rt: Handle,
}

impl<S: StorageBackend> SessionSync<S> {
    pub fn new(inner: Session<S>, rt: Handle) -> Self {
        Self { inner, rt }
    }

    pub fn execute(&mut self, statement: Statement) -> Result<StatementOutcome, TxnError> {
        block_on_txn(&self.rt, self.inner.execute(statement))
    }

    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.inner.get(key)
    }

    pub fn into_inner(self) -> Session<S> {
        self.inner
    }
}
