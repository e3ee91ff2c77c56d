use crate::TxnManager;
use crate::commit::apply::CommitResult;
use crate::commit::tx::{Key, Value};
use crate::error::TxnError;
use crate::storage::StorageBackend;
use crate::transaction::Transaction;

/// One client-visible statement, already bound to a single-row key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Insert { key: Key, value: Value },
    Update { key: Key, value: Value },
    Delete { key: Key },
    Savepoint { name: String },
    Release { name: String },
    RollbackTo { name: String },
    Commit,
    Rollback,
}

impl Statement {
    pub fn insert(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self::Insert {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn update(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self::Update {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Key>) -> Self {
        Self::Delete { key: key.into() }
    }

    pub fn savepoint(name: impl Into<String>) -> Self {
        Self::Savepoint { name: name.into() }
    }

    pub fn release(name: impl Into<String>) -> Self {
        Self::Release { name: name.into() }
    }

    pub fn rollback_to(name: impl Into<String>) -> Self {
        Self::RollbackTo { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementOutcome {
    RowsAffected(u64),
    Savepoint,
    Committed(CommitResult),
    RolledBack,
}

/// Connection-scoped statement executor with autocommit off: the first
/// statement opens a transaction, COMMIT or ROLLBACK closes it.
pub struct Session<S: StorageBackend> {
    manager: TxnManager<S>,
    current: Option<Transaction>,
}

impl<S: StorageBackend> Session<S> {
    pub fn new(manager: TxnManager<S>) -> Self {
        Self {
            manager,
            current: None,
        }
    }

    pub fn manager(&self) -> &TxnManager<S> {
        &self.manager
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.current.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.current.is_some()
    }

    /// Row visible to this session: its own live writes first, then committed
    /// storage.
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        if let Some(intent) = self
            .current
            .as_ref()
            .and_then(|txn| txn.latest_live_write(key))
        {
            return intent.op.value().map(<[u8]>::to_vec);
        }
        self.manager.storage().get(key)
    }

    pub async fn execute(&mut self, statement: Statement) -> Result<StatementOutcome, TxnError> {
        match statement {
            Statement::Insert { key, value } => {
                if self.get(&key).is_some() {
                    return Err(TxnError::DuplicateKey { key });
                }
                self.txn_mut().put(key, value)?;
                Ok(StatementOutcome::RowsAffected(1))
            }
            Statement::Update { key, value } => {
                if self.get(&key).is_none() {
                    return Ok(StatementOutcome::RowsAffected(0));
                }
                self.txn_mut().put(key, value)?;
                Ok(StatementOutcome::RowsAffected(1))
            }
            Statement::Delete { key } => {
                if self.get(&key).is_none() {
                    return Ok(StatementOutcome::RowsAffected(0));
                }
                self.txn_mut().delete(key)?;
                Ok(StatementOutcome::RowsAffected(1))
            }
            Statement::Savepoint { name } => {
                self.txn_mut().savepoint(name)?;
                Ok(StatementOutcome::Savepoint)
            }
            Statement::Release { name } => {
                self.txn_mut().release_savepoint(&name)?;
                Ok(StatementOutcome::Savepoint)
            }
            Statement::RollbackTo { name } => {
                self.txn_mut().rollback_to_savepoint(&name)?;
                Ok(StatementOutcome::Savepoint)
            }
            Statement::Commit => {
                let mut txn = match self.current.take() {
                    Some(txn) => txn,
                    None => self.manager.begin(),
                };
                let result = self.manager.commit(&mut txn).await?;
                Ok(StatementOutcome::Committed(result))
            }
            Statement::Rollback => {
                if let Some(mut txn) = self.current.take() {
                    self.manager.abort(&mut txn)?;
                }
                Ok(StatementOutcome::RolledBack)
            }
        }
    }

    fn txn_mut(&mut self) -> &mut Transaction {
        let manager = &self.manager;
        self.current.get_or_insert_with(|| manager.begin())
    }
}
