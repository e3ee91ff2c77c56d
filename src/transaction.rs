use crate::commit::rollback::{self, ReleaseOutcome, RollbackOutcome};
use crate::commit::tx::{Intent, Key, TxnId, TxnStatus, Value, WriteOp};
use crate::config::TxnConfig;
use crate::error::TxnError;
use crate::intent::IntentLog;
use crate::savepoint::{Savepoint, SavepointStack, SubTransactionMetadata};
use std::sync::Arc;
use tracing::debug;

/// A single transaction: its buffered writes, its savepoints, and its
/// lifecycle. Only an Active transaction accepts mutations; Committed and
/// Aborted are terminal.
///
/// Statements for one transaction must be issued one at a time; the type is
/// driven through `&mut self` and holds no locks.
///
/// A transaction is owned by exactly one caller, so it cannot be cloned:
///
/// ```compile_fail
/// use intent_txn::{Transaction, TxnConfig};
/// use std::sync::Arc;
///
/// let txn = Transaction::new(Arc::new(TxnConfig::default()));
/// let twin = txn.clone();
/// ```
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    status: TxnStatus,
    config: Arc<TxnConfig>,
    log: IntentLog,
    savepoints: SavepointStack,
    subtxns: SubTransactionMetadata,
}

impl Transaction {
    pub fn new(config: Arc<TxnConfig>) -> Self {
        Self::with_id(TxnId::generate(), config)
    }

    pub fn with_id(id: TxnId, config: Arc<TxnConfig>) -> Self {
        Self {
            id,
            status: TxnStatus::Active,
            config,
            log: IntentLog::new(),
            savepoints: SavepointStack::new(),
            subtxns: SubTransactionMetadata::default(),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn status(&self) -> TxnStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == TxnStatus::Active
    }

    pub fn config(&self) -> &TxnConfig {
        &self.config
    }

    pub fn intents(&self) -> &IntentLog {
        &self.log
    }

    pub fn savepoints(&self) -> &SavepointStack {
        &self.savepoints
    }

    pub fn sub_transaction_metadata(&self) -> &SubTransactionMetadata {
        &self.subtxns
    }

    pub fn require_active(&self) -> Result<(), TxnError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TxnError::InvalidState {
                txn_id: self.id,
                status: self.status,
            })
        }
    }

    pub(crate) fn set_status(&mut self, status: TxnStatus) {
        self.status = status;
    }

    pub fn append(&mut self, op: WriteOp) -> Result<u64, TxnError> {
        self.require_active()?;
        if self.log.len() >= self.config.max_intents_per_txn {
            return Err(TxnError::LimitExceeded {
                message: format!(
                    "transaction holds {} intents (max_intents_per_txn)",
                    self.log.len()
                ),
            });
        }
        Ok(self.log.append(self.subtxns.active, op))
    }

    pub fn put(&mut self, key: impl Into<Key>, value: impl Into<Value>) -> Result<u64, TxnError> {
        self.append(WriteOp::Put {
            key: key.into(),
            value: value.into(),
        })
    }

    pub fn delete(&mut self, key: impl Into<Key>) -> Result<u64, TxnError> {
        self.append(WriteOp::Delete { key: key.into() })
    }

    pub fn read_own_writes(&self, key: &[u8]) -> Option<&[u8]> {
        self.log.read_own_writes(key)
    }

    /// Latest live intent for `key`, including deletes.
    pub fn latest_live_write(&self, key: &[u8]) -> Option<&Intent> {
        self.log.latest_live(key)
    }

    pub fn savepoint(&mut self, name: impl Into<String>) -> Result<&Savepoint, TxnError> {
        self.require_active()?;
        if !self.config.savepoints_enabled {
            return Err(TxnError::SavepointsDisabled);
        }
        if self.savepoints.depth() >= self.config.max_savepoint_depth {
            return Err(TxnError::LimitExceeded {
                message: format!(
                    "savepoint depth {} reached (max_savepoint_depth)",
                    self.savepoints.depth()
                ),
            });
        }
        self.subtxns.check_capacity()?;
        let name = name.into();
        let cursor = self.log.last_sequence();
        let subtxn_id = self.subtxns.begin_next();
        debug!(txn_id = %self.id, savepoint = %name, cursor, "savepoint created");
        Ok(self.savepoints.push(Savepoint {
            name,
            cursor,
            subtxn_id,
        }))
    }

    pub fn release_savepoint(&mut self, name: &str) -> Result<ReleaseOutcome, TxnError> {
        self.require_active()?;
        rollback::release(&mut self.savepoints, name)
    }

    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<RollbackOutcome, TxnError> {
        self.require_active()?;
        rollback::rollback_to(&mut self.log, &mut self.savepoints, &mut self.subtxns, name)
    }

    /// Ends the transaction without applying anything.
    pub fn abort(&mut self) -> Result<(), TxnError> {
        self.require_active()?;
        self.status = TxnStatus::Aborted;
        self.savepoints.clear();
        debug!(txn_id = %self.id, intents = self.log.len(), "transaction aborted");
        Ok(())
    }

    /// Physically drops dead intents. Only legal once the transaction ended.
    pub fn compact(&mut self) -> Result<usize, TxnError> {
        if !self.status.is_terminal() {
            return Err(TxnError::InvalidState {
                txn_id: self.id,
                status: self.status,
            });
        }
        let before = self.log.len();
        self.log.retain_live();
        Ok(before - self.log.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::tx::SubTransactionId;
    use crate::error::TxnErrorCode;
    use proptest::prelude::*;

    fn txn() -> Transaction {
        Transaction::new(Arc::new(TxnConfig::default()))
    }

    #[test]
    fn savepoint_rollback_hides_later_insert() {
        let mut t = txn();
        t.put(b"1".to_vec(), b"2".to_vec()).expect("insert 1");
        t.savepoint("a").expect("savepoint");
        t.put(b"3".to_vec(), b"4".to_vec()).expect("insert 3");
        t.rollback_to_savepoint("a").expect("rollback");

        assert_eq!(t.read_own_writes(b"1"), Some(&b"2"[..]));
        assert_eq!(t.read_own_writes(b"3"), None);
        assert!(t.latest_live_write(b"3").is_none());
    }

    #[test]
    fn savepoint_cursor_is_current_max_sequence() {
        let mut t = txn();
        assert_eq!(t.savepoint("empty").expect("sp").cursor, 0);
        t.put(b"k".to_vec(), b"v".to_vec()).expect("put");
        t.put(b"k".to_vec(), b"w".to_vec()).expect("put");
        assert_eq!(t.savepoint("two").expect("sp").cursor, 2);
    }

    #[test]
    fn terminal_transaction_rejects_every_mutation() {
        let mut t = txn();
        t.savepoint("a").expect("savepoint");
        t.abort().expect("abort");

        let errors = [
            t.put(b"k".to_vec(), b"v".to_vec()).expect_err("put"),
            t.savepoint("b").map(|_| ()).expect_err("savepoint"),
            t.release_savepoint("a").map(|_| ()).expect_err("release"),
            t.rollback_to_savepoint("a").map(|_| ()).expect_err("rollback"),
            t.abort().expect_err("abort twice"),
        ];
        for err in errors {
            assert_eq!(err.code(), TxnErrorCode::InvalidState);
        }
        assert_eq!(t.status(), TxnStatus::Aborted);
    }

    #[test]
    fn disabled_savepoints_are_rejected() {
        let mut t = Transaction::new(Arc::new(TxnConfig::default().with_savepoints(false)));
        let err = t.savepoint("a").map(|_| ()).expect_err("disabled");
        assert_eq!(err.code(), TxnErrorCode::SavepointsDisabled);
        let err = t.rollback_to_savepoint("a").expect_err("nothing to roll back to");
        assert_eq!(err.code(), TxnErrorCode::SavepointNotFound);
    }

    #[test]
    fn intent_limit_rejects_without_appending() {
        let config = TxnConfig {
            max_intents_per_txn: 2,
            ..TxnConfig::default()
        };
        let mut t = Transaction::new(Arc::new(config));
        t.put(b"a".to_vec(), b"1".to_vec()).expect("first");
        t.put(b"b".to_vec(), b"2".to_vec()).expect("second");
        let err = t.put(b"c".to_vec(), b"3".to_vec()).expect_err("third");
        assert_eq!(err.code(), TxnErrorCode::LimitExceeded);
        assert_eq!(t.intents().len(), 2);
    }

    #[test]
    fn savepoint_depth_limit_rejects_without_side_effects() {
        let config = TxnConfig {
            max_savepoint_depth: 2,
            ..TxnConfig::default()
        };
        let mut t = Transaction::new(Arc::new(config));
        t.savepoint("a").expect("first");
        t.savepoint("b").expect("second");
        let before = t.sub_transaction_metadata().clone();

        let err = t.savepoint("c").map(|_| ()).expect_err("third");
        assert_eq!(err.code(), TxnErrorCode::LimitExceeded);
        assert_eq!(t.savepoints().depth(), 2);
        assert_eq!(t.sub_transaction_metadata(), &before);

        t.rollback_to_savepoint("b").expect("rollback keeps depth");
        t.savepoint("c").map(|_| ()).expect_err("still at the limit");
        t.release_savepoint("b").expect("release frees a slot");
        t.savepoint("c").expect("room again");
    }

    #[test]
    fn exhausted_subtransaction_ids_reject_savepoint() {
        let mut t = txn();
        t.subtxns.highest_issued = SubTransactionId(u32::MAX);
        t.subtxns.active = SubTransactionId(u32::MAX);
        let err = t.savepoint("a").map(|_| ()).expect_err("no id left");
        assert_eq!(err.code(), TxnErrorCode::LimitExceeded);
        assert!(t.savepoints().is_empty());
        t.put(b"k".to_vec(), b"v".to_vec())
            .expect("writes still go to the active id");
    }

    #[test]
    fn compact_requires_terminal_state() {
        let mut t = txn();
        t.savepoint("a").expect("savepoint");
        t.put(b"x".to_vec(), b"1".to_vec()).expect("put");
        t.rollback_to_savepoint("a").expect("rollback");
        assert_eq!(
            t.compact().expect_err("active").code(),
            TxnErrorCode::InvalidState
        );
        t.abort().expect("abort");
        assert_eq!(t.compact().expect("compact"), 1);
        assert!(t.intents().is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8, u8),
        Delete(u8),
        Savepoint(u8),
        Release(u8),
        Rollback(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0u8..8, any::<u8>()).prop_map(|(k, v)| Op::Put(k, v)),
            1 => (0u8..8).prop_map(Op::Delete),
            2 => (0u8..3).prop_map(Op::Savepoint),
            1 => (0u8..3).prop_map(Op::Release),
            2 => (0u8..3).prop_map(Op::Rollback),
        ]
    }

    fn run(ops: &[Op]) -> Transaction {
        let mut t = txn();
        for op in ops {
            let _ = match op {
                Op::Put(k, v) => t.put(vec![*k], vec![*v]).map(|_| ()),
                Op::Delete(k) => t.delete(vec![*k]).map(|_| ()),
                Op::Savepoint(n) => t.savepoint(format!("sp{n}")).map(|_| ()),
                Op::Release(n) => t.release_savepoint(&format!("sp{n}")).map(|_| ()),
                Op::Rollback(n) => t.rollback_to_savepoint(&format!("sp{n}")).map(|_| ()),
            };
        }
        t
    }

    proptest! {
        #[test]
        fn alive_flags_agree_with_aborted_subtransactions(
            ops in proptest::collection::vec(op_strategy(), 0..64)
        ) {
            let t = run(&ops);
            let meta = t.sub_transaction_metadata();
            for intent in t.intents().iter() {
                prop_assert_eq!(intent.alive, !meta.is_aborted(intent.subtxn_id));
            }
        }

        #[test]
        fn release_never_changes_liveness(
            ops in proptest::collection::vec(op_strategy(), 0..64),
            target in 0u8..3
        ) {
            let mut t = run(&ops);
            let before: Vec<bool> = t.intents().iter().map(|i| i.alive).collect();
            let _ = t.release_savepoint(&format!("sp{target}"));
            let after: Vec<bool> = t.intents().iter().map(|i| i.alive).collect();
            prop_assert_eq!(before, after);
        }

        #[test]
        fn rollback_twice_is_idempotent(
            ops in proptest::collection::vec(op_strategy(), 0..64),
            target in 0u8..3
        ) {
            let mut t = run(&ops);
            let name = format!("sp{target}");
            if t.rollback_to_savepoint(&name).is_ok() {
                let alive: Vec<bool> = t.intents().iter().map(|i| i.alive).collect();
                let depth = t.savepoints().depth();
                let again = t.rollback_to_savepoint(&name).expect("still on stack");
                prop_assert_eq!(again.intents_killed, 0);
                prop_assert_eq!(t.savepoints().depth(), depth);
                let alive_again: Vec<bool> = t.intents().iter().map(|i| i.alive).collect();
                prop_assert_eq!(alive, alive_again);
            }
        }

        #[test]
        fn savepoint_cursors_never_decrease(
            ops in proptest::collection::vec(op_strategy(), 0..64)
        ) {
            let t = run(&ops);
            let cursors: Vec<u64> = t.savepoints().iter().map(|sp| sp.cursor).collect();
            prop_assert!(cursors.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
