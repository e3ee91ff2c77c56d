use crate::commit::tx::SubTransactionId;
use crate::error::TxnError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Named marker splitting a transaction's intents into the ones written
/// before it (`sequence <= cursor`) and the ones written after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Savepoint {
    pub name: String,
    pub cursor: u64,
    pub subtxn_id: SubTransactionId,
}

/// Stack of savepoints, bottom first. Names may repeat; lookups resolve to the
/// most recently pushed entry. Cursors never decrease from bottom to top.
#[derive(Debug, Clone, Default)]
pub struct SavepointStack {
    entries: Vec<Savepoint>,
}

impl SavepointStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Savepoint> {
        self.entries.iter()
    }

    pub fn top(&self) -> Option<&Savepoint> {
        self.entries.last()
    }

    pub(crate) fn push(&mut self, savepoint: Savepoint) -> &Savepoint {
        debug_assert!(
            self.top().is_none_or(|top| top.cursor <= savepoint.cursor),
            "savepoint cursor went backwards"
        );
        self.entries.push(savepoint);
        &self.entries[self.entries.len() - 1]
    }

    /// Stack position of the topmost savepoint named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().rposition(|sp| sp.name == name)
    }

    pub fn find(&self, name: &str) -> Option<&Savepoint> {
        self.position(name).map(|pos| &self.entries[pos])
    }

    pub(crate) fn locate(&self, name: &str) -> Result<(usize, &Savepoint), TxnError> {
        self.position(name)
            .map(|pos| (pos, &self.entries[pos]))
            .ok_or_else(|| TxnError::SavepointNotFound { name: name.into() })
    }

    /// Pops the topmost `name` entry together with everything pushed after it.
    pub(crate) fn release(&mut self, name: &str) -> Result<Savepoint, TxnError> {
        let (pos, released) = self.locate(name)?;
        let released = released.clone();
        self.entries.truncate(pos);
        Ok(released)
    }

    /// Pops every entry above `pos`, keeping `pos` itself.
    pub(crate) fn truncate_above(&mut self, pos: usize) -> usize {
        let popped = self.entries.len().saturating_sub(pos + 1);
        self.entries.truncate(pos + 1);
        popped
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Which sub-transaction is currently receiving writes and which ones have been
/// rolled back. Shipped with every apply chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTransactionMetadata {
    pub active: SubTransactionId,
    pub highest_issued: SubTransactionId,
    pub aborted: BTreeSet<SubTransactionId>,
    /// Issued ids not aborted yet. An id leaves this set at most once.
    unaborted: BTreeSet<SubTransactionId>,
}

impl Default for SubTransactionMetadata {
    fn default() -> Self {
        Self {
            active: SubTransactionId::FIRST,
            highest_issued: SubTransactionId::FIRST,
            aborted: BTreeSet::new(),
            unaborted: BTreeSet::from([SubTransactionId::FIRST]),
        }
    }
}

impl SubTransactionMetadata {
    pub fn is_aborted(&self, id: SubTransactionId) -> bool {
        self.aborted.contains(&id)
    }

    /// Fails once no fresh id is left to hand out.
    pub(crate) fn check_capacity(&self) -> Result<(), TxnError> {
        if self.highest_issued.0 == u32::MAX {
            return Err(TxnError::LimitExceeded {
                message: format!("sub-transaction ids exhausted at {}", u32::MAX),
            });
        }
        Ok(())
    }

    /// Opens a fresh sub-transaction and makes it active. Callers run
    /// [`Self::check_capacity`] first.
    pub(crate) fn begin_next(&mut self) -> SubTransactionId {
        debug_assert!(self.highest_issued.0 < u32::MAX, "sub-transaction ids exhausted");
        self.highest_issued = self.highest_issued.next();
        self.active = self.highest_issued;
        self.unaborted.insert(self.active);
        self.active
    }

    /// Aborts `from` and every sub-transaction issued after it, then moves
    /// writes onto a fresh id.
    pub(crate) fn abort_from(&mut self, from: SubTransactionId) {
        let doomed = self.unaborted.split_off(&from);
        self.aborted.extend(doomed);
        self.begin_next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TxnErrorCode;

    fn sp(name: &str, cursor: u64) -> Savepoint {
        Savepoint {
            name: name.into(),
            cursor,
            subtxn_id: SubTransactionId(cursor as u32 + 2),
        }
    }

    #[test]
    fn find_resolves_shadowed_names_to_topmost() {
        let mut stack = SavepointStack::new();
        stack.push(sp("a", 0));
        stack.push(sp("b", 1));
        stack.push(sp("a", 3));
        assert_eq!(stack.find("a").map(|s| s.cursor), Some(3));
        assert_eq!(stack.position("a"), Some(2));
        assert!(stack.find("missing").is_none());
    }

    #[test]
    fn release_pops_through_and_including_named_entry() {
        let mut stack = SavepointStack::new();
        stack.push(sp("a", 0));
        stack.push(sp("b", 1));
        stack.push(sp("c", 2));
        let released = stack.release("b").expect("release b");
        assert_eq!(released.name, "b");
        assert_eq!(stack.depth(), 1);
        assert!(stack.find("c").is_none());
        assert!(stack.find("a").is_some());
    }

    #[test]
    fn release_of_shadowed_name_uncovers_older_entry() {
        let mut stack = SavepointStack::new();
        stack.push(sp("a", 0));
        stack.push(sp("a", 4));
        stack.release("a").expect("release");
        assert_eq!(stack.find("a").map(|s| s.cursor), Some(0));
    }

    #[test]
    fn release_unknown_name_fails_without_change() {
        let mut stack = SavepointStack::new();
        stack.push(sp("a", 0));
        let err = stack.release("zzz").expect_err("missing");
        assert_eq!(err.code(), TxnErrorCode::SavepointNotFound);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn truncate_above_keeps_target() {
        let mut stack = SavepointStack::new();
        stack.push(sp("a", 0));
        stack.push(sp("b", 1));
        stack.push(sp("c", 1));
        assert_eq!(stack.truncate_above(0), 2);
        assert_eq!(stack.top().map(|s| s.name.as_str()), Some("a"));
    }

    #[test]
    fn abort_from_covers_every_later_id_and_moves_on() {
        let mut meta = SubTransactionMetadata::default();
        let a = meta.begin_next();
        let b = meta.begin_next();
        meta.abort_from(a);
        assert!(meta.is_aborted(a));
        assert!(meta.is_aborted(b));
        assert!(!meta.is_aborted(SubTransactionId::FIRST));
        assert!(meta.active > b);
        assert!(!meta.is_aborted(meta.active));
    }

    #[test]
    fn repeated_rollback_to_one_savepoint_aborts_each_id_once() {
        let mut meta = SubTransactionMetadata::default();
        let outer = meta.begin_next();
        for _ in 0..1_000 {
            meta.abort_from(outer);
        }
        assert_eq!(meta.aborted.len(), 1_000);
        assert_eq!(meta.active, SubTransactionId(outer.0 + 1_000));
        assert!(!meta.is_aborted(meta.active));
        assert!(!meta.is_aborted(SubTransactionId::FIRST));
        assert!((outer.0..meta.active.0).all(|id| meta.is_aborted(SubTransactionId(id))));
    }

    #[test]
    fn abort_reaches_ids_issued_after_an_earlier_abort() {
        let mut meta = SubTransactionMetadata::default();
        let a = meta.begin_next();
        let b = meta.begin_next();
        meta.abort_from(b);
        let after_b = meta.active;
        meta.abort_from(a);
        assert!(meta.is_aborted(a));
        assert!(meta.is_aborted(after_b));
        assert!(!meta.is_aborted(meta.active));
    }

    #[test]
    fn exhausted_ids_are_reported() {
        let mut meta = SubTransactionMetadata::default();
        meta.check_capacity().expect("fresh metadata");
        meta.highest_issued = SubTransactionId(u32::MAX);
        let err = meta.check_capacity().expect_err("exhausted");
        assert_eq!(err.code(), TxnErrorCode::LimitExceeded);
    }
}
