use crate::error::TxnError;
use crate::intent::IntentLog;
use crate::savepoint::{Savepoint, SavepointStack, SubTransactionMetadata};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub savepoint: Savepoint,
    /// Intents that were alive before this rollback and are dead now.
    pub intents_killed: usize,
    /// Savepoints pushed after the target that were discarded.
    pub savepoints_popped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOutcome {
    pub savepoint: Savepoint,
    pub savepoints_popped: usize,
}

/// ROLLBACK TO: kills every intent written after the topmost `name` savepoint
/// and pops everything above it, leaving the target on the stack. Liveness is
/// decided by the sequence cursor alone, so writes made under nested
/// savepoints die even if those savepoints were released already.
pub(crate) fn rollback_to(
    log: &mut IntentLog,
    stack: &mut SavepointStack,
    subtxns: &mut SubTransactionMetadata,
    name: &str,
) -> Result<RollbackOutcome, TxnError> {
    let (pos, savepoint) = stack.locate(name)?;
    let savepoint = savepoint.clone();
    subtxns.check_capacity()?;

    let intents_killed = log.kill_after(savepoint.cursor);
    let savepoints_popped = stack.truncate_above(pos);
    subtxns.abort_from(savepoint.subtxn_id);

    debug!(
        savepoint = %savepoint.name,
        cursor = savepoint.cursor,
        intents_killed,
        savepoints_popped,
        "rolled back to savepoint"
    );
    Ok(RollbackOutcome {
        savepoint,
        intents_killed,
        savepoints_popped,
    })
}

/// RELEASE: pops the topmost `name` entry and everything above it. Intents are
/// untouched.
pub(crate) fn release(stack: &mut SavepointStack, name: &str) -> Result<ReleaseOutcome, TxnError> {
    let depth_before = stack.depth();
    let savepoint = stack.release(name)?;
    let savepoints_popped = depth_before - stack.depth();
    debug!(
        savepoint = %savepoint.name,
        cursor = savepoint.cursor,
        savepoints_popped,
        "released savepoint"
    );
    Ok(ReleaseOutcome {
        savepoint,
        savepoints_popped,
    })
}
