use crate::commit::tx::{Intent, SubTransactionId, WriteOp};

/// Append-only, sequence-ordered record of the writes buffered by one
/// transaction. Sequences start at 1 and strictly increase, so the log stays
/// sorted by sequence even after dead intents are compacted away.
#[derive(Debug, Clone)]
pub struct IntentLog {
    intents: Vec<Intent>,
    next_sequence: u64,
}

impl Default for IntentLog {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentLog {
    pub fn new() -> Self {
        Self {
            intents: Vec::new(),
            next_sequence: 1,
        }
    }

    pub fn append(&mut self, subtxn_id: SubTransactionId, op: WriteOp) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.intents.push(Intent {
            sequence,
            subtxn_id,
            op,
            alive: true,
        });
        sequence
    }

    /// Highest sequence handed out so far, 0 for an empty log.
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence.saturating_sub(1)
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn get(&self, sequence: u64) -> Option<&Intent> {
        self.intents
            .binary_search_by_key(&sequence, |intent| intent.sequence)
            .ok()
            .map(|idx| &self.intents[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Intent> {
        self.intents.iter()
    }

    pub fn live(&self) -> impl Iterator<Item = &Intent> {
        self.intents.iter().filter(|intent| intent.alive)
    }

    pub fn live_count(&self) -> usize {
        self.live().count()
    }

    /// Most recent live intent touching `key`, if any.
    pub fn latest_live(&self, key: &[u8]) -> Option<&Intent> {
        self.intents
            .iter()
            .rev()
            .find(|intent| intent.alive && intent.op.key() == key)
    }

    /// Value this transaction last wrote for `key`. A live delete, a dead
    /// write, or no write at all all read as absent.
    pub fn read_own_writes(&self, key: &[u8]) -> Option<&[u8]> {
        self.latest_live(key).and_then(|intent| intent.op.value())
    }

    /// Marks every intent with `sequence > cursor` dead and returns how many
    /// were alive before the call.
    pub(crate) fn kill_after(&mut self, cursor: u64) -> usize {
        let start = self
            .intents
            .partition_point(|intent| intent.sequence <= cursor);
        let mut killed = 0;
        for intent in &mut self.intents[start..] {
            if intent.alive {
                intent.alive = false;
                killed += 1;
            }
        }
        killed
    }

    pub(crate) fn retain_live(&mut self) {
        self.intents.retain(|intent| intent.alive);
    }
}
