//! Append-only fact log.
//!
//! Records are kept in arrival order; timestamps are carried but never used to
//! reorder. Every record gets a process-wide sequence number so replay sources
//! (snapshot + journal) can be merged without double-applying.

use serde::{Deserialize, Serialize};

/// Epoch milliseconds.
pub type Timestamp = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillRecord {
    pub seq: u64,
    pub actor: String,
    pub target: String,
    pub timestamp: Timestamp,
    pub event_scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootRecord {
    pub seq: u64,
    pub actor: String,
    /// Negative for manual corrections.
    pub amount: i64,
    pub timestamp: Timestamp,
    pub event_scope: String,
    #[serde(default)]
    pub manual: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerRecord {
    Kill(KillRecord),
    Loot(LootRecord),
}

impl LedgerRecord {
    pub fn seq(&self) -> u64 {
        match self {
            Self::Kill(k) => k.seq,
            Self::Loot(l) => l.seq,
        }
    }

    pub fn event_scope(&self) -> &str {
        match self {
            Self::Kill(k) => &k.event_scope,
            Self::Loot(l) => &l.event_scope,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Kill,
    Loot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    kills: Vec<KillRecord>,
    loots: Vec<LootRecord>,
    next_seq: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted slices, preserving their order.
    pub fn from_parts(kills: Vec<KillRecord>, loots: Vec<LootRecord>) -> Self {
        let next_seq = kills
            .iter()
            .map(|k| k.seq)
            .chain(loots.iter().map(|l| l.seq))
            .max()
            .map(|s| s + 1)
            .unwrap_or(0);
        Self {
            kills,
            loots,
            next_seq,
        }
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Never moves the counter backwards.
    pub fn resume_seq(&mut self, seq: u64) {
        self.next_seq = self.next_seq.max(seq);
    }

    pub fn record_kill(
        &mut self,
        actor: &str,
        target: &str,
        timestamp: Timestamp,
        event_scope: &str,
    ) -> KillRecord {
        let record = KillRecord {
            seq: self.take_seq(),
            actor: actor.to_string(),
            target: target.to_string(),
            timestamp,
            event_scope: event_scope.to_string(),
        };
        self.kills.push(record.clone());
        record
    }

    pub fn record_loot(
        &mut self,
        actor: &str,
        amount: i64,
        timestamp: Timestamp,
        event_scope: &str,
        manual: bool,
    ) -> LootRecord {
        let record = LootRecord {
            seq: self.take_seq(),
            actor: actor.to_string(),
            amount,
            timestamp,
            event_scope: event_scope.to_string(),
            manual,
        };
        self.loots.push(record.clone());
        record
    }

    /// Append a record that already carries a sequence number (replay path).
    pub fn append(&mut self, record: LedgerRecord) {
        self.next_seq = self.next_seq.max(record.seq() + 1);
        match record {
            LedgerRecord::Kill(k) => self.kills.push(k),
            LedgerRecord::Loot(l) => self.loots.push(l),
        }
    }

    pub fn kills(&self) -> &[KillRecord] {
        &self.kills
    }

    pub fn loots(&self) -> &[LootRecord] {
        &self.loots
    }

    /// Both kinds merged in arrival (sequence) order.
    pub fn records(&self) -> Vec<LedgerRecord> {
        let mut all: Vec<LedgerRecord> = self
            .kills
            .iter()
            .cloned()
            .map(LedgerRecord::Kill)
            .chain(self.loots.iter().cloned().map(LedgerRecord::Loot))
            .collect();
        all.sort_by_key(|r| r.seq());
        all
    }

    pub fn len(&self, kind: RecordKind) -> usize {
        match kind {
            RecordKind::Kill => self.kills.len(),
            RecordKind::Loot => self.loots.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kills.is_empty() && self.loots.is_empty()
    }

    /// Bulk prune. Returns the number of records removed across both kinds.
    pub fn retain<K, L>(&mut self, mut keep_kill: K, mut keep_loot: L) -> usize
    where
        K: FnMut(&KillRecord) -> bool,
        L: FnMut(&LootRecord) -> bool,
    {
        let before = self.kills.len() + self.loots.len();
        self.kills.retain(|k| keep_kill(k));
        self.loots.retain(|l| keep_loot(l));
        before - (self.kills.len() + self.loots.len())
    }

    /// Hard clear. Sequence numbers keep increasing so journal replay stays safe.
    pub fn clear(&mut self) -> usize {
        let removed = self.kills.len() + self.loots.len();
        self.kills.clear();
        self.loots.clear();
        removed
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
