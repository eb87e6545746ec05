//! Per-scope running totals derived from the ledger.
//!
//! Every live bucket is, at all times, exactly the fold of its ledger slice:
//!
//! | field             | folds                                                        |
//! |-------------------|--------------------------------------------------------------|
//! | `kill_count`      | KillRecords of the scope, by actor                           |
//! | `death_count`     | KillRecords of the scope, by target                          |
//! | `loot_total`      | LootRecords of the scope, by actor                           |
//! | `cumulative_gold` | named scope: same as `loot_total`; default: *every* LootRecord |
//!
//! `apply` is the incremental path, `fold_scope`/`rebuild` the replay path; the
//! two must agree (see `verify::check_fold_equivalence`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ledger::{KillRecord, Ledger, LedgerRecord, LootRecord};
use super::scope::DEFAULT_SCOPE;

/// Aggregate key for a player name: case-folded and trimmed.
pub fn norm(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateBucket {
    #[serde(default)]
    pub kill_count: BTreeMap<String, u64>,
    #[serde(default)]
    pub death_count: BTreeMap<String, u64>,
    #[serde(default)]
    pub loot_total: BTreeMap<String, i64>,
    #[serde(default)]
    pub cumulative_gold: BTreeMap<String, i64>,
}

impl AggregateBucket {
    fn add_kill(&mut self, record: &KillRecord) {
        *self.kill_count.entry(norm(&record.actor)).or_insert(0) += 1;
        *self.death_count.entry(norm(&record.target)).or_insert(0) += 1;
    }

    // Saturating: live ingestion is gated by `Aggregator::loot_fits`, so only
    // an imported ledger can reach the bound.
    fn add_loot(&mut self, record: &LootRecord) {
        let key = norm(&record.actor);
        let loot = self.loot_total.entry(key.clone()).or_insert(0);
        *loot = loot.saturating_add(record.amount);
        let gold = self.cumulative_gold.entry(key).or_insert(0);
        *gold = gold.saturating_add(record.amount);
    }

    fn add_cumulative(&mut self, record: &LootRecord) {
        let gold = self.cumulative_gold.entry(norm(&record.actor)).or_insert(0);
        *gold = gold.saturating_add(record.amount);
    }

    fn player_fits(&self, player: &str, amount: i64) -> bool {
        self.loot(player).checked_add(amount).is_some()
            && self.gold(player).checked_add(amount).is_some()
    }

    pub fn kills(&self, player: &str) -> u64 {
        self.kill_count.get(&norm(player)).copied().unwrap_or(0)
    }

    pub fn deaths(&self, player: &str) -> u64 {
        self.death_count.get(&norm(player)).copied().unwrap_or(0)
    }

    pub fn loot(&self, player: &str) -> i64 {
        self.loot_total.get(&norm(player)).copied().unwrap_or(0)
    }

    pub fn gold(&self, player: &str) -> i64 {
        self.cumulative_gold.get(&norm(player)).copied().unwrap_or(0)
    }

    /// Sum of cumulative gold over every player in the bucket, clamped to `i64`.
    pub fn total_gold(&self) -> i64 {
        let sum: i128 = self.cumulative_gold.values().map(|v| i128::from(*v)).sum();
        i64::try_from(sum).unwrap_or(if sum < 0 { i64::MIN } else { i64::MAX })
    }

    pub fn is_empty(&self) -> bool {
        self.kill_count.is_empty()
            && self.death_count.is_empty()
            && self.loot_total.is_empty()
            && self.cumulative_gold.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregator {
    buckets: BTreeMap<String, AggregateBucket>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        let mut buckets = BTreeMap::new();
        buckets.insert(DEFAULT_SCOPE.to_string(), AggregateBucket::default());
        Self { buckets }
    }

    pub fn bucket(&self, scope: &str) -> Option<&AggregateBucket> {
        self.buckets.get(scope)
    }

    pub fn buckets(&self) -> &BTreeMap<String, AggregateBucket> {
        &self.buckets
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    /// Incremental update. Not idempotent: duplicate suppression happens upstream.
    pub fn apply(&mut self, record: &LedgerRecord) {
        match record {
            LedgerRecord::Kill(k) => self.apply_kill(k),
            LedgerRecord::Loot(l) => self.apply_loot(l),
        }
    }

    pub fn apply_kill(&mut self, record: &KillRecord) {
        self.buckets
            .entry(record.event_scope.clone())
            .or_default()
            .add_kill(record);
    }

    pub fn apply_loot(&mut self, record: &LootRecord) {
        self.buckets
            .entry(record.event_scope.clone())
            .or_default()
            .add_loot(record);
        if record.event_scope != DEFAULT_SCOPE {
            self.buckets
                .entry(DEFAULT_SCOPE.to_string())
                .or_default()
                .add_cumulative(record);
        }
    }

    /// Whether a LootRecord of `amount` for `actor` in `scope` keeps every
    /// per-player total it touches within `i64`.
    pub fn loot_fits(&self, scope: &str, actor: &str, amount: i64) -> bool {
        let fits = |name: &str| {
            self.buckets
                .get(name)
                .map(|b| b.player_fits(actor, amount))
                .unwrap_or(true)
        };
        fits(scope) && (scope == DEFAULT_SCOPE || fits(DEFAULT_SCOPE))
    }

    /// Install a bucket for `scope`, replacing whatever was there.
    pub fn install(&mut self, scope: &str, bucket: AggregateBucket) {
        self.buckets.insert(scope.to_string(), bucket);
    }

    /// Detach a retired scope's bucket. The default bucket cannot be removed.
    pub fn remove_scope(&mut self, scope: &str) -> Option<AggregateBucket> {
        if scope == DEFAULT_SCOPE {
            return None;
        }
        self.buckets.remove(scope)
    }

    /// Scopes whose buckets differ between `self` and `other`.
    pub fn drift(&self, other: &Aggregator) -> Vec<String> {
        let mut scopes: Vec<&String> = self.buckets.keys().chain(other.buckets.keys()).collect();
        scopes.sort();
        scopes.dedup();
        scopes
            .into_iter()
            .filter(|s| self.buckets.get(*s) != other.buckets.get(*s))
            .cloned()
            .collect()
    }

    /// Fold the ledger slice belonging to `scope`.
    pub fn fold_scope(ledger: &Ledger, scope: &str) -> AggregateBucket {
        let mut bucket = AggregateBucket::default();
        for kill in ledger.kills().iter().filter(|k| k.event_scope == scope) {
            bucket.add_kill(kill);
        }
        for loot in ledger.loots() {
            if loot.event_scope == scope {
                bucket.add_loot(loot);
            } else if scope == DEFAULT_SCOPE {
                bucket.add_cumulative(loot);
            }
        }
        bucket
    }

    /// Recompute every live bucket from scratch.
    pub fn rebuild<'a>(ledger: &Ledger, live_scopes: impl IntoIterator<Item = &'a str>) -> Self {
        let mut agg = Self::new();
        agg.install(DEFAULT_SCOPE, Self::fold_scope(ledger, DEFAULT_SCOPE));
        for scope in live_scopes {
            if scope != DEFAULT_SCOPE {
                agg.install(scope, Self::fold_scope(ledger, scope));
            }
        }
        agg
    }
}
