//! The ledger engine: one synchronous struct owning parser, dedup, ledger,
//! aggregates and scope pointer.
//!
//! Each mutating call validates first and then performs the append/apply pair,
//! which cannot fail halfway. Side effects leave through two outboxes:
//! [`Engine::drain_events`] (notifications) and [`Engine::take_appended`]
//! (records to journal). The engine never logs or touches I/O.

use std::collections::VecDeque;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::aggregate::{AggregateBucket, Aggregator};
use super::dedup::{self, DedupGuard, DEDUP_WINDOW_MS};
use super::events::DomainEvent;
use super::ledger::{Ledger, LedgerRecord, Timestamp};
use super::parser::{self, LootEvent};
use super::query::{top_n, BoardKind, BoardQuery, BoardResult, Period, DEFAULT_BOARD_SIZE};
use super::scope::{ScopeError, ScopeManager, ALL_SCOPES, DEFAULT_SCOPE};
use super::snapshot::{ObserverEntry, PersistedState, SNAPSHOT_VERSION};
use super::verify::{self, InvariantViolation};
use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dedup_window_ms: u64,
    pub board_size: usize,
    pub observer_log_cap: usize,
    /// Accepted keys between automatic dedup sweeps.
    pub sweep_every: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: DEDUP_WINDOW_MS,
            board_size: DEFAULT_BOARD_SIZE,
            observer_log_cap: 1000,
            sweep_every: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclineReason {
    Invalid,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DeclineReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<LootEvent>,
}

impl IngestOutcome {
    fn accepted(event: Option<LootEvent>) -> Self {
        Self {
            accepted: true,
            reason: None,
            event,
        }
    }

    fn declined(reason: DeclineReason, event: Option<LootEvent>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
            event,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        self.reason == Some(DeclineReason::Duplicate)
    }

    pub fn is_invalid(&self) -> bool {
        self.reason == Some(DeclineReason::Invalid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetTarget {
    All,
    Scope(String),
}

impl ResetTarget {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case(ALL_SCOPES) {
            ResetTarget::All
        } else {
            ResetTarget::Scope(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResetTarget::All => ALL_SCOPES,
            ResetTarget::Scope(name) => name,
        }
    }
}

/// A retired scope: its final bucket and where the archive copy belongs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinishedScope {
    pub name: String,
    pub finished_at: Timestamp,
    pub archive_key: String,
    pub bucket: AggregateBucket,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeSummary {
    pub name: String,
    pub current: bool,
    pub total_gold: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub kills: usize,
    pub loots: usize,
    pub scopes: usize,
    /// Scopes whose stored bucket disagreed with the ledger fold.
    pub drifted: Vec<String>,
}

/// Archive location for a finished scope, e.g.
/// `events/event_week1_2024-01-01T00-00-00-000Z.json`.
pub fn archive_key(name: &str, finished_at: Timestamp) -> String {
    let stamp = i64::try_from(finished_at)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| finished_at.to_string())
        .replace([':', '.'], "-");
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("events/event_{safe}_{stamp}.json")
}

#[derive(Debug)]
pub struct Engine {
    cfg: EngineConfig,
    dedup: DedupGuard,
    ledger: Ledger,
    aggregates: Aggregator,
    scopes: ScopeManager,
    observer_log: VecDeque<ObserverEntry>,
    outbox: Vec<DomainEvent>,
    appended: Vec<LedgerRecord>,
    accepted_since_sweep: u64,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            dedup: DedupGuard::new(cfg.dedup_window_ms),
            cfg,
            ledger: Ledger::new(),
            aggregates: Aggregator::new(),
            scopes: ScopeManager::new(),
            observer_log: VecDeque::new(),
            outbox: Vec::new(),
            appended: Vec::new(),
            accepted_since_sweep: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn aggregates(&self) -> &Aggregator {
        &self.aggregates
    }

    pub fn current_scope(&self) -> &str {
        self.scopes.current()
    }

    pub fn observer_log(&self) -> impl Iterator<Item = &ObserverEntry> {
        self.observer_log.iter()
    }

    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }

    // ---- ingestion ----

    pub fn ingest_text(&mut self, raw: &str, now: Timestamp) -> IngestOutcome {
        self.ingest_observed(raw, None, now)
    }

    /// Text ingestion with the reporting client's name, kept in the observer log.
    pub fn ingest_observed(
        &mut self,
        raw: &str,
        observer: Option<&str>,
        now: Timestamp,
    ) -> IngestOutcome {
        let event = match parser::parse(raw) {
            Ok(event) => event,
            Err(_) => return IngestOutcome::declined(DeclineReason::Invalid, None),
        };
        let Ok(amount) = i64::try_from(event.amount) else {
            return IngestOutcome::declined(DeclineReason::Invalid, None);
        };
        let scope = self.scopes.current().to_string();
        if !self.aggregates.loot_fits(&scope, &event.actor, amount) {
            return IngestOutcome::declined(DeclineReason::Invalid, Some(event));
        }

        let key = raw.trim();
        if !self.dedup.should_process(key, now) {
            return IngestOutcome::declined(DeclineReason::Duplicate, Some(event));
        }

        let loot = self
            .ledger
            .record_loot(&event.actor, amount, now, &scope, false);
        let kill = self
            .ledger
            .record_kill(&event.actor, &event.target, now, &scope);
        self.aggregates.apply_loot(&loot);
        self.aggregates.apply_kill(&kill);
        self.appended.push(LedgerRecord::Loot(loot));
        self.appended.push(LedgerRecord::Kill(kill));

        if let Some(observer) = observer.map(str::trim).filter(|o| !o.is_empty()) {
            self.observe(observer, key, now);
        }

        let running_total = self.running_total(&event.actor, &scope);
        self.outbox.push(DomainEvent::LootIngested {
            actor: event.actor.clone(),
            target: event.target.clone(),
            amount,
            running_total,
            scope,
            timestamp: now,
        });
        self.after_accept(now);
        IngestOutcome::accepted(Some(event))
    }

    /// Structured kill without loot (`/logKill`).
    pub fn ingest_kill(&mut self, actor: &str, target: &str, now: Timestamp) -> IngestOutcome {
        let Ok((actor, target)) = parser::validate_kill(actor, target) else {
            return IngestOutcome::declined(DeclineReason::Invalid, None);
        };
        if !self.dedup.should_process(&dedup::kill_key(&actor, &target), now) {
            return IngestOutcome::declined(DeclineReason::Duplicate, None);
        }

        let scope = self.scopes.current().to_string();
        let kill = self.ledger.record_kill(&actor, &target, now, &scope);
        self.aggregates.apply_kill(&kill);
        self.appended.push(LedgerRecord::Kill(kill));
        self.outbox.push(DomainEvent::KillIngested {
            actor,
            target,
            scope,
            timestamp: now,
        });
        self.after_accept(now);
        IngestOutcome::accepted(None)
    }

    /// Manual correction, recorded as its own LootRecord. Returns the new running total.
    pub fn adjust(
        &mut self,
        actor: &str,
        delta: i64,
        scope: Option<&str>,
        now: Timestamp,
    ) -> Result<i64, EngineError> {
        let actor = actor.trim();
        if actor.is_empty() {
            return Err(EngineError::Validation("player name must not be empty".into()));
        }
        if delta == 0 {
            return Err(EngineError::Validation("adjustment must be non-zero".into()));
        }
        let scope = self.scopes.resolve(scope).to_string();
        if !self.scopes.is_live(&scope) {
            return Err(ScopeError::Unknown(scope).into());
        }
        if !self.aggregates.loot_fits(&scope, actor, delta) {
            return Err(EngineError::Validation(format!(
                "adjustment of {delta} would overflow {actor}'s total in {scope}"
            )));
        }

        let loot = self.ledger.record_loot(actor, delta, now, &scope, true);
        self.aggregates.apply_loot(&loot);
        self.appended.push(LedgerRecord::Loot(loot));
        let running_total = self.running_total(actor, &scope);
        self.outbox.push(DomainEvent::Adjusted {
            actor: actor.to_string(),
            delta,
            scope,
            running_total,
        });
        Ok(running_total)
    }

    // ---- scopes ----

    pub fn create_scope(&mut self, name: &str) -> Result<String, ScopeError> {
        let name = self.scopes.create(name)?;
        // a re-created name picks up whatever ledger slice survived
        let bucket = Aggregator::fold_scope(&self.ledger, &name);
        self.aggregates.install(&name, bucket);
        self.outbox
            .push(DomainEvent::ScopeCreated { name: name.clone() });
        Ok(name)
    }

    /// Retire the current scope. Its ledger entries stay.
    pub fn finish_scope(&mut self, now: Timestamp) -> Result<FinishedScope, ScopeError> {
        let name = self.scopes.finish()?;
        let bucket = self.aggregates.remove_scope(&name).unwrap_or_default();
        let finished = FinishedScope {
            archive_key: archive_key(&name, now),
            name,
            finished_at: now,
            bucket,
        };
        self.outbox.push(DomainEvent::ScopeFinished {
            name: finished.name.clone(),
            archive_key: finished.archive_key.clone(),
            total_gold: finished.bucket.total_gold(),
        });
        Ok(finished)
    }

    pub fn list_scopes(&self) -> Vec<ScopeSummary> {
        self.scopes
            .live()
            .map(|name| ScopeSummary {
                name: name.to_string(),
                current: name == self.scopes.current(),
                total_gold: self.aggregates.bucket(name).map(|b| b.total_gold()).unwrap_or(0),
            })
            .collect()
    }

    // ---- resets ----

    /// Drop ledger records by scope (or everything) and rebuild aggregates.
    /// Scopes stay live. Returns the number of records removed.
    pub fn reset_scope(&mut self, target: &ResetTarget) -> Result<usize, ScopeError> {
        let removed = match target {
            ResetTarget::All => self.ledger.clear(),
            ResetTarget::Scope(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ScopeError::Invalid(name.to_string()));
                }
                let removed = self
                    .ledger
                    .retain(|k| k.event_scope != name, |l| l.event_scope != name);
                if removed == 0 && !self.scopes.is_live(name) {
                    return Err(ScopeError::Unknown(name.to_string()));
                }
                removed
            }
        };
        self.rebuild_aggregates();
        self.outbox.push(DomainEvent::ScopeReset {
            target: target.as_str().to_string(),
            removed,
        });
        Ok(removed)
    }

    /// Remove every record the player authored within `scope`. Deaths suffered
    /// as a victim are left alone.
    pub fn reset_player(&mut self, scope: Option<&str>, player: &str) -> Result<usize, EngineError> {
        let key = super::aggregate::norm(player);
        if key.is_empty() {
            return Err(EngineError::Validation("player name must not be empty".into()));
        }
        let scope = self.scopes.resolve(scope).to_string();
        if !self.scopes.is_live(&scope) {
            return Err(ScopeError::Unknown(scope).into());
        }

        let owned_by = |record_scope: &str, actor: &str| {
            record_scope == scope && super::aggregate::norm(actor) == key
        };
        let removed = self.ledger.retain(
            |k| !owned_by(&k.event_scope, &k.actor),
            |l| !owned_by(&l.event_scope, &l.actor),
        );
        self.rebuild_aggregates();
        self.outbox.push(DomainEvent::PlayerReset {
            scope,
            player: player.trim().to_string(),
            removed,
        });
        Ok(removed)
    }

    /// Remove every record the player authored in any scope, finished ones
    /// included. Deaths suffered as a victim are left alone.
    pub fn reset_player_everywhere(&mut self, player: &str) -> Result<usize, EngineError> {
        let key = super::aggregate::norm(player);
        if key.is_empty() {
            return Err(EngineError::Validation("player name must not be empty".into()));
        }
        let removed = self.ledger.retain(
            |k| super::aggregate::norm(&k.actor) != key,
            |l| super::aggregate::norm(&l.actor) != key,
        );
        self.rebuild_aggregates();
        self.outbox.push(DomainEvent::PlayerReset {
            scope: ALL_SCOPES.to_string(),
            player: player.trim().to_string(),
            removed,
        });
        Ok(removed)
    }

    // ---- queries ----

    /// Board with the configured size; `scope` defaults to the current scope.
    pub fn query(
        &self,
        kind: BoardKind,
        scope: Option<&str>,
        period: Period,
        name_filter: Option<&str>,
        now: Timestamp,
    ) -> BoardResult {
        let q = BoardQuery::new(kind, self.scopes.resolve(scope))
            .period(period)
            .name(name_filter)
            .limit(self.cfg.board_size);
        top_n(&self.ledger, &q, now)
    }

    pub fn board(&self, query: &BoardQuery<'_>, now: Timestamp) -> BoardResult {
        top_n(&self.ledger, query, now)
    }

    /// Sum of cumulative gold in the scope's bucket; 0 for unknown scopes.
    pub fn total_gold(&self, scope: Option<&str>) -> i64 {
        self.aggregates
            .bucket(self.scopes.resolve(scope))
            .map(AggregateBucket::total_gold)
            .unwrap_or(0)
    }

    // ---- outboxes / maintenance ----

    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_appended(&mut self) -> Vec<LedgerRecord> {
        std::mem::take(&mut self.appended)
    }

    pub fn sweep_dedup(&mut self, now: Timestamp) -> usize {
        self.accepted_since_sweep = 0;
        self.dedup.sweep(now)
    }

    pub fn verify(&self) -> Result<(), InvariantViolation> {
        verify::assert_sequence(&self.ledger)?;
        verify::check_fold_equivalence(&self.ledger, &self.aggregates, &self.scopes)
    }

    // ---- persistence ----

    pub fn snapshot(&self, now: Timestamp) -> PersistedState {
        PersistedState {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            current_scope: self.scopes.current().to_string(),
            scopes: self.aggregates.buckets().clone(),
            kill_ledger: self.ledger.kills().to_vec(),
            loot_ledger: self.ledger.loots().to_vec(),
            observer_log: self.observer_log.iter().cloned().collect(),
            next_seq: self.ledger.next_seq(),
        }
    }

    /// Replace all state with `state`. Aggregates are always rebuilt from the
    /// ledgers; stored buckets only serve to report drift. Dedup memory and
    /// both outboxes start empty.
    pub fn restore(&mut self, state: PersistedState) -> Result<RestoreReport, EngineError> {
        if state.version > SNAPSHOT_VERSION {
            return Err(EngineError::Validation(format!(
                "unsupported snapshot version {}",
                state.version
            )));
        }

        let scopes = ScopeManager::from_parts(&state.current_scope, state.scopes.keys().cloned());
        let mut ledger = Ledger::from_parts(state.kill_ledger, state.loot_ledger);
        ledger.resume_seq(state.next_seq);
        let rebuilt = Aggregator::rebuild(&ledger, scopes.live());

        let mut stored = Aggregator::new();
        for (name, bucket) in state.scopes {
            stored.install(&name, bucket);
        }
        let drifted = stored.drift(&rebuilt);

        let report = RestoreReport {
            kills: ledger.kills().len(),
            loots: ledger.loots().len(),
            scopes: rebuilt.buckets().len(),
            drifted,
        };

        let cap = self.cfg.observer_log_cap;
        let skip = state.observer_log.len().saturating_sub(cap);
        self.observer_log = state.observer_log.into_iter().skip(skip).collect();
        self.scopes = scopes;
        self.ledger = ledger;
        self.aggregates = rebuilt;
        self.dedup = DedupGuard::new(self.cfg.dedup_window_ms);
        self.outbox.clear();
        self.appended.clear();
        self.accepted_since_sweep = 0;
        Ok(report)
    }

    /// Re-apply journaled records newer than the ledger. Returns how many applied.
    pub fn replay<I: IntoIterator<Item = LedgerRecord>>(&mut self, records: I) -> usize {
        let mut applied = 0;
        for record in records {
            if record.seq() < self.ledger.next_seq() {
                continue;
            }
            self.ledger.append(record);
            applied += 1;
        }
        if applied > 0 {
            self.rebuild_aggregates();
        }
        applied
    }

    // ---- internals ----

    fn running_total(&self, actor: &str, scope: &str) -> i64 {
        self.aggregates
            .bucket(scope)
            .map(|b| b.gold(actor))
            .unwrap_or(0)
    }

    fn observe(&mut self, observer: &str, message: &str, now: Timestamp) {
        self.observer_log.push_back(ObserverEntry {
            observer: observer.to_string(),
            message: message.to_string(),
            timestamp: now,
        });
        while self.observer_log.len() > self.cfg.observer_log_cap {
            self.observer_log.pop_front();
        }
    }

    fn after_accept(&mut self, now: Timestamp) {
        self.accepted_since_sweep += 1;
        if self.cfg.sweep_every > 0 && self.accepted_since_sweep >= self.cfg.sweep_every {
            self.sweep_dedup(now);
        }
    }

    fn rebuild_aggregates(&mut self) {
        self.aggregates = Aggregator::rebuild(&self.ledger, self.scopes.live());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ledger::RecordKind;

    const HOUR: u64 = 60 * 60 * 1000;
    const T0: u64 = 1_700_000_000_000;

    fn line(actor: &str, target: &str, amount: &str) -> String {
        format!("{actor} has defeated {target} and received ({amount} coins).")
    }

    #[test]
    fn ingest_parses_and_counts_one_kill() {
        let mut engine = Engine::default();
        let out = engine.ingest_text(
            "Zezima has defeated Woox and received (1,250,000 coins).",
            T0,
        );
        assert!(out.accepted);
        assert_eq!(
            out.event,
            Some(LootEvent {
                actor: "Zezima".into(),
                target: "Woox".into(),
                amount: 1_250_000
            })
        );
        let bucket = engine.aggregates().bucket(DEFAULT_SCOPE).unwrap();
        assert_eq!(bucket.kills("zezima"), 1);
        assert_eq!(bucket.deaths("woox"), 1);
        assert_eq!(bucket.loot("zezima"), 1_250_000);
        assert_eq!(engine.total_gold(None), 1_250_000);
        engine.verify().unwrap();
    }

    #[test]
    fn unparseable_line_changes_nothing() {
        let mut engine = Engine::default();
        let out = engine.ingest_text("Zezima killed Woox", T0);
        assert!(out.is_invalid());
        assert!(engine.ledger().is_empty());
        assert!(engine.drain_events().is_empty());
        assert_eq!(engine.dedup_len(), 0);
    }

    #[test]
    fn duplicate_within_window_is_noop() {
        let mut engine = Engine::default();
        let raw = line("a", "b", "100");
        assert!(engine.ingest_text(&raw, T0).accepted);
        let second = engine.ingest_text(&raw, T0 + 9_999);
        assert!(second.is_duplicate());
        assert_eq!(engine.ledger().len(RecordKind::Loot), 1);
        assert_eq!(engine.ledger().len(RecordKind::Kill), 1);
        // sliding window measured from the last acceptance
        assert!(engine.ingest_text(&raw, T0 + 10_000).accepted);
        assert_eq!(engine.ledger().len(RecordKind::Loot), 2);
    }

    #[test]
    fn structured_kill_dedups_on_normalized_names() {
        let mut engine = Engine::default();
        assert!(engine.ingest_kill("Zezima", "Woox", T0).accepted);
        assert!(engine.ingest_kill(" zezima", "WOOX ", T0 + 1).is_duplicate());
        assert!(engine.ingest_kill("", "Woox", T0).is_invalid());
        assert_eq!(engine.ledger().len(RecordKind::Kill), 1);
        assert_eq!(engine.ledger().len(RecordKind::Loot), 0);
    }

    #[test]
    fn ranking_is_deterministic_on_ties() {
        let mut engine = Engine::default();
        engine.ingest_text(&line("a", "x", "500"), T0);
        engine.ingest_text(&line("b", "x", "500"), T0 + 1);
        engine.ingest_text(&line("c", "x", "100"), T0 + 2);
        let board = engine.query(BoardKind::Loot, None, Period::All, None, T0 + 3);
        let names: Vec<&str> = board.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn scope_isolation() {
        let mut engine = Engine::default();
        engine.create_scope("event1").unwrap();
        engine.ingest_kill("Zezima", "Woox", T0);

        let default = engine.query(BoardKind::Kills, Some(DEFAULT_SCOPE), Period::All, None, T0);
        assert_eq!(default.entries()[0].name, "Zezima");

        engine.create_scope("event2").unwrap();
        let other = engine.query(BoardKind::Kills, Some("event2"), Period::All, None, T0);
        assert!(other.is_no_data());
        engine.verify().unwrap();
    }

    #[test]
    fn manual_adjustment_is_its_own_record() {
        let mut engine = Engine::default();
        engine.ingest_text(&line("Bob", "x", "100,000"), T0);
        let total = engine.adjust("Bob", -50_000, Some(DEFAULT_SCOPE), T0 + 1).unwrap();
        assert_eq!(total, 50_000);
        assert_eq!(engine.total_gold(Some(DEFAULT_SCOPE)), 50_000);
        let loots = engine.ledger().loots();
        assert_eq!(loots.len(), 2);
        assert!(loots[1].manual);
        assert_eq!(loots[1].amount, -50_000);
        engine.verify().unwrap();
    }

    #[test]
    fn adjust_validation() {
        let mut engine = Engine::default();
        assert!(matches!(
            engine.adjust(" ", 5, None, T0),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            engine.adjust("a", 0, None, T0),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            engine.adjust("a", 5, Some("nope"), T0),
            Err(EngineError::Scope(ScopeError::Unknown(_)))
        ));
        assert!(engine.ledger().is_empty());
    }

    #[test]
    fn period_boundary() {
        let mut engine = Engine::default();
        let now = T0 + 48 * HOUR;
        engine.ingest_kill("old", "x", now - 24 * HOUR - 1);
        engine.ingest_kill("fresh", "x", now - 24 * HOUR + 60_000);
        let board = engine.query(BoardKind::Kills, None, Period::Daily, None, now);
        let names: Vec<&str> = board.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["fresh"]);
    }

    #[test]
    fn finish_archives_and_keeps_ledger() {
        let mut engine = Engine::default();
        engine.create_scope("week1").unwrap();
        engine.ingest_text(&line("a", "b", "700"), T0);
        let finished = engine.finish_scope(T0).unwrap();
        assert_eq!(finished.name, "week1");
        assert_eq!(finished.bucket.loot("a"), 700);
        assert!(finished.archive_key.starts_with("events/event_week1_"));
        assert!(!finished.archive_key.contains(':'));
        assert_eq!(engine.current_scope(), DEFAULT_SCOPE);
        assert!(engine.aggregates().bucket("week1").is_none());

        // still visible through the inclusive default scope
        assert_eq!(engine.total_gold(None), 700);
        assert_eq!(engine.ledger().len(RecordKind::Loot), 1);
        assert_eq!(engine.finish_scope(T0), Err(ScopeError::NoActiveScope));
        engine.verify().unwrap();
    }

    #[test]
    fn recreated_scope_rebuilds_from_ledger() {
        let mut engine = Engine::default();
        engine.create_scope("week1").unwrap();
        engine.ingest_text(&line("a", "b", "700"), T0);
        engine.finish_scope(T0).unwrap();
        engine.create_scope("week1").unwrap();
        assert_eq!(engine.aggregates().bucket("week1").unwrap().loot("a"), 700);
        engine.verify().unwrap();
    }

    #[test]
    fn named_scope_running_total_is_scope_local() {
        let mut engine = Engine::default();
        engine.ingest_text(&line("a", "b", "100"), T0);
        engine.create_scope("event1").unwrap();
        engine.drain_events();
        engine.ingest_text(&line("a", "c", "50"), T0 + 1);
        match engine.drain_events().as_slice() {
            [DomainEvent::LootIngested { running_total, scope, .. }] => {
                assert_eq!(*running_total, 50);
                assert_eq!(scope, "event1");
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert_eq!(engine.total_gold(Some(DEFAULT_SCOPE)), 150);
    }

    #[test]
    fn reset_scope_prunes_only_that_scope() {
        let mut engine = Engine::default();
        engine.ingest_text(&line("a", "b", "100"), T0);
        engine.create_scope("event1").unwrap();
        engine.ingest_text(&line("a", "c", "50"), T0 + 1);

        let removed = engine
            .reset_scope(&ResetTarget::Scope("event1".into()))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(engine.total_gold(Some(DEFAULT_SCOPE)), 100);
        assert!(engine.aggregates().bucket("event1").unwrap().is_empty());
        assert!(matches!(
            engine.reset_scope(&ResetTarget::Scope("ghost".into())),
            Err(ScopeError::Unknown(_))
        ));
        engine.verify().unwrap();

        assert_eq!(engine.reset_scope(&ResetTarget::parse("ALL")).unwrap(), 2);
        assert!(engine.ledger().is_empty());
        engine.verify().unwrap();
    }

    #[test]
    fn reset_player_keeps_their_deaths() {
        let mut engine = Engine::default();
        engine.ingest_text(&line("Zezima", "Woox", "100"), T0);
        engine.ingest_text(&line("Woox", "Zezima", "40"), T0 + 1);
        let removed = engine.reset_player(None, "ZEZIMA").unwrap();
        assert_eq!(removed, 2);
        let bucket = engine.aggregates().bucket(DEFAULT_SCOPE).unwrap();
        assert_eq!(bucket.kills("zezima"), 0);
        assert_eq!(bucket.deaths("zezima"), 1);
        assert_eq!(bucket.gold("woox"), 40);
        engine.verify().unwrap();
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut engine = Engine::default();
        engine.create_scope("event1").unwrap();
        engine.ingest_observed(&line("a", "b", "100"), Some("Observer"), T0);
        engine.ingest_kill("c", "d", T0 + 1);
        let state = engine.snapshot(T0 + 2);

        let mut restored = Engine::default();
        let report = restored.restore(state.clone()).unwrap();
        assert!(report.drifted.is_empty());
        assert_eq!(report.kills, 2);
        assert_eq!(restored.current_scope(), "event1");
        assert_eq!(restored.snapshot(T0 + 2), state);
        assert_eq!(restored.observer_log().count(), 1);
        restored.verify().unwrap();
    }

    #[test]
    fn restore_repairs_drifted_buckets() {
        let mut engine = Engine::default();
        engine.ingest_text(&line("a", "b", "100"), T0);
        let mut state = engine.snapshot(T0);
        state
            .scopes
            .get_mut(DEFAULT_SCOPE)
            .unwrap()
            .loot_total
            .insert("a".into(), 999);

        let mut restored = Engine::default();
        let report = restored.restore(state).unwrap();
        assert_eq!(report.drifted, vec![DEFAULT_SCOPE.to_string()]);
        assert_eq!(restored.aggregates().bucket(DEFAULT_SCOPE).unwrap().loot("a"), 100);
    }

    #[test]
    fn replay_skips_records_already_in_snapshot() {
        let mut engine = Engine::default();
        engine.ingest_text(&line("a", "b", "100"), T0);
        let state = engine.snapshot(T0);
        let mut journal = engine.take_appended();
        engine.ingest_kill("c", "d", T0 + 1);
        journal.extend(engine.take_appended());

        let mut restored = Engine::default();
        restored.restore(state).unwrap();
        assert_eq!(restored.replay(journal), 1);
        assert_eq!(restored.ledger().len(RecordKind::Kill), 2);
        restored.verify().unwrap();
    }

    #[test]
    fn overflowing_loot_is_declined_before_any_append() {
        let mut engine = Engine::default();
        let max = i64::MAX.to_string();
        assert!(engine.ingest_text(&line("a", "b", &max), T0).accepted);
        let second = engine.ingest_text(&line("a", "c", &max), T0 + 1);
        assert!(second.is_invalid());
        let tiny = engine.ingest_text(&line("A", "d", "1"), T0 + 2);
        assert!(tiny.is_invalid());

        assert_eq!(engine.ledger().loots().len(), 1);
        assert_eq!(engine.ledger().kills().len(), 1);
        engine.verify().unwrap();

        // another player still has headroom
        assert!(engine.ingest_text(&line("z", "b", "1"), T0 + 3).accepted);
    }

    #[test]
    fn overflowing_adjustment_is_a_validation_error() {
        let mut engine = Engine::default();
        engine.adjust("a", i64::MAX, None, T0).unwrap();
        assert!(matches!(
            engine.adjust("a", 1, None, T0 + 1),
            Err(EngineError::Validation(_))
        ));
        assert_eq!(engine.ledger().loots().len(), 1);
        assert_eq!(engine.adjust("a", -1, None, T0 + 2).unwrap(), i64::MAX - 1);
        engine.verify().unwrap();
    }

    #[test]
    fn player_reset_everywhere_reaches_finished_scopes() {
        let mut engine = Engine::default();
        engine.create_scope("week1").unwrap();
        engine.ingest_text(&line("Zezima", "Woox", "1,000"), T0);
        engine.finish_scope(T0 + 1).unwrap();
        engine.ingest_kill("zezima", "b", T0 + 2);
        engine.ingest_kill("Woox", "Zezima", T0 + 3);

        assert_eq!(engine.reset_player_everywhere(" ZEZIMA ").unwrap(), 3);
        assert_eq!(engine.total_gold(None), 0);
        assert!(engine
            .query(BoardKind::Kills, None, Period::All, Some("zezima"), T0 + 4)
            .is_no_data());
        // deaths as a victim survive
        assert_eq!(engine.ledger().kills().len(), 1);
        engine.verify().unwrap();
    }

    #[test]
    fn observer_log_is_bounded() {
        let mut engine = Engine::new(EngineConfig {
            observer_log_cap: 2,
            ..EngineConfig::default()
        });
        for i in 0..3 {
            engine.ingest_observed(&line("a", "b", &(i + 1).to_string()), Some("obs"), T0 + i);
        }
        let kept: Vec<u64> = engine.observer_log().map(|e| e.timestamp).collect();
        assert_eq!(kept, [T0 + 1, T0 + 2]);
    }

    #[test]
    fn automatic_sweep_bounds_dedup_memory() {
        let mut engine = Engine::new(EngineConfig {
            sweep_every: 2,
            ..EngineConfig::default()
        });
        engine.ingest_kill("a", "b", T0);
        engine.ingest_kill("c", "d", T0 + 20_000);
        assert_eq!(engine.dedup_len(), 1);
    }

    #[test]
    fn archive_key_format() {
        assert_eq!(
            archive_key("week 1", 1_704_067_200_000),
            "events/event_week_1_2024-01-01T00-00-00-000Z.json"
        );
    }
}
