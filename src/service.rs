//! Process runtime around the engine: one mutex, the journal, the snapshot
//! stores and the notifier channel.
//!
//! Lock order is always engine -> journal -> stores. Ingestion journals its
//! records before releasing the engine. Snapshots copy the state under the
//! engine lock and write it with no lock held, then compact the journal down to
//! the records past the snapshot's `next_seq`. Only one snapshot runs at a
//! time, and async callers run it on the blocking pool.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::config::Config;
use crate::engine::parser::parse_gp_amount;
use crate::engine::query::{BoardKind, BoardQuery, BoardResult, Period};
use crate::engine::scope::ScopeError;
use crate::engine::state::{Engine, FinishedScope, IngestOutcome, ResetTarget, ScopeSummary};
use crate::engine::DomainEvent;
use crate::error::{EngineError, PersistenceError};
use crate::logging::{
    log, log_ingest, log_rejected, log_scope_change, obj, tick_aggregator, ts_epoch_ms, v_str,
    Domain, Level,
};
use crate::persist::{ArchiveWriter, Journal, SnapshotSet};
use crate::render;

/// Largest board a caller may request.
pub const MAX_BOARD_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub current_scope: String,
    pub kills: usize,
    pub loots: usize,
    pub scopes: usize,
    pub dedup_entries: usize,
    pub observer_entries: usize,
}

/// Which raw ledger to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerExport {
    Kills,
    Loot,
}

pub struct Runtime {
    engine: Mutex<Engine>,
    journal: Mutex<Journal>,
    stores: Mutex<SnapshotSet>,
    snapshot_gate: Mutex<()>,
    archive: ArchiveWriter,
    events_tx: mpsc::Sender<DomainEvent>,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn join_failed(err: tokio::task::JoinError) -> PersistenceError {
    PersistenceError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
}

impl Runtime {
    pub fn new(
        engine: Engine,
        journal: Journal,
        stores: SnapshotSet,
        archive: ArchiveWriter,
        events_tx: mpsc::Sender<DomainEvent>,
    ) -> Self {
        Self {
            engine: Mutex::new(engine),
            journal: Mutex::new(journal),
            stores: Mutex::new(stores),
            snapshot_gate: Mutex::new(()),
            archive,
            events_tx,
        }
    }

    /// Restore the newest snapshot (empty state on failure), replay the
    /// journal on top, and open everything for appending.
    pub fn bootstrap(
        cfg: &Config,
    ) -> Result<(Arc<Self>, mpsc::Receiver<DomainEvent>), PersistenceError> {
        let mut stores = SnapshotSet::open(&cfg.data_dir, cfg.sqlite_path.as_deref())?;
        let mut engine = Engine::new(cfg.engine());

        match stores.load_latest() {
            Ok(Some(state)) => match engine.restore(state) {
                Ok(report) => {
                    let level = if report.drifted.is_empty() {
                        Level::Info
                    } else {
                        Level::Warn
                    };
                    log(
                        level,
                        Domain::Persist,
                        "restored",
                        obj(&[
                            ("kills", json!(report.kills)),
                            ("loots", json!(report.loots)),
                            ("scopes", json!(report.scopes)),
                            ("drifted", json!(report.drifted)),
                            ("scope", v_str(engine.current_scope())),
                        ]),
                    );
                }
                Err(err) => log(
                    Level::Error,
                    Domain::Persist,
                    "restore_rejected",
                    obj(&[("error", v_str(&err.to_string()))]),
                ),
            },
            Ok(None) => log(Level::Info, Domain::Persist, "no_snapshot", obj(&[])),
            Err(err) => log(
                Level::Error,
                Domain::Persist,
                "restore_failed",
                obj(&[("error", v_str(&err.to_string()))]),
            ),
        }

        let journal_path = cfg.journal_path();
        let replay = Journal::replay(&journal_path)?;
        let replayed = engine.replay(replay.records);
        if replayed > 0 || replay.skipped > 0 {
            log(
                Level::Info,
                Domain::Persist,
                "journal_replayed",
                obj(&[
                    ("applied", json!(replayed)),
                    ("skipped", json!(replay.skipped)),
                ]),
            );
        }
        if let Err(violation) = engine.verify() {
            log(
                Level::Error,
                Domain::System,
                "invariant_violation",
                obj(&[("error", v_str(&violation.to_string()))]),
            );
        }

        let journal = Journal::open(journal_path)?;
        let (tx, rx) = mpsc::channel(cfg.notify_queue_cap);
        let runtime = Arc::new(Self::new(
            engine,
            journal,
            stores,
            ArchiveWriter::new(&cfg.data_dir),
            tx,
        ));
        if replayed > 0 {
            // fold the replayed tail into a fresh snapshot right away
            let _ = runtime.snapshot_now();
        }
        Ok((runtime, rx))
    }

    fn engine(&self) -> MutexGuard<'_, Engine> {
        relock(&self.engine)
    }

    /// Journal whatever the engine appended while the caller holds its lock.
    fn journal_appended(&self, engine: &mut Engine) {
        let appended = engine.take_appended();
        if appended.is_empty() {
            return;
        }
        if let Err(err) = relock(&self.journal).append_all(&appended) {
            log(
                Level::Error,
                Domain::Persist,
                "journal_append_failed",
                obj(&[
                    ("error", v_str(&err.to_string())),
                    ("records", json!(appended.len())),
                ]),
            );
        }
    }

    /// Run `op` under the engine lock, journal its records, then publish its
    /// events. Also reports whether any event pruned or retired data.
    fn apply<T>(&self, op: impl FnOnce(&mut Engine) -> T) -> (T, bool) {
        let (out, events) = {
            let mut engine = self.engine();
            let out = op(&mut engine);
            self.journal_appended(&mut engine);
            (out, engine.drain_events())
        };
        let structural = events.iter().any(DomainEvent::is_structural);
        self.publish(events);
        (out, structural)
    }

    fn commit<T>(&self, op: impl FnOnce(&mut Engine) -> T) -> T {
        self.apply(op).0
    }

    /// [`Runtime::commit`] followed by a snapshot when the engine reported a
    /// structural change. A failed snapshot is logged and left to the next
    /// periodic one.
    async fn commit_structural<T>(
        self: &Arc<Self>,
        after: &str,
        op: impl FnOnce(&mut Engine) -> T,
    ) -> T {
        let (out, structural) = self.apply(op);
        if structural {
            if let Err(err) = self.snapshot().await {
                log(
                    Level::Error,
                    Domain::Persist,
                    "structural_snapshot_failed",
                    obj(&[("after", v_str(after)), ("error", v_str(&err.to_string()))]),
                );
            }
        }
        out
    }

    fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            match &event {
                DomainEvent::LootIngested {
                    actor,
                    target,
                    amount,
                    scope,
                    ..
                } => log_ingest("text", actor, target, *amount, scope),
                DomainEvent::KillIngested {
                    actor,
                    target,
                    scope,
                    ..
                } => log_ingest("kill", actor, target, 0, scope),
                DomainEvent::Adjusted {
                    actor,
                    delta,
                    scope,
                    running_total,
                } => log(
                    Level::Info,
                    Domain::Ledger,
                    "adjusted",
                    obj(&[
                        ("actor", v_str(actor)),
                        ("delta", json!(delta)),
                        ("scope", v_str(scope)),
                        ("running_total", json!(running_total)),
                    ]),
                ),
                DomainEvent::ScopeCreated { name } => log_scope_change("created", name, &[]),
                DomainEvent::ScopeFinished {
                    name,
                    archive_key,
                    total_gold,
                } => log_scope_change(
                    "finished",
                    name,
                    &[
                        ("archive_key", v_str(archive_key)),
                        ("total_gold", json!(total_gold)),
                    ],
                ),
                DomainEvent::ScopeReset { target, removed } => {
                    log_scope_change("reset", target, &[("removed", json!(removed))])
                }
                DomainEvent::PlayerReset {
                    scope,
                    player,
                    removed,
                } => log_scope_change(
                    "player_reset",
                    scope,
                    &[("player", v_str(player)), ("removed", json!(removed))],
                ),
            }
            if let Err(err) = self.events_tx.try_send(event) {
                log(
                    Level::Warn,
                    Domain::Notify,
                    "notification_dropped",
                    obj(&[("error", v_str(&err.to_string()))]),
                );
            }
        }
    }

    // ---- ingestion ----

    pub fn ingest_text(&self, raw: &str, observer: Option<&str>, source: &str) -> IngestOutcome {
        let now = ts_epoch_ms();
        let outcome = self.commit(|engine| engine.ingest_observed(raw, observer, now));
        if outcome.is_invalid() {
            log_rejected(source, "invalid", raw);
        } else if outcome.is_duplicate() {
            log_rejected(source, "duplicate", raw);
        }
        outcome
    }

    pub fn ingest_kill(&self, killer: &str, victim: &str) -> IngestOutcome {
        let now = ts_epoch_ms();
        let outcome = self.commit(|engine| engine.ingest_kill(killer, victim, now));
        if outcome.is_invalid() {
            log_rejected("kill", "invalid", &format!("{killer}|{victim}"));
        } else if outcome.is_duplicate() {
            log_rejected("kill", "duplicate", &format!("{killer}|{victim}"));
        }
        outcome
    }

    /// Manual correction; `amount` accepts `-50k`, `1.5m`, `2,000`.
    pub fn adjust(
        &self,
        player: &str,
        amount: &str,
        scope: Option<&str>,
    ) -> Result<i64, EngineError> {
        let delta = parse_gp_amount(amount)?;
        let now = ts_epoch_ms();
        self.commit(|engine| engine.adjust(player, delta, scope, now))
    }

    // ---- scopes ----

    pub async fn create_scope(self: &Arc<Self>, name: &str) -> Result<String, ScopeError> {
        self.commit_structural("create_scope", |engine| engine.create_scope(name))
            .await
    }

    /// Finish the current scope and write its archive file.
    pub async fn finish_scope(
        self: &Arc<Self>,
    ) -> Result<(FinishedScope, Option<PathBuf>), ScopeError> {
        let now = ts_epoch_ms();
        let finished = self
            .commit_structural("finish_scope", |engine| engine.finish_scope(now))
            .await?;

        let rt = Arc::clone(self);
        let archived = finished.clone();
        let written = tokio::task::spawn_blocking(move || rt.archive.write(&archived))
            .await
            .map_err(join_failed)
            .and_then(|res| res);
        let path = match written {
            Ok(path) => Some(path),
            Err(err) => {
                log(
                    Level::Error,
                    Domain::Persist,
                    "archive_failed",
                    obj(&[
                        ("scope", v_str(&finished.name)),
                        ("error", v_str(&err.to_string())),
                    ]),
                );
                None
            }
        };
        Ok((finished, path))
    }

    pub fn list_scopes(&self) -> Vec<ScopeSummary> {
        self.engine().list_scopes()
    }

    pub fn current_scope(&self) -> String {
        self.engine().current_scope().to_string()
    }

    /// `target` is a scope name or `all`. With a player, only that player's
    /// records go (in every scope, finished ones included, when `all`).
    pub async fn reset(
        self: &Arc<Self>,
        target: &str,
        player: Option<&str>,
    ) -> Result<usize, EngineError> {
        let target = ResetTarget::parse(target);
        match (player.map(str::trim).filter(|p| !p.is_empty()), target) {
            (None, target) => Ok(self
                .commit_structural("reset", |engine| engine.reset_scope(&target))
                .await?),
            (Some(player), ResetTarget::Scope(scope)) => {
                self.commit_structural("reset", |engine| engine.reset_player(Some(&scope), player))
                    .await
            }
            (Some(player), ResetTarget::All) => {
                self.commit_structural("reset", |engine| engine.reset_player_everywhere(player))
                    .await
            }
        }
    }

    // ---- queries ----

    pub fn board(
        &self,
        kind: BoardKind,
        scope: Option<&str>,
        period: Period,
        name: Option<&str>,
        limit: Option<usize>,
    ) -> BoardResult {
        let now = ts_epoch_ms();
        let engine = self.engine();
        let limit = limit
            .unwrap_or(engine.config().board_size)
            .clamp(1, MAX_BOARD_LIMIT);
        let current = engine.current_scope().to_string();
        let scope = scope
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&current);
        let query = BoardQuery::new(kind, scope)
            .period(period)
            .name(name)
            .limit(limit);
        engine.board(&query, now)
    }

    /// Resolved scope name and its total gold.
    pub fn total_gold(&self, scope: Option<&str>) -> (String, i64) {
        let engine = self.engine();
        let resolved = scope
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(engine.current_scope())
            .to_string();
        let total = engine.total_gold(Some(&resolved));
        (resolved, total)
    }

    pub fn export_ledger(&self, which: LedgerExport) -> String {
        let engine = self.engine();
        match which {
            LedgerExport::Kills => render::kills_csv(engine.ledger().kills()),
            LedgerExport::Loot => render::loot_csv(engine.ledger().loots()),
        }
    }

    pub fn health(&self) -> Health {
        let engine = self.engine();
        Health {
            current_scope: engine.current_scope().to_string(),
            kills: engine.ledger().kills().len(),
            loots: engine.ledger().loots().len(),
            scopes: engine.aggregates().buckets().len(),
            dedup_entries: engine.dedup_len(),
            observer_entries: engine.observer_log().count(),
        }
    }

    // ---- maintenance ----

    /// Snapshot to every store, then compact the journal. Returns the digest.
    /// Blocks on file and SQLite I/O; async code goes through [`Runtime::snapshot`].
    pub fn snapshot_now(&self) -> Result<String, PersistenceError> {
        let _gate = relock(&self.snapshot_gate);
        let state = self.engine().snapshot(ts_epoch_ms());

        let digest = relock(&self.stores).save_all(&state)?;
        let kept = relock(&self.journal).compact(state.next_seq)?;
        if kept > 0 {
            log(
                Level::Debug,
                Domain::Persist,
                "journal_compacted",
                obj(&[("kept", json!(kept)), ("next_seq", json!(state.next_seq))]),
            );
        }
        Ok(digest)
    }

    /// [`Runtime::snapshot_now`] on the blocking pool.
    pub async fn snapshot(self: &Arc<Self>) -> Result<String, PersistenceError> {
        let rt = Arc::clone(self);
        tokio::task::spawn_blocking(move || rt.snapshot_now())
            .await
            .map_err(join_failed)?
    }

    pub fn sweep_dedup(&self) -> usize {
        let now = ts_epoch_ms();
        let removed = self.engine().sweep_dedup(now);
        if removed > 0 {
            log(
                Level::Debug,
                Domain::Ingest,
                "dedup_swept",
                obj(&[("removed", json!(removed))]),
            );
        }
        removed
    }

    /// Periodic snapshot and dedup sweep tasks.
    pub fn spawn_maintenance(self: &Arc<Self>, cfg: &Config) -> Vec<JoinHandle<()>> {
        let snap_rt = Arc::clone(self);
        let snap_every = Duration::from_secs(cfg.snapshot_secs.max(1));
        let snapshots = tokio::spawn(async move {
            let mut ticker = interval(snap_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                // failures are logged by the stores and retried next tick
                let _ = snap_rt.snapshot().await;
            }
        });

        let sweep_rt = Arc::clone(self);
        let sweep_every = Duration::from_secs(cfg.dedup_sweep_secs.max(1));
        let sweeps = tokio::spawn(async move {
            let mut ticker = interval(sweep_every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                sweep_rt.sweep_dedup();
                tick_aggregator();
            }
        });

        vec![snapshots, sweeps]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::snapshot::PersistedState;
    use crate::persist::SnapshotStore;
    use std::sync::mpsc as std_mpsc;

    fn runtime(dir: &std::path::Path) -> (Arc<Runtime>, mpsc::Receiver<DomainEvent>) {
        let cfg = Config {
            data_dir: dir.to_path_buf(),
            ..Config::default()
        };
        Runtime::bootstrap(&cfg).unwrap()
    }

    /// Store whose `save` parks until the test releases it.
    struct GatedStore {
        entered: std_mpsc::Sender<()>,
        release: std_mpsc::Receiver<()>,
    }

    impl SnapshotStore for GatedStore {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn save(&mut self, state: &PersistedState) -> Result<String, PersistenceError> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            state.digest().map_err(PersistenceError::from)
        }

        fn load(&mut self) -> Result<Option<PersistedState>, PersistenceError> {
            Ok(None)
        }
    }

    #[test]
    fn ingestion_is_journaled_and_published() {
        let dir = tempfile::tempdir().unwrap();
        let (rt, mut rx) = runtime(dir.path());
        let out = rt.ingest_text(
            "Zezima has defeated Woox and received (1,000 coins)",
            Some("Observer"),
            "dink",
        );
        assert!(out.accepted);
        assert!(matches!(rx.try_recv(), Ok(DomainEvent::LootIngested { .. })));

        let replay = Journal::replay(&dir.path().join("journal.jsonl")).unwrap();
        assert_eq!(replay.records.len(), 2);
    }

    #[test]
    fn snapshot_compacts_journal_and_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (rt, _rx) = runtime(dir.path());
            rt.ingest_kill("a", "b");
            rt.snapshot_now().unwrap();
            assert!(Journal::replay(&dir.path().join("journal.jsonl"))
                .unwrap()
                .records
                .is_empty());
            // accepted after the snapshot: only in the journal
            rt.ingest_kill("c", "d");
        }
        let (rt, _rx) = runtime(dir.path());
        assert_eq!(rt.health().kills, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ingestion_proceeds_while_a_snapshot_is_saving() {
        let dir = tempfile::tempdir().unwrap();
        let journal_path = dir.path().join("journal.jsonl");
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let stores = SnapshotSet::new(vec![Box::new(GatedStore {
            entered: entered_tx,
            release: release_rx,
        })]);
        let (tx, _rx) = mpsc::channel(16);
        let rt = Arc::new(Runtime::new(
            Engine::default(),
            Journal::open(&journal_path).unwrap(),
            stores,
            ArchiveWriter::new(dir.path()),
            tx,
        ));

        let snapshot = tokio::spawn({
            let rt = Arc::clone(&rt);
            async move { rt.snapshot().await }
        });
        tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();

        let ingest_rt = Arc::clone(&rt);
        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            tokio::task::spawn_blocking(move || ingest_rt.ingest_kill("a", "b")),
        )
        .await
        .expect("ingest waited on the snapshot")
        .unwrap();
        assert!(outcome.accepted);
        assert_eq!(rt.health().kills, 1);

        release_tx.send(()).unwrap();
        snapshot.await.unwrap().unwrap();
        // the kill landed after the state was copied, so compaction keeps it
        assert_eq!(Journal::replay(&journal_path).unwrap().records.len(), 1);
    }

    #[tokio::test]
    async fn finish_writes_archive_and_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let (rt, _rx) = runtime(dir.path());
        rt.create_scope("week1").await.unwrap();
        rt.ingest_text("a has defeated b and received (10 coins)", None, "http");
        let (finished, path) = rt.finish_scope().await.unwrap();
        assert_eq!(finished.name, "week1");
        assert!(path.unwrap().exists());
        assert!(dir.path().join("state.json").exists());
        assert_eq!(rt.current_scope(), "default");
    }

    #[test]
    fn adjust_parses_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let (rt, _rx) = runtime(dir.path());
        assert_eq!(rt.adjust("Bob", "1.5k", None).unwrap(), 1_500);
        assert_eq!(rt.adjust("Bob", "-500", None).unwrap(), 1_000);
        assert!(matches!(rt.adjust("Bob", "lots", None), Err(EngineError::Parse(_))));
        assert_eq!(rt.total_gold(None), ("default".to_string(), 1_000));
    }

    #[test]
    fn adjust_overflow_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (rt, _rx) = runtime(dir.path());
        rt.adjust("Bob", "9223372036854775807", None).unwrap();
        assert!(matches!(
            rt.adjust("Bob", "1", None),
            Err(EngineError::Validation(_))
        ));
        assert_eq!(rt.health().loots, 1);
    }

    #[tokio::test]
    async fn player_reset_across_all_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let (rt, _rx) = runtime(dir.path());
        rt.ingest_kill("a", "b");
        rt.create_scope("event1").await.unwrap();
        rt.ingest_kill("a", "c");
        rt.ingest_text("a has defeated e and received (10 coins)", None, "http");
        rt.finish_scope().await.unwrap();
        rt.create_scope("event2").await.unwrap();
        rt.ingest_kill("a", "d");

        assert_eq!(rt.reset("all", Some("A")).await.unwrap(), 5);
        assert_eq!(rt.health().kills, 0);
        assert_eq!(rt.health().loots, 0);
        assert_eq!(rt.total_gold(Some("default")), ("default".to_string(), 0));
    }

    #[test]
    fn board_limit_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let (rt, _rx) = runtime(dir.path());
        for i in 0..3 {
            rt.ingest_kill(&format!("p{i}"), "x");
        }
        let board = rt.board(BoardKind::Kills, None, Period::All, None, Some(0));
        assert_eq!(board.entries().len(), 1);
        let board = rt.board(BoardKind::Kills, None, Period::All, None, None);
        assert_eq!(board.entries().len(), 3);
    }
}
