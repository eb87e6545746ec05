//! Persistence gateway: snapshot stores, finished-scope archives and the
//! ingestion journal. Everything here is synchronous file/SQLite I/O; the
//! runtime decides when to call it.

pub mod archive;
pub mod journal;
pub mod json_file;
pub mod sqlite;

use std::path::Path;

use crate::engine::snapshot::PersistedState;
use crate::error::PersistenceError;
use crate::logging::{log, log_snapshot, obj, v_str, Domain, Level, ProfileScope};

pub use archive::ArchiveWriter;
pub use journal::Journal;
pub use json_file::JsonFileStore;
pub use sqlite::SqliteStore;

pub trait SnapshotStore: Send {
    fn name(&self) -> &'static str;

    /// Persist `state`; returns its digest.
    fn save(&mut self, state: &PersistedState) -> Result<String, PersistenceError>;

    /// Most recent snapshot, or `None` when the store is empty.
    fn load(&mut self) -> Result<Option<PersistedState>, PersistenceError>;
}

/// The configured snapshot stores, written together and read newest-first.
pub struct SnapshotSet {
    stores: Vec<Box<dyn SnapshotStore>>,
}

impl SnapshotSet {
    pub fn new(stores: Vec<Box<dyn SnapshotStore>>) -> Self {
        Self { stores }
    }

    /// JSON file under `data_dir`, plus SQLite when a path is given.
    pub fn open(data_dir: &Path, sqlite_path: Option<&str>) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(data_dir)?;
        let mut stores: Vec<Box<dyn SnapshotStore>> =
            vec![Box::new(JsonFileStore::new(data_dir.join("state.json")))];
        if let Some(path) = sqlite_path {
            stores.push(Box::new(SqliteStore::open(path)?));
        }
        Ok(Self::new(stores))
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Write to every store. All stores are attempted; the first failure is
    /// returned after the rest have run.
    pub fn save_all(&mut self, state: &PersistedState) -> Result<String, PersistenceError> {
        let mut digest = None;
        let mut first_err = None;
        for store in self.stores.iter_mut() {
            let timer = ProfileScope::new("snapshot_save");
            match store.save(state) {
                Ok(d) => {
                    log_snapshot(store.name(), &d, state.record_count(), timer.elapsed_ms());
                    digest.get_or_insert(d);
                }
                Err(err) => {
                    log(
                        Level::Error,
                        Domain::Persist,
                        "snapshot_failed",
                        obj(&[("store", v_str(store.name())), ("error", v_str(&err.to_string()))]),
                    );
                    first_err.get_or_insert(err);
                }
            }
        }
        match (first_err, digest) {
            (Some(err), _) => Err(err),
            (None, Some(d)) => Ok(d),
            (None, None) => state.digest().map_err(PersistenceError::from),
        }
    }

    /// Newest snapshot across stores by `saved_at`. A failing store is logged
    /// and skipped; the error surfaces only when no store yields a snapshot.
    pub fn load_latest(&mut self) -> Result<Option<PersistedState>, PersistenceError> {
        let mut best: Option<PersistedState> = None;
        let mut first_err = None;
        for store in self.stores.iter_mut() {
            match store.load() {
                Ok(Some(state)) => {
                    if best.as_ref().map(|b| state.saved_at > b.saved_at).unwrap_or(true) {
                        best = Some(state);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    log(
                        Level::Warn,
                        Domain::Persist,
                        "snapshot_load_failed",
                        obj(&[("store", v_str(store.name())), ("error", v_str(&err.to_string()))]),
                    );
                    first_err.get_or_insert(err);
                }
            }
        }
        match (best, first_err) {
            (Some(state), _) => Ok(Some(state)),
            (None, Some(err)) => Err(err),
            (None, None) => Ok(None),
        }
    }
}
