use rusqlite::{params, Connection, OptionalExtension};

use super::SnapshotStore;
use crate::engine::snapshot::PersistedState;
use crate::error::PersistenceError;

/// Snapshots kept per table; older rows are pruned on save.
const KEEP_SNAPSHOTS: i64 = 20;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, PersistenceError> {
        let mut store = Self {
            conn: Connection::open(path)?,
        };
        store.init()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, PersistenceError> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init()?;
        Ok(store)
    }

    fn init(&mut self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                saved_at INTEGER NOT NULL,
                digest TEXT NOT NULL,
                records INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<i64, PersistenceError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?)
    }
}

impl SnapshotStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn save(&mut self, state: &PersistedState) -> Result<String, PersistenceError> {
        let body = serde_json::to_string(state)?;
        let digest = state.digest()?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO snapshots (saved_at, digest, records, body) VALUES (?1, ?2, ?3, ?4)",
            params![
                state.saved_at as i64,
                digest,
                state.record_count() as i64,
                body
            ],
        )?;
        tx.execute(
            "DELETE FROM snapshots WHERE id NOT IN
                (SELECT id FROM snapshots ORDER BY id DESC LIMIT ?1)",
            params![KEEP_SNAPSHOTS],
        )?;
        tx.commit()?;
        Ok(digest)
    }

    fn load(&mut self) -> Result<Option<PersistedState>, PersistenceError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT digest, body FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((digest, body)) = row else {
            return Ok(None);
        };
        let state = PersistedState::from_json(body.as_bytes())?;
        let actual = state.digest()?;
        if actual != digest {
            return Err(PersistenceError::Corrupt(format!(
                "digest {actual} does not match stored {digest}"
            )));
        }
        Ok(Some(state))
    }
}
