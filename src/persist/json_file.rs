use std::fs;
use std::path::{Path, PathBuf};

use super::SnapshotStore;
use crate::engine::snapshot::PersistedState;
use crate::error::PersistenceError;

/// `state.json`, replaced atomically via a sibling temp file and rename.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for JsonFileStore {
    fn name(&self) -> &'static str {
        "json_file"
    }

    fn save(&mut self, state: &PersistedState) -> Result<String, PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let bytes = state.to_json_pretty()?;
        let tmp = self.temp_path();
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(state.digest()?)
    }

    fn load(&mut self) -> Result<Option<PersistedState>, PersistenceError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)?;
        Ok(Some(PersistedState::from_json(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::Engine;

    #[test]
    fn round_trips_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("nested").join("state.json"));
        assert!(store.load().unwrap().is_none());

        let mut engine = Engine::default();
        engine.create_scope("event1").unwrap();
        engine.ingest_text("a has defeated b and received (5 coins)", 1);
        let state = engine.snapshot(2);

        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn unreadable_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{ truncated").unwrap();
        let mut store = JsonFileStore::new(path);
        assert!(matches!(store.load(), Err(PersistenceError::Serde(_))));
    }
}
