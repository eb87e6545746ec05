use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::state::FinishedScope;
use crate::error::PersistenceError;

/// Writes finished-scope buckets to `<root>/<archive_key>`.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    root: PathBuf,
}

impl ArchiveWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn write(&self, finished: &FinishedScope) -> Result<PathBuf, PersistenceError> {
        let path = self.root.join(&finished.archive_key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_vec_pretty(finished)?)?;
        Ok(path)
    }

    /// Archive files, oldest name first.
    pub fn list(&self) -> Result<Vec<PathBuf>, PersistenceError> {
        let dir = self.root.join("events");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        files.sort();
        Ok(files)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::Engine;

    #[test]
    fn writes_under_events_dir() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArchiveWriter::new(dir.path());
        let mut engine = Engine::default();
        engine.create_scope("week1").unwrap();
        engine.ingest_text("a has defeated b and received (900 coins)", 1_704_067_200_000);
        let finished = engine.finish_scope(1_704_067_200_000).unwrap();

        let path = writer.write(&finished).unwrap();
        assert!(path.starts_with(dir.path().join("events")));
        let body: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(body["name"], "week1");
        assert_eq!(body["bucket"]["loot_total"]["a"], 900);
        assert_eq!(writer.list().unwrap(), vec![path]);
    }
}
