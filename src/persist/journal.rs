use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::engine::ledger::LedgerRecord;
use crate::error::PersistenceError;

/// Append-only JSONL of ledger records accepted since the last snapshot.
#[derive(Debug)]
pub struct Journal {
    file: File,
    path: PathBuf,
}

/// What a journal replay recovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalReplay {
    pub records: Vec<LedgerRecord>,
    /// Lines that failed to parse (typically a torn final write).
    pub skipped: usize,
}

impl Journal {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &LedgerRecord) -> Result<(), PersistenceError> {
        let line = serde_json::to_string(record)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        Ok(())
    }

    pub fn append_all(&mut self, records: &[LedgerRecord]) -> Result<(), PersistenceError> {
        for record in records {
            self.append(record)?;
        }
        Ok(())
    }

    /// Read every parseable record in file order.
    pub fn replay(path: &Path) -> Result<JournalReplay, PersistenceError> {
        if !path.exists() {
            return Ok(JournalReplay::default());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut out = JournalReplay::default();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerRecord>(&line) {
                Ok(record) => out.records.push(record),
                Err(_) => out.skipped += 1,
            }
        }
        Ok(out)
    }

    /// Rewrite the journal keeping only records with `seq >= keep_from`, i.e.
    /// those a snapshot taken at `keep_from` does not contain. Returns how many
    /// records were kept.
    pub fn compact(&mut self, keep_from: u64) -> Result<usize, PersistenceError> {
        let replay = Self::replay(&self.path)?;
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut kept = 0;
        {
            let mut out = File::create(&tmp)?;
            for record in replay.records.iter().filter(|r| r.seq() >= keep_from) {
                let line = serde_json::to_string(record)?;
                out.write_all(line.as_bytes())?;
                out.write_all(b"\n")?;
                kept += 1;
            }
            out.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(kept)
    }
}
