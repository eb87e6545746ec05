use std::path::PathBuf;

use crate::engine::state::EngineConfig;
use crate::engine::dedup::DEDUP_WINDOW_MS;
use crate::engine::query::DEFAULT_BOARD_SIZE;

/// Runtime configuration, every field read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    /// Secondary snapshot store; JSON file only when unset.
    pub sqlite_path: Option<String>,
    pub snapshot_secs: u64,
    pub dedup_window_ms: u64,
    pub dedup_sweep_secs: u64,
    pub board_size: usize,
    pub observer_log_cap: usize,
    pub notify_webhook_url: Option<String>,
    pub notify_queue_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            data_dir: PathBuf::from("./data"),
            sqlite_path: None,
            snapshot_secs: 300,
            dedup_window_ms: DEDUP_WINDOW_MS,
            dedup_sweep_secs: 60,
            board_size: DEFAULT_BOARD_SIZE,
            observer_log_cap: 1000,
            notify_webhook_url: None,
            notify_queue_cap: 256,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        let bind_addr = std::env::var("BIND_ADDR")
            .ok()
            .or_else(|| std::env::var("PORT").ok().map(|p| format!("0.0.0.0:{p}")))
            .unwrap_or(d.bind_addr);
        Self {
            bind_addr,
            data_dir: std::env::var("DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            sqlite_path: std::env::var("SQLITE_PATH").ok().filter(|v| !v.trim().is_empty()),
            snapshot_secs: std::env::var("SNAPSHOT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.snapshot_secs),
            dedup_window_ms: std::env::var("DEDUP_WINDOW_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.dedup_window_ms),
            dedup_sweep_secs: std::env::var("DEDUP_SWEEP_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.dedup_sweep_secs),
            board_size: std::env::var("BOARD_SIZE").ok().and_then(|v| v.parse().ok()).filter(|n| *n > 0).unwrap_or(d.board_size),
            observer_log_cap: std::env::var("OBSERVER_LOG_CAP").ok().and_then(|v| v.parse().ok()).unwrap_or(d.observer_log_cap),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL").ok().filter(|v| !v.trim().is_empty()),
            notify_queue_cap: std::env::var("NOTIFY_QUEUE_CAP").ok().and_then(|v| v.parse().ok()).filter(|n| *n > 0).unwrap_or(d.notify_queue_cap),
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            dedup_window_ms: self.dedup_window_ms,
            board_size: self.board_size,
            observer_log_cap: self.observer_log_cap,
            ..EngineConfig::default()
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("journal.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_carries_knobs() {
        let cfg = Config {
            board_size: 5,
            dedup_window_ms: 1_000,
            ..Config::default()
        };
        let engine = cfg.engine();
        assert_eq!(engine.board_size, 5);
        assert_eq!(engine.dedup_window_ms, 1_000);
    }

    #[test]
    fn paths_live_under_data_dir() {
        let cfg = Config {
            data_dir: PathBuf::from("/srv/loot"),
            ..Config::default()
        };
        assert_eq!(cfg.state_path(), PathBuf::from("/srv/loot/state.json"));
        assert_eq!(cfg.journal_path(), PathBuf::from("/srv/loot/journal.jsonl"));
    }
}
