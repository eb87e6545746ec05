//! Kill and loot ledger for clan chat: parses loot lines, dedups them, keeps
//! an append-only ledger with per-scope aggregates and serves leaderboards.

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod logging;
pub mod notify;
pub mod persist;
pub mod render;
pub mod service;
