//! Event-ledger engine with deterministic replay semantics.
//!
//! Architecture:
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  raw text /  │────►│    parser    │────►│    dedup     │
//! │  {k, v} json │     │ (LootEvent)  │     │ (10 s window)│
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                                                  │
//!                                                  ▼
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ query::top_n │◄────│    ledger    │────►│  aggregate   │
//! │ (boards)     │     │ (append-only)│     │ (per scope)  │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! [`state::Engine`] owns every stage and is driven synchronously; the
//! runtime supplies `now` and drains the engine's outboxes.
//!
//! ## Scope semantics
//!
//! `default` is inclusive: its boards see every ledger record and its bucket
//! carries all-time gold. Named scopes see only records tagged with them.

pub mod aggregate;
pub mod dedup;
pub mod events;
pub mod ledger;
pub mod parser;
pub mod query;
pub mod scope;
pub mod snapshot;
pub mod state;
pub mod verify;

pub use state::{
    DeclineReason, Engine, EngineConfig, FinishedScope, IngestOutcome, ResetTarget,
    RestoreReport, ScopeSummary,
};
pub use events::DomainEvent;
pub use ledger::{KillRecord, LedgerRecord, LootRecord, Timestamp};
pub use query::{BoardKind, BoardQuery, BoardResult, Period, RankedEntry};
pub use snapshot::{ObserverEntry, PersistedState};
