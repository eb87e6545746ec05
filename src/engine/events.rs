use serde::Serialize;

use super::ledger::Timestamp;

/// Side-effect-free notifications emitted by the engine after a commit.
///
/// The engine only queues these; delivery (chat webhook, logs) happens on a
/// separate task and can never roll back ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    LootIngested {
        actor: String,
        target: String,
        amount: i64,
        scope: String,
        /// All-time gold in `default`, scope loot otherwise.
        running_total: i64,
        timestamp: Timestamp,
    },
    KillIngested {
        actor: String,
        target: String,
        scope: String,
        timestamp: Timestamp,
    },
    Adjusted {
        actor: String,
        delta: i64,
        scope: String,
        running_total: i64,
    },
    ScopeCreated {
        name: String,
    },
    ScopeFinished {
        name: String,
        archive_key: String,
        total_gold: i64,
    },
    ScopeReset {
        target: String,
        removed: usize,
    },
    PlayerReset {
        scope: String,
        player: String,
        removed: usize,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LootIngested { .. } => "loot_ingested",
            Self::KillIngested { .. } => "kill_ingested",
            Self::Adjusted { .. } => "adjusted",
            Self::ScopeCreated { .. } => "scope_created",
            Self::ScopeFinished { .. } => "scope_finished",
            Self::ScopeReset { .. } => "scope_reset",
            Self::PlayerReset { .. } => "player_reset",
        }
    }

    /// Events that prune or retire data; the runtime snapshots right after these.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::ScopeCreated { .. }
                | Self::ScopeFinished { .. }
                | Self::ScopeReset { .. }
                | Self::PlayerReset { .. }
        )
    }
}
