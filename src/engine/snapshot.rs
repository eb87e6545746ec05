//! Serializable engine state, consumed by the persistence gateway.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::aggregate::{AggregateBucket, Aggregator};
use super::ledger::{KillRecord, Ledger, LootRecord, Timestamp};
use super::scope::DEFAULT_SCOPE;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Who reported an accepted webhook line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverEntry {
    pub observer: String,
    pub message: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    #[serde(default)]
    pub saved_at: Timestamp,
    pub current_scope: String,
    #[serde(default)]
    pub scopes: BTreeMap<String, AggregateBucket>,
    #[serde(default)]
    pub kill_ledger: Vec<KillRecord>,
    #[serde(default)]
    pub loot_ledger: Vec<LootRecord>,
    #[serde(default)]
    pub observer_log: Vec<ObserverEntry>,
    #[serde(default)]
    pub next_seq: u64,
}

impl PersistedState {
    pub fn to_json_pretty(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Accepts the current format and the flat `state.json` layout older
    /// deployments wrote (`currentEvent`/`events`/`killLog`/`lootLog`).
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        match serde_json::from_slice::<PersistedState>(bytes) {
            Ok(state) => Ok(state),
            Err(err) => match serde_json::from_slice::<LegacyState>(bytes) {
                Ok(legacy) if legacy.looks_populated() => Ok(legacy.into_persisted()),
                _ => Err(err),
            },
        }
    }

    /// Hex SHA-256 over the compact JSON encoding.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    pub fn record_count(&self) -> usize {
        self.kill_ledger.len() + self.loot_ledger.len()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyState {
    #[serde(default)]
    current_event: Option<String>,
    #[serde(default)]
    events: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    kill_log: Vec<LegacyKill>,
    #[serde(default)]
    loot_log: Vec<LegacyLoot>,
}

#[derive(Debug, Deserialize)]
struct LegacyKill {
    killer: String,
    victim: String,
    timestamp: u64,
    #[serde(default)]
    event: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyLoot {
    killer: String,
    gp: f64,
    timestamp: u64,
    #[serde(default)]
    event: Option<String>,
}

impl LegacyState {
    fn looks_populated(&self) -> bool {
        self.current_event.is_some()
            || !self.events.is_empty()
            || !self.kill_log.is_empty()
            || !self.loot_log.is_empty()
    }

    fn into_persisted(self) -> PersistedState {
        let scope_of =
            |event: Option<String>| event.unwrap_or_else(|| DEFAULT_SCOPE.to_string());
        let mut ledger = Ledger::new();
        for k in self.kill_log {
            ledger.record_kill(&k.killer, &k.victim, k.timestamp, &scope_of(k.event));
        }
        for l in self.loot_log {
            let amount = if l.gp.is_finite() { l.gp.round() as i64 } else { 0 };
            ledger.record_loot(&l.killer, amount, l.timestamp, &scope_of(l.event), false);
        }

        let current = self
            .current_event
            .unwrap_or_else(|| DEFAULT_SCOPE.to_string());
        let mut live: Vec<&str> = self.events.keys().map(String::as_str).collect();
        live.push(&current);
        let aggregates = Aggregator::rebuild(&ledger, live);

        PersistedState {
            version: SNAPSHOT_VERSION,
            saved_at: 0,
            current_scope: current.clone(),
            scopes: aggregates.buckets().clone(),
            kill_ledger: ledger.kills().to_vec(),
            loot_ledger: ledger.loots().to_vec(),
            observer_log: Vec::new(),
            next_seq: ledger.next_seq(),
        }
    }
}
