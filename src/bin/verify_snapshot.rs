//! Snapshot fold-equivalence check.
//!
//! Loads a persisted state file, rebuilds every bucket from the ledgers and
//! compares it with the stored one. Prints a JSON report; exits 1 on drift.
//!
//! Usage: verify_snapshot [path/to/state.json]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use serde_json::{json, Value};

use lootledger::engine::aggregate::Aggregator;
use lootledger::engine::ledger::Ledger;
use lootledger::engine::scope::DEFAULT_SCOPE;
use lootledger::engine::snapshot::PersistedState;
use lootledger::engine::verify::assert_sequence;

fn report(state: &PersistedState) -> (Value, bool) {
    let mut ledger = Ledger::from_parts(state.kill_ledger.clone(), state.loot_ledger.clone());
    ledger.resume_seq(state.next_seq);
    let live = state
        .scopes
        .keys()
        .map(String::as_str)
        .chain(std::iter::once(state.current_scope.as_str()))
        .filter(|s| !s.trim().is_empty());
    let rebuilt = Aggregator::rebuild(&ledger, live);

    let mut names: Vec<&String> = state.scopes.keys().chain(rebuilt.buckets().keys()).collect();
    names.sort();
    names.dedup();

    let mut drifted = false;
    let scopes: Vec<Value> = names
        .into_iter()
        .map(|name| {
            let stored = state.scopes.get(name);
            let fresh = rebuilt.bucket(name);
            let ok = stored == fresh;
            drifted |= !ok;
            json!({
                "scope": name,
                "ok": ok,
                "stored_total_gold": stored.map(|b| b.total_gold()),
                "rebuilt_total_gold": fresh.map(|b| b.total_gold()),
            })
        })
        .collect();

    let sequence = assert_sequence(&ledger).err().map(|v| v.to_string());
    drifted |= sequence.is_some();

    let current = if state.current_scope.trim().is_empty() {
        DEFAULT_SCOPE
    } else {
        state.current_scope.as_str()
    };
    let out = json!({
        "version": state.version,
        "current_scope": current,
        "kills": state.kill_ledger.len(),
        "loots": state.loot_ledger.len(),
        "digest": state.digest().ok(),
        "sequence_error": sequence,
        "scopes": scopes,
        "drift": drifted,
    });
    (out, drifted)
}

fn main() -> Result<ExitCode> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./data/state.json"));
    let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let state = PersistedState::from_json(&bytes)
        .with_context(|| format!("parsing {}", path.display()))?;

    let (out, drifted) = report(&state);
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(if drifted {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
