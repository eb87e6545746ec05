//! Human-readable text for chat notifications and CSV exports.

use crate::engine::events::DomainEvent;
use crate::engine::ledger::{KillRecord, LootRecord};
use crate::engine::query::{BoardKind, BoardResult};
use crate::engine::scope::DEFAULT_SCOPE;

/// `1250000` -> `1,250,000`.
pub fn format_coins(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// K/M/B with at most two decimals, trailing zeros trimmed: `1.25M`, `3K`, `950`.
pub fn abbreviate_gp(n: i64) -> String {
    let abs = n.unsigned_abs() as f64;
    let sign = if n < 0 { "-" } else { "" };
    let (scaled, suffix) = if abs >= 1e9 {
        (abs / 1e9, "B")
    } else if abs >= 1e6 {
        (abs / 1e6, "M")
    } else if abs >= 1e3 {
        (abs / 1e3, "K")
    } else {
        return n.to_string();
    };
    let fixed = format!("{scaled:.2}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    format!("{sign}{trimmed}{suffix}")
}

fn coins_with_abbrev(n: i64) -> String {
    format!("{} coins ({})", format_coins(n), abbreviate_gp(n))
}

fn total_label(scope: &str) -> &'static str {
    if scope == DEFAULT_SCOPE {
        "Total GP Earned"
    } else {
        "Event GP Gained"
    }
}

/// Chat text for a domain event.
pub fn render_event(event: &DomainEvent) -> String {
    match event {
        DomainEvent::LootIngested {
            actor,
            target,
            amount,
            scope,
            running_total,
            ..
        } => format!(
            "Loot Detected: **{actor}** defeated **{target}** and received **{}**\n{}: {}",
            coins_with_abbrev(*amount),
            total_label(scope),
            coins_with_abbrev(*running_total)
        ),
        DomainEvent::KillIngested { actor, target, .. } => {
            format!("Kill Logged: **{actor}** defeated **{target}**")
        }
        DomainEvent::Adjusted {
            actor,
            delta,
            scope,
            running_total,
        } => format!(
            "Adjustment: **{actor}** {} in `{scope}`\n{}: {}",
            coins_with_abbrev(*delta),
            total_label(scope),
            coins_with_abbrev(*running_total)
        ),
        DomainEvent::ScopeCreated { name } => {
            format!("Event Created: **{name}** is now current.")
        }
        DomainEvent::ScopeFinished {
            name,
            archive_key,
            total_gold,
        } => format!(
            "Event Finished: **{name}** earned {}. Saved to `{archive_key}`, back to **{DEFAULT_SCOPE}**.",
            coins_with_abbrev(*total_gold)
        ),
        DomainEvent::ScopeReset { target, removed } => {
            format!("Reset `{target}`: {removed} ledger entries removed.")
        }
        DomainEvent::PlayerReset {
            scope,
            player,
            removed,
        } => format!("Reset **{player}** in `{scope}`: {removed} ledger entries removed."),
    }
}

fn board_title(kind: BoardKind) -> &'static str {
    match kind {
        BoardKind::Kills => "Hiscores",
        BoardKind::Loot => "Lootboard",
        BoardKind::Deaths => "Deathboard",
    }
}

fn no_data_line(kind: BoardKind) -> &'static str {
    match kind {
        BoardKind::Kills => "No kills in that period.",
        BoardKind::Loot => "No loot in that period.",
        BoardKind::Deaths => "No deaths in that period.",
    }
}

/// Multi-line board text.
pub fn render_board(board: &BoardResult) -> String {
    let kind = board.kind();
    let mut out = format!("{} ({})", board_title(kind), board.period().as_str());
    if board.is_no_data() {
        out.push('\n');
        out.push_str(no_data_line(kind));
        return out;
    }
    for entry in board.entries() {
        let value = match kind {
            BoardKind::Kills => format!("Kills: {}", entry.value),
            BoardKind::Deaths => format!("Deaths: {}", entry.value),
            BoardKind::Loot => coins_with_abbrev(entry.value),
        };
        out.push_str(&format!("\n{}. {} - {}", entry.rank, entry.name, value));
    }
    out
}

pub fn render_total_gold(scope: &str, total: i64) -> String {
    format!(
        "Total GP across all players ({scope}): **{}**",
        coins_with_abbrev(total)
    )
}

// ---- CSV ----

fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Every field quoted with `"` doubled; rows joined by `\n`.
pub fn to_csv(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(headers.join(","));
    for row in rows {
        lines.push(row.iter().map(|v| csv_field(v)).collect::<Vec<_>>().join(","));
    }
    lines.join("\n")
}

pub fn board_csv(board: &BoardResult) -> String {
    let rows: Vec<Vec<String>> = board
        .entries()
        .iter()
        .map(|e| vec![e.rank.to_string(), e.name.clone(), e.value.to_string()])
        .collect();
    to_csv(&["rank", "name", "value"], &rows)
}

pub fn kills_csv(kills: &[KillRecord]) -> String {
    let rows: Vec<Vec<String>> = kills
        .iter()
        .map(|k| {
            vec![
                k.actor.clone(),
                k.target.clone(),
                k.timestamp.to_string(),
                k.event_scope.clone(),
            ]
        })
        .collect();
    to_csv(&["killer", "victim", "timestamp", "event"], &rows)
}

pub fn loot_csv(loots: &[LootRecord]) -> String {
    let rows: Vec<Vec<String>> = loots
        .iter()
        .map(|l| {
            vec![
                l.actor.clone(),
                l.amount.to_string(),
                l.timestamp.to_string(),
                l.event_scope.clone(),
                l.manual.to_string(),
            ]
        })
        .collect();
    to_csv(&["killer", "gp", "timestamp", "event", "manual"], &rows)
}
