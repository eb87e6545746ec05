//! Ranked leaderboards over the ledger.
//!
//! Queries read the ledger (not the aggregate buckets) because period filters
//! need per-record timestamps. Steps: scope filter, period filter, optional
//! exact name filter, fold by normalized name, stable descending sort, top-N.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::aggregate::norm;
use super::ledger::{Ledger, Timestamp};
use super::scope::scope_matches;

pub const DEFAULT_BOARD_SIZE: usize = 10;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
    All,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
            Period::All => "all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Some(Period::Daily),
            "weekly" => Some(Period::Weekly),
            "monthly" => Some(Period::Monthly),
            "all" => Some(Period::All),
            _ => None,
        }
    }

    pub fn cutoff_ms(&self) -> Option<u64> {
        match self {
            Period::Daily => Some(DAY_MS),
            Period::Weekly => Some(7 * DAY_MS),
            Period::Monthly => Some(30 * DAY_MS),
            Period::All => None,
        }
    }

    /// Inclusive at the boundary; records stamped after `now` always pass.
    pub fn includes(&self, timestamp: Timestamp, now: Timestamp) -> bool {
        match self.cutoff_ms() {
            Some(cutoff) => now.saturating_sub(timestamp) <= cutoff,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardKind {
    Kills,
    Loot,
    Deaths,
}

impl BoardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoardKind::Kills => "kills",
            BoardKind::Loot => "loot",
            BoardKind::Deaths => "deaths",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "kills" | "hiscores" => Some(BoardKind::Kills),
            "loot" | "lootboard" | "gold" => Some(BoardKind::Loot),
            "deaths" => Some(BoardKind::Deaths),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardQuery<'a> {
    pub kind: BoardKind,
    pub scope: &'a str,
    pub period: Period,
    pub name_filter: Option<&'a str>,
    pub limit: usize,
}

impl<'a> BoardQuery<'a> {
    pub fn new(kind: BoardKind, scope: &'a str) -> Self {
        Self {
            kind,
            scope,
            period: Period::All,
            name_filter: None,
            limit: DEFAULT_BOARD_SIZE,
        }
    }

    pub fn period(mut self, period: Period) -> Self {
        self.period = period;
        self
    }

    pub fn name(mut self, name: Option<&'a str>) -> Self {
        self.name_filter = name;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub rank: usize,
    /// First-seen casing.
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedBoard {
    pub kind: BoardKind,
    pub scope: String,
    pub period: Period,
    pub entries: Vec<RankedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardResult {
    Ranked(RankedBoard),
    NoData {
        kind: BoardKind,
        scope: String,
        period: Period,
    },
}

impl BoardResult {
    pub fn is_no_data(&self) -> bool {
        matches!(self, BoardResult::NoData { .. })
    }

    pub fn entries(&self) -> &[RankedEntry] {
        match self {
            BoardResult::Ranked(board) => &board.entries,
            BoardResult::NoData { .. } => &[],
        }
    }

    pub fn kind(&self) -> BoardKind {
        match self {
            BoardResult::Ranked(board) => board.kind,
            BoardResult::NoData { kind, .. } => *kind,
        }
    }

    pub fn period(&self) -> Period {
        match self {
            BoardResult::Ranked(board) => board.period,
            BoardResult::NoData { period, .. } => *period,
        }
    }
}

/// Group-by with first-appearance ordering preserved for the stable sort.
#[derive(Default)]
struct Tally {
    index: HashMap<String, usize>,
    rows: Vec<(String, i64)>,
}

impl Tally {
    fn add(&mut self, display: &str, value: i64) {
        let key = norm(display);
        match self.index.get(&key) {
            Some(&i) => self.rows[i].1 = self.rows[i].1.saturating_add(value),
            None => {
                self.index.insert(key, self.rows.len());
                self.rows.push((display.trim().to_string(), value));
            }
        }
    }

    fn into_ranked(mut self, limit: usize) -> Vec<RankedEntry> {
        // sort_by is stable: equal values keep first-appearance order
        self.rows.sort_by(|a, b| b.1.cmp(&a.1));
        self.rows
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, (name, value))| RankedEntry {
                rank: i + 1,
                name,
                value,
            })
            .collect()
    }
}

pub fn top_n(ledger: &Ledger, query: &BoardQuery<'_>, now: Timestamp) -> BoardResult {
    let filter = query.name_filter.map(norm).filter(|n| !n.is_empty());
    let wanted = |name: &str| filter.as_ref().map(|f| norm(name) == *f).unwrap_or(true);
    let in_window =
        |scope: &str, ts: Timestamp| scope_matches(query.scope, scope) && query.period.includes(ts, now);

    let mut tally = Tally::default();
    match query.kind {
        BoardKind::Kills => {
            for k in ledger.kills() {
                if in_window(&k.event_scope, k.timestamp) && wanted(&k.actor) {
                    tally.add(&k.actor, 1);
                }
            }
        }
        BoardKind::Deaths => {
            for k in ledger.kills() {
                if in_window(&k.event_scope, k.timestamp) && wanted(&k.target) {
                    tally.add(&k.target, 1);
                }
            }
        }
        BoardKind::Loot => {
            for l in ledger.loots() {
                if in_window(&l.event_scope, l.timestamp) && wanted(&l.actor) {
                    tally.add(&l.actor, l.amount);
                }
            }
        }
    }

    if tally.rows.is_empty() {
        return BoardResult::NoData {
            kind: query.kind,
            scope: query.scope.to_string(),
            period: query.period,
        };
    }

    BoardResult::Ranked(RankedBoard {
        kind: query.kind,
        scope: query.scope.to_string(),
        period: query.period,
        entries: tally.into_ranked(query.limit.max(1)),
    })
}
