//! Structured JSON-lines logging.
//!
//! Each record is printed to stdout and appended under
//! `<LOG_DIR>/<RUN_ID>/` (`events.jsonl` for info and above, `trace.jsonl`
//! for trace/debug). Filtering: `LOG_LEVEL` and `LOG_DOMAINS`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Ingest,  // Parsed lines, dedup decisions
    Ledger,  // Adjustments, resets
    Scope,   // Scope lifecycle
    Query,   // Board requests
    Persist, // Snapshots, journal, archives
    Notify,  // Outbound webhook delivery
    Http,    // Request handling
    System,  // Startup, shutdown, recovery
    Profile, // Timing
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Ingest => "ingest",
            Domain::Ledger => "ledger",
            Domain::Scope => "scope",
            Domain::Query => "query",
            Domain::Persist => "persist",
            Domain::Notify => "notify",
            Domain::Http => "http",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn open_sink(path: PathBuf) -> Option<Mutex<BufWriter<File>>> {
    match File::create(&path) {
        Ok(file) => Some(Mutex::new(BufWriter::new(file))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }

        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        RunContext {
            events: open_sink(run_dir.join("events.jsonl")),
            trace: open_sink(run_dir.join("trace.jsonl")),
            run_id,
        }
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "webhook_url", "token", "url"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["scope", "actor", "route", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(Ok(mut w)) = writer.as_ref().map(|m| m.lock()) {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds; the clock every ingestion is stamped with.
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }

    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    println!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_ingest(source: &str, actor: &str, target: &str, amount: i64, scope: &str) {
    agg_increment("accepted");
    log(
        Level::Info,
        Domain::Ingest,
        "accepted",
        obj(&[
            ("source", v_str(source)),
            ("actor", v_str(actor)),
            ("target", v_str(target)),
            ("amount", json!(amount)),
            ("scope", v_str(scope)),
        ]),
    );
}

/// Declined input: `reason` is `invalid` or `duplicate`.
pub fn log_rejected(source: &str, reason: &str, raw: &str) {
    agg_increment(reason);
    let preview: String = raw.chars().take(160).collect();
    log(
        Level::Debug,
        Domain::Ingest,
        "declined",
        obj(&[
            ("source", v_str(source)),
            ("reason", v_str(reason)),
            ("raw", v_str(&preview)),
        ]),
    );
}

pub fn log_scope_change(action: &str, scope: &str, fields: &[(&str, Value)]) {
    let mut data = obj(fields);
    data.insert("action".to_string(), v_str(action));
    data.insert("scope".to_string(), v_str(scope));
    log(Level::Info, Domain::Scope, action, data);
}

pub fn log_snapshot(store: &str, digest: &str, records: usize, elapsed_ms: f64) {
    log(
        Level::Info,
        Domain::Persist,
        "snapshot_saved",
        obj(&[
            ("store", v_str(store)),
            ("digest", v_str(digest)),
            ("records", json!(records)),
            ("elapsed_ms", v_num(elapsed_ms)),
        ]),
    );
}

pub fn log_notify_failure(event: &str, attempts: u32, err: &str) {
    log(
        Level::Warn,
        Domain::Notify,
        "delivery_failed",
        obj(&[
            ("event_type", v_str(event)),
            ("attempts", json!(attempts)),
            ("error", v_str(err)),
        ]),
    );
}

// =============================================================================
// Field helpers
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self::with_context(label, &[])
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    fn should_sample() -> bool {
        std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| {
                if p >= 1.0 {
                    true
                } else if p <= 0.0 {
                    false
                } else {
                    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
                    let bucket = (seq % 10_000) as f64 / 10_000.0;
                    bucket < p
                }
            })
            .unwrap_or(true)
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(self.elapsed_ms()));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Ingestion counters for periodic summaries
// =============================================================================

static AGGREGATOR: OnceLock<Mutex<IngestCounters>> = OnceLock::new();

fn get_aggregator() -> &'static Mutex<IngestCounters> {
    AGGREGATOR.get_or_init(|| Mutex::new(IngestCounters::new()))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub duplicate: u64,
    pub invalid: u64,
}

struct IngestCounters {
    stats: IngestStats,
    last_flush: Instant,
    flush_interval_secs: u64,
}

impl IngestCounters {
    fn new() -> Self {
        Self {
            stats: IngestStats::default(),
            last_flush: Instant::now(),
            flush_interval_secs: std::env::var("LOG_FLUSH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }

    fn increment(&mut self, event: &str) {
        match event {
            "accepted" => self.stats.accepted += 1,
            "duplicate" => self.stats.duplicate += 1,
            "invalid" => self.stats.invalid += 1,
            _ => {}
        }
    }

    fn maybe_flush(&mut self) -> Option<IngestStats> {
        if self.last_flush.elapsed().as_secs() >= self.flush_interval_secs {
            self.last_flush = Instant::now();
            Some(std::mem::take(&mut self.stats))
        } else {
            None
        }
    }
}

/// Call periodically to emit aggregated ingestion stats
pub fn tick_aggregator() {
    if let Ok(mut agg) = get_aggregator().lock() {
        if let Some(stats) = agg.maybe_flush() {
            log(
                Level::Info,
                Domain::System,
                "ingest_stats",
                obj(&[
                    ("accepted", json!(stats.accepted)),
                    ("duplicate", json!(stats.duplicate)),
                    ("invalid", json!(stats.invalid)),
                ]),
            );
        }
    }
}

pub fn agg_increment(event: &str) {
    if let Ok(mut agg) = get_aggregator().lock() {
        agg.increment(event);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }

    #[test]
    fn test_webhook_url_is_redacted() {
        let fields = sanitize_fields(obj(&[
            ("webhook_url", v_str("https://example.invalid/hook/secret")),
            ("scope", v_str("default")),
        ]));
        assert_eq!(fields["webhook_url"], "[REDACTED]");
        assert_eq!(fields["scope"], "default");
    }

    #[test]
    fn test_split_lifts_correlation_keys() {
        let (top, data) = split_fields(obj(&[
            ("scope", v_str("event1")),
            ("amount", json!(5)),
        ]));
        assert!(top.contains_key("scope"));
        assert!(data.contains_key("amount"));
    }

    #[test]
    fn test_counters_track_outcomes() {
        let mut counters = IngestCounters::new();
        counters.flush_interval_secs = 0;
        counters.increment("accepted");
        counters.increment("duplicate");
        counters.increment("noise");
        let stats = counters.maybe_flush().unwrap();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.duplicate, 1);
        assert_eq!(stats.invalid, 0);
        assert_eq!(counters.stats, IngestStats::default());
    }
}
