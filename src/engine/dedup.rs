use std::collections::HashMap;

/// Suppression window for repeated deliveries.
pub const DEDUP_WINDOW_MS: u64 = 10_000;

/// Sliding-window duplicate suppression keyed by message text (or a synthetic key).
///
/// A key is rejected while its last *accepted* timestamp is less than the window
/// old; each acceptance refreshes the timestamp. Entries older than the window
/// carry no information and are dropped by [`DedupGuard::sweep`].
#[derive(Debug, Clone)]
pub struct DedupGuard {
    window_ms: u64,
    seen: HashMap<String, u64>,
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new(DEDUP_WINDOW_MS)
    }
}

impl DedupGuard {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            seen: HashMap::new(),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// True when `key` was accepted less than one window before `now`.
    pub fn is_duplicate(&self, key: &str, now: u64) -> bool {
        self.seen
            .get(key)
            .map(|last| now.saturating_sub(*last) < self.window_ms)
            .unwrap_or(false)
    }

    /// Check-and-record. Returns false (and records nothing) for duplicates.
    pub fn should_process(&mut self, key: &str, now: u64) -> bool {
        if self.is_duplicate(key, now) {
            return false;
        }
        self.seen.insert(key.to_string(), now);
        true
    }

    /// Evict entries that can no longer suppress anything. Returns the count removed.
    pub fn sweep(&mut self, now: u64) -> usize {
        let before = self.seen.len();
        let window = self.window_ms;
        self.seen.retain(|_, last| now.saturating_sub(*last) < window);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Dedup key for structured kills: `K|<killer>|<victim>` on normalized names.
pub fn kill_key(actor: &str, target: &str) -> String {
    format!(
        "K|{}|{}",
        super::aggregate::norm(actor),
        super::aggregate::norm(target)
    )
}
