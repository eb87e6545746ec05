//! Runtime invariant checks. Cheap enough to run after restore and from the
//! `verify_snapshot` tool; tests call them after every mutation.

use super::aggregate::Aggregator;
use super::ledger::Ledger;
use super::scope::{ScopeManager, DEFAULT_SCOPE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub msg: String,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invariant violated: {}", self.msg)
    }
}

impl std::error::Error for InvariantViolation {}

/// Every live scope has a bucket and nothing else does.
pub fn assert_bucket_set(
    aggregates: &Aggregator,
    scopes: &ScopeManager,
) -> Result<(), InvariantViolation> {
    if aggregates.bucket(DEFAULT_SCOPE).is_none() {
        return Err(InvariantViolation {
            msg: "default bucket missing".to_string(),
        });
    }
    if let Some(missing) = scopes.live().find(|s| aggregates.bucket(s).is_none()) {
        return Err(InvariantViolation {
            msg: format!("live scope {missing} has no bucket"),
        });
    }
    if let Some(stray) = aggregates.scopes().find(|s| !scopes.is_live(s)) {
        return Err(InvariantViolation {
            msg: format!("bucket kept for retired scope {stray}"),
        });
    }
    Ok(())
}

/// Each live bucket equals a fresh fold of the ledger.
pub fn check_fold_equivalence(
    ledger: &Ledger,
    aggregates: &Aggregator,
    scopes: &ScopeManager,
) -> Result<(), InvariantViolation> {
    assert_bucket_set(aggregates, scopes)?;
    let rebuilt = Aggregator::rebuild(ledger, scopes.live());
    let drift = aggregates.drift(&rebuilt);
    if !drift.is_empty() {
        return Err(InvariantViolation {
            msg: format!("aggregates drifted from ledger in {}", drift.join(", ")),
        });
    }
    Ok(())
}

/// Sequence numbers are unique and below the ledger's counter.
pub fn assert_sequence(ledger: &Ledger) -> Result<(), InvariantViolation> {
    let records = ledger.records();
    for pair in records.windows(2) {
        if pair[0].seq() == pair[1].seq() {
            return Err(InvariantViolation {
                msg: format!("sequence {} used twice", pair[0].seq()),
            });
        }
    }
    if let Some(last) = records.last() {
        if last.seq() >= ledger.next_seq() {
            return Err(InvariantViolation {
                msg: format!("next_seq {} not past {}", ledger.next_seq(), last.seq()),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistent_state_passes() {
        let mut ledger = Ledger::new();
        let mut agg = Aggregator::new();
        let scopes = ScopeManager::new();
        let rec = ledger.record_loot("a", 10, 0, DEFAULT_SCOPE, false);
        agg.apply_loot(&rec);
        assert!(check_fold_equivalence(&ledger, &agg, &scopes).is_ok());
        assert!(assert_sequence(&ledger).is_ok());
    }

    #[test]
    fn unapplied_record_is_drift() {
        let mut ledger = Ledger::new();
        let agg = Aggregator::new();
        let scopes = ScopeManager::new();
        ledger.record_kill("a", "b", 0, DEFAULT_SCOPE);
        let err = check_fold_equivalence(&ledger, &agg, &scopes).unwrap_err();
        assert!(err.msg.contains("default"));
    }

    #[test]
    fn stray_bucket_is_reported() {
        let mut ledger = Ledger::new();
        let mut agg = Aggregator::new();
        let scopes = ScopeManager::new();
        let rec = ledger.record_kill("a", "b", 0, "gone");
        agg.apply_kill(&rec);
        assert!(assert_bucket_set(&agg, &scopes).is_err());
    }
}
