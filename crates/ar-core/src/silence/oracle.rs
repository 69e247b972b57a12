use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use super::model::Silence;
use crate::alert::LabelSet;
use crate::matcher::{RegexCache, match_all};

// ---------------------------------------------------------------------------
// SilenceOracle
// ---------------------------------------------------------------------------

/// Answers "is this alert silenced right now?" against an in-memory snapshot
/// of the active rule set.
///
/// The snapshot is an `Arc<Vec<_>>` swapped wholesale on refresh (repository
/// mutations and a periodic tick both refresh); readers that captured the old
/// snapshot finish their check undisturbed. Activity is re-derived from the
/// window at query time, so a snapshot that has gone slightly stale can only
/// over-silence by rules that expired since the last refresh tick.
pub struct SilenceOracle {
    snapshot: RwLock<Arc<Vec<Silence>>>,
}

impl SilenceOracle {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Replace the active-rule snapshot.
    pub fn refresh(&self, silences: Vec<Silence>) {
        let mut guard = self.snapshot.write().expect("oracle lock poisoned");
        *guard = Arc::new(silences);
    }

    /// True iff any rule in the snapshot is active at `now` and its matcher
    /// list fully matches the alert's labels.
    pub fn is_silenced(&self, labels: &LabelSet, now: DateTime<Utc>, cache: &RegexCache) -> bool {
        self.matching_silence(labels, now, cache).is_some()
    }

    /// As [`is_silenced`](Self::is_silenced), returning the matching rule id.
    pub fn matching_silence(
        &self,
        labels: &LabelSet,
        now: DateTime<Utc>,
        cache: &RegexCache,
    ) -> Option<uuid::Uuid> {
        let snapshot = Arc::clone(&self.snapshot.read().expect("oracle lock poisoned"));
        snapshot
            .iter()
            .find(|s| s.is_active(now) && match_all(&s.matchers, labels, cache))
            .map(|s| s.id)
    }

    pub fn rule_count(&self) -> usize {
        self.snapshot.read().expect("oracle lock poisoned").len()
    }
}

impl Default for SilenceOracle {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
