use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreResult;

// ---------------------------------------------------------------------------
// InhibitionRecord
// ---------------------------------------------------------------------------

/// One "source suppresses target" fact. A target may be referenced by many
/// records concurrently; it is inhibited while at least one non-expired
/// record points at it.
#[derive(Debug, Clone, PartialEq)]
pub struct InhibitionRecord {
    pub target_fingerprint: String,
    pub source_fingerprint: String,
    pub rule_name: String,
    pub inhibited_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl InhibitionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

// ---------------------------------------------------------------------------
// StateMirror — optional secondary persistence
// ---------------------------------------------------------------------------

/// Mirror for inhibition state (Redis in production). Mirror errors degrade
/// gracefully: the in-memory operation has already succeeded and an error
/// counter ticks.
#[async_trait]
pub trait StateMirror: Send + Sync {
    async fn record(&self, record: &InhibitionRecord) -> CoreResult<()>;
    async fn remove(&self, target_fp: &str, source_fp: &str) -> CoreResult<()>;
}

// ---------------------------------------------------------------------------
// InhibitionState
// ---------------------------------------------------------------------------

/// Report of one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateSweepReport {
    /// Records dropped because `expires_at` elapsed.
    pub expired: usize,
    /// Records dropped because their source left the active-alert cache.
    pub orphaned: usize,
}

/// In-memory inhibition state keyed by `(target, source)`.
pub struct InhibitionState {
    records: Mutex<HashMap<(String, String), InhibitionRecord>>,
    mirror: Option<Arc<dyn StateMirror>>,
    mirror_errors: AtomicU64,
}

impl InhibitionState {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            mirror: None,
            mirror_errors: AtomicU64::new(0),
        }
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn StateMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Insert (or refresh) a record and mirror it.
    pub async fn record(&self, record: InhibitionRecord) {
        {
            let mut records = self.records.lock().expect("inhibition state lock poisoned");
            records.insert(
                (
                    record.target_fingerprint.clone(),
                    record.source_fingerprint.clone(),
                ),
                record.clone(),
            );
        }
        if let Some(mirror) = &self.mirror
            && let Err(e) = mirror.record(&record).await
        {
            self.mirror_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(domain = "res", error = %e, "inhibition mirror write failed");
        }
    }

    /// Remove one `(target, source)` pair.
    pub async fn remove(&self, target_fp: &str, source_fp: &str) -> bool {
        let removed = {
            let mut records = self.records.lock().expect("inhibition state lock poisoned");
            records
                .remove(&(target_fp.to_string(), source_fp.to_string()))
                .is_some()
        };
        if removed {
            self.mirror_remove(target_fp, source_fp).await;
        }
        removed
    }

    /// Drop every record whose source is `source_fp` (the source resolved).
    /// Returns the number of records removed.
    pub async fn remove_by_source(&self, source_fp: &str) -> usize {
        let victims: Vec<(String, String)> = {
            let mut records = self.records.lock().expect("inhibition state lock poisoned");
            let keys: Vec<(String, String)> = records
                .keys()
                .filter(|(_, src)| src == source_fp)
                .cloned()
                .collect();
            for key in &keys {
                records.remove(key);
            }
            keys
        };
        for (target, source) in &victims {
            self.mirror_remove(target, source).await;
        }
        victims.len()
    }

    /// A target is inhibited iff at least one non-expired record references
    /// it.
    pub fn is_inhibited(&self, target_fp: &str, now: DateTime<Utc>) -> bool {
        let records = self.records.lock().expect("inhibition state lock poisoned");
        records
            .values()
            .any(|r| r.target_fingerprint == target_fp && !r.is_expired(now))
    }

    /// All records currently held for a target (operator introspection).
    pub fn records_for(&self, target_fp: &str) -> Vec<InhibitionRecord> {
        let records = self.records.lock().expect("inhibition state lock poisoned");
        records
            .values()
            .filter(|r| r.target_fingerprint == target_fp)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("inhibition state lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mirror_errors(&self) -> u64 {
        self.mirror_errors.load(Ordering::Relaxed)
    }

    /// Cleanup pass: drop expired records and records whose source is no
    /// longer alive according to `source_alive`.
    pub async fn sweep(
        &self,
        now: DateTime<Utc>,
        source_alive: impl Fn(&str) -> bool,
    ) -> StateSweepReport {
        let mut report = StateSweepReport::default();
        let victims: Vec<(String, String)> = {
            let mut records = self.records.lock().expect("inhibition state lock poisoned");
            let keys: Vec<(String, String)> = records
                .iter()
                .filter_map(|(key, r)| {
                    if r.is_expired(now) {
                        report.expired += 1;
                        Some(key.clone())
                    } else if !source_alive(&r.source_fingerprint) {
                        report.orphaned += 1;
                        Some(key.clone())
                    } else {
                        None
                    }
                })
                .collect();
            for key in &keys {
                records.remove(key);
            }
            keys
        };
        for (target, source) in &victims {
            self.mirror_remove(target, source).await;
        }
        report
    }

    async fn mirror_remove(&self, target_fp: &str, source_fp: &str) {
        if let Some(mirror) = &self.mirror
            && let Err(e) = mirror.remove(target_fp, source_fp).await
        {
            self.mirror_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(domain = "res", error = %e, "inhibition mirror remove failed");
        }
    }
}

impl Default for InhibitionState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreReason, core_err};
    use chrono::Duration;

    fn record(target: &str, source: &str) -> InhibitionRecord {
        InhibitionRecord {
            target_fingerprint: target.to_string(),
            source_fingerprint: source.to_string(),
            rule_name: "rule".to_string(),
            inhibited_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn record_then_query() {
        let state = InhibitionState::new();
        state.record(record("t1", "s1")).await;
        assert!(state.is_inhibited("t1", Utc::now()));
        assert!(!state.is_inhibited("t2", Utc::now()));
        assert_eq!(state.records_for("t1").len(), 1);
    }

    #[tokio::test]
    async fn multiple_sources_one_target() {
        let state = InhibitionState::new();
        state.record(record("t1", "s1")).await;
        state.record(record("t1", "s2")).await;
        assert_eq!(state.len(), 2);

        state.remove("t1", "s1").await;
        assert!(state.is_inhibited("t1", Utc::now()), "second source still holds");
        state.remove("t1", "s2").await;
        assert!(!state.is_inhibited("t1", Utc::now()));
    }

    #[tokio::test]
    async fn expired_record_does_not_inhibit() {
        let state = InhibitionState::new();
        let mut r = record("t1", "s1");
        r.expires_at = Some(Utc::now() - Duration::seconds(1));
        state.record(r).await;
        assert!(!state.is_inhibited("t1", Utc::now()));
        assert_eq!(state.len(), 1, "record kept until sweep");
    }

    #[tokio::test]
    async fn remove_by_source_clears_all_targets() {
        let state = InhibitionState::new();
        state.record(record("t1", "s1")).await;
        state.record(record("t2", "s1")).await;
        state.record(record("t3", "s2")).await;

        let removed = state.remove_by_source("s1").await;
        assert_eq!(removed, 2);
        assert!(!state.is_inhibited("t1", Utc::now()));
        assert!(state.is_inhibited("t3", Utc::now()));
    }

    #[tokio::test]
    async fn sweep_drops_expired_and_orphaned() {
        let state = InhibitionState::new();
        let mut expired = record("t1", "s1");
        expired.expires_at = Some(Utc::now() - Duration::seconds(1));
        state.record(expired).await;
        state.record(record("t2", "s2")).await;
        state.record(record("t3", "s3")).await;

        let report = state.sweep(Utc::now(), |src| src == "s2").await;
        assert_eq!(report, StateSweepReport { expired: 1, orphaned: 1 });
        assert_eq!(state.len(), 1);
        assert!(state.is_inhibited("t2", Utc::now()));
    }

    // -- mirror degradation --------------------------------------------------

    struct FailingMirror;

    #[async_trait]
    impl StateMirror for FailingMirror {
        async fn record(&self, _: &InhibitionRecord) -> CoreResult<()> {
            Err(core_err(CoreReason::Transient, "mirror down"))
        }

        async fn remove(&self, _: &str, _: &str) -> CoreResult<()> {
            Err(core_err(CoreReason::Transient, "mirror down"))
        }
    }

    #[tokio::test]
    async fn mirror_failure_degrades_gracefully() {
        let state = InhibitionState::new().with_mirror(Arc::new(FailingMirror));
        state.record(record("t1", "s1")).await;
        assert!(state.is_inhibited("t1", Utc::now()), "in-memory path wins");
        assert_eq!(state.mirror_errors(), 1);

        state.remove("t1", "s1").await;
        assert!(!state.is_inhibited("t1", Utc::now()));
        assert_eq!(state.mirror_errors(), 2);
    }
}
