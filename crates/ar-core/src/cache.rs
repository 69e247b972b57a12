use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::alert::{Alert, AlertStatus};
use crate::error::CoreResult;
use crate::fingerprint;

// ---------------------------------------------------------------------------
// Dedup outcome
// ---------------------------------------------------------------------------

/// Result of upserting an inbound alert against the stored copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// No stored alert with this fingerprint: inserted.
    Created,
    /// Stored copy differed in status or `endsAt`: updated in place,
    /// original `startsAt` preserved.
    Updated,
    /// Byte-for-byte duplicate of the stored state: dropped.
    Ignored,
}

// ---------------------------------------------------------------------------
// CacheMirror — optional secondary persistence
// ---------------------------------------------------------------------------

/// Write-through mirror (Redis in production). Mirror failures never fail a
/// cache operation; the caller counts them and moves on.
#[async_trait]
pub trait CacheMirror: Send + Sync {
    async fn put(&self, alert: &Alert) -> CoreResult<()>;
    async fn remove(&self, fingerprint: &str) -> CoreResult<()>;
    /// Warm-start load of all mirrored alerts.
    async fn load_all(&self) -> CoreResult<Vec<Alert>>;
}

// ---------------------------------------------------------------------------
// AlertCache
// ---------------------------------------------------------------------------

/// Sharded in-memory map of live alerts by fingerprint; the source of truth
/// for "is this firing right now".
///
/// Each shard holds its own lock and every operation touches exactly one
/// shard, so contention scales with the shard count. Shard selection hashes
/// the fingerprint string; the count is rounded up to a power of two so
/// selection is a mask.
pub struct AlertCache {
    shards: Vec<RwLock<HashMap<String, Alert>>>,
    mask: u64,
    mirror: Option<Arc<dyn CacheMirror>>,
    mirror_errors: AtomicU64,
}

impl AlertCache {
    /// `shards == 0` sizes from available hardware parallelism.
    pub fn new(shards: usize) -> Self {
        let wanted = if shards == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(8)
        } else {
            shards
        };
        let count = wanted.next_power_of_two();
        Self {
            shards: (0..count).map(|_| RwLock::new(HashMap::new())).collect(),
            mask: (count - 1) as u64,
            mirror: None,
            mirror_errors: AtomicU64::new(0),
        }
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn CacheMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    fn shard(&self, fp: &str) -> &RwLock<HashMap<String, Alert>> {
        let idx = (fingerprint::shard_hash(fp) & self.mask) as usize;
        &self.shards[idx]
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn get(&self, fp: &str) -> Option<Alert> {
        self.shard(fp)
            .read()
            .expect("cache shard lock poisoned")
            .get(fp)
            .cloned()
    }

    pub fn contains(&self, fp: &str) -> bool {
        self.shard(fp)
            .read()
            .expect("cache shard lock poisoned")
            .contains_key(fp)
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().expect("cache shard lock poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unconditional insert/replace, mirrored when configured.
    pub async fn put(&self, alert: Alert) {
        {
            let mut shard = self
                .shard(&alert.fingerprint)
                .write()
                .expect("cache shard lock poisoned");
            shard.insert(alert.fingerprint.clone(), alert.clone());
        }
        self.mirror_put(&alert).await;
    }

    /// Dedup upsert (the coordinator's entry point). Returns the decision and
    /// the post-operation stored record.
    pub async fn upsert(&self, mut alert: Alert) -> (IngestOutcome, Alert) {
        alert.ensure_fingerprint();
        let (outcome, stored) = {
            let mut shard = self
                .shard(&alert.fingerprint)
                .write()
                .expect("cache shard lock poisoned");
            match shard.get_mut(&alert.fingerprint) {
                None => {
                    shard.insert(alert.fingerprint.clone(), alert.clone());
                    (IngestOutcome::Created, alert)
                }
                Some(stored) if stored.status == alert.status && stored.ends_at == alert.ends_at => {
                    (IngestOutcome::Ignored, stored.clone())
                }
                Some(stored) => {
                    let starts_at = stored.starts_at;
                    *stored = alert;
                    stored.starts_at = starts_at;
                    (IngestOutcome::Updated, stored.clone())
                }
            }
        };
        if outcome != IngestOutcome::Ignored {
            self.mirror_put(&stored).await;
        }
        (outcome, stored)
    }

    pub async fn remove(&self, fp: &str) -> Option<Alert> {
        let removed = {
            let mut shard = self.shard(fp).write().expect("cache shard lock poisoned");
            shard.remove(fp)
        };
        if removed.is_some()
            && let Some(mirror) = &self.mirror
            && mirror.remove(fp).await.is_err()
        {
            self.mirror_errors.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Snapshot copy of every live alert; never a live view.
    pub fn snapshot(&self) -> Vec<Alert> {
        let mut out = Vec::with_capacity(self.len());
        for shard in &self.shards {
            let guard = shard.read().expect("cache shard lock poisoned");
            out.extend(guard.values().cloned());
        }
        out
    }

    /// Visit a snapshot of each shard in turn. The callback returns `false`
    /// to stop early.
    pub fn iterate(&self, mut cb: impl FnMut(&Alert) -> bool) {
        for shard in &self.shards {
            let alerts: Vec<Alert> = {
                let guard = shard.read().expect("cache shard lock poisoned");
                guard.values().cloned().collect()
            };
            for alert in &alerts {
                if !cb(alert) {
                    return;
                }
            }
        }
    }

    /// Drop resolved alerts whose `endsAt` is at or before `cutoff`.
    /// Returns the number removed.
    pub fn sweep_resolved(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut guard = shard.write().expect("cache shard lock poisoned");
            guard.retain(|_, a| {
                let expired = a.status == AlertStatus::Resolved
                    && a.ends_at.is_some_and(|end| end <= cutoff);
                if expired {
                    removed += 1;
                }
                !expired
            });
        }
        removed
    }

    /// Warm the cache from the mirror on startup. Mirror errors surface here
    /// (startup is allowed to notice), but an empty mirror is not an error.
    pub async fn warm_from_mirror(&self) -> CoreResult<usize> {
        let Some(mirror) = &self.mirror else {
            return Ok(0);
        };
        let alerts = mirror.load_all().await?;
        let count = alerts.len();
        for alert in alerts {
            let mut shard = self
                .shard(&alert.fingerprint)
                .write()
                .expect("cache shard lock poisoned");
            shard.entry(alert.fingerprint.clone()).or_insert(alert);
        }
        Ok(count)
    }

    pub fn mirror_errors(&self) -> u64 {
        self.mirror_errors.load(Ordering::Relaxed)
    }

    async fn mirror_put(&self, alert: &Alert) {
        if let Some(mirror) = &self.mirror
            && let Err(e) = mirror.put(alert).await
        {
            self.mirror_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(domain = "res", error = %e, "cache mirror write failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
