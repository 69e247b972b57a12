use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreReason, CoreResult, core_err};
use crate::queue::PublishJob;

// ---------------------------------------------------------------------------
// Dead-letter model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DlqStatus {
    /// Retry budget exhausted or failure was permanent.
    Dead,
    /// Re-enqueued by an operator; outcome pending.
    Replayed,
    /// A replay attempt delivered successfully.
    ReplayedSucceeded,
}

impl fmt::Display for DlqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DlqStatus::Dead => f.write_str("dead"),
            DlqStatus::Replayed => f.write_str("replayed"),
            DlqStatus::ReplayedSucceeded => f.write_str("replayed-succeeded"),
        }
    }
}

/// One dead-lettered job, payload preserved verbatim for replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    pub job_id: Uuid,
    pub target: String,
    pub payload: crate::publish::GroupSnapshot,
    pub first_seen: DateTime<Utc>,
    pub last_error: String,
    pub attempt_count: u32,
    pub status: DlqStatus,
}

/// List filter; unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct DlqFilter {
    pub target: Option<String>,
    pub status: Option<DlqStatus>,
    pub limit: usize,
    pub offset: usize,
}

/// Aggregated counters for operator dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DlqStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_target: BTreeMap<String, usize>,
}

// ---------------------------------------------------------------------------
// DlqStore
// ---------------------------------------------------------------------------

/// Dead-letter repository contract (a PostgreSQL table in production; the
/// core depends only on this trait).
#[async_trait]
pub trait DlqStore: Send + Sync {
    /// Record a job's terminal failure. A second append for the same job id
    /// refreshes the error and attempt count and flips it back to `dead`.
    async fn append(&self, job: &PublishJob, error: &str) -> CoreResult<()>;

    /// Filtered, `first_seen`-ordered page of entries.
    async fn list(&self, filter: &DlqFilter) -> CoreResult<Vec<DlqEntry>>;

    /// Mark the given entries `replayed` and return them for re-enqueue.
    /// Unknown ids are a `NotFound` error; nothing is marked in that case.
    async fn mark_replayed(&self, ids: &[Uuid]) -> CoreResult<Vec<DlqEntry>>;

    /// Record the outcome of a replay attempt.
    async fn record_replay_result(&self, job_id: Uuid, delivered: bool) -> CoreResult<()>;

    /// Drop entries first seen before `cutoff`; returns the number removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> CoreResult<usize>;

    async fn stats(&self) -> CoreResult<DlqStats>;
}

// ---------------------------------------------------------------------------
// MemoryDlqStore
// ---------------------------------------------------------------------------

/// In-memory [`DlqStore`] for tests and single-node runs.
#[derive(Default)]
pub struct MemoryDlqStore {
    inner: RwLock<BTreeMap<Uuid, DlqEntry>>,
}

impl MemoryDlqStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("dlq lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DlqStore for MemoryDlqStore {
    async fn append(&self, job: &PublishJob, error: &str) -> CoreResult<()> {
        let mut inner = self.inner.write().expect("dlq lock poisoned");
        inner
            .entry(job.id)
            .and_modify(|e| {
                e.last_error = error.to_string();
                e.attempt_count = job.attempts;
                e.status = DlqStatus::Dead;
            })
            .or_insert_with(|| DlqEntry {
                job_id: job.id,
                target: job.target.name.clone(),
                payload: job.snapshot.clone(),
                first_seen: Utc::now(),
                last_error: error.to_string(),
                attempt_count: job.attempts,
                status: DlqStatus::Dead,
            });
        Ok(())
    }

    async fn list(&self, filter: &DlqFilter) -> CoreResult<Vec<DlqEntry>> {
        let inner = self.inner.read().expect("dlq lock poisoned");
        let mut rows: Vec<DlqEntry> = inner
            .values()
            .filter(|e| {
                filter.target.as_ref().is_none_or(|t| e.target == *t)
                    && filter.status.is_none_or(|s| e.status == s)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then(a.job_id.cmp(&b.job_id)));
        let limit = if filter.limit == 0 { usize::MAX } else { filter.limit };
        Ok(rows.into_iter().skip(filter.offset).take(limit).collect())
    }

    async fn mark_replayed(&self, ids: &[Uuid]) -> CoreResult<Vec<DlqEntry>> {
        let mut inner = self.inner.write().expect("dlq lock poisoned");
        for id in ids {
            if !inner.contains_key(id) {
                return Err(core_err(
                    CoreReason::NotFound,
                    format!("dead-letter entry {id}"),
                ));
            }
        }
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let entry = inner.get_mut(id).expect("checked above");
            entry.status = DlqStatus::Replayed;
            out.push(entry.clone());
        }
        Ok(out)
    }

    async fn record_replay_result(&self, job_id: Uuid, delivered: bool) -> CoreResult<()> {
        let mut inner = self.inner.write().expect("dlq lock poisoned");
        let entry = inner
            .get_mut(&job_id)
            .ok_or_else(|| core_err(CoreReason::NotFound, format!("dead-letter entry {job_id}")))?;
        entry.status = if delivered {
            DlqStatus::ReplayedSucceeded
        } else {
            DlqStatus::Dead
        };
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> CoreResult<usize> {
        let mut inner = self.inner.write().expect("dlq lock poisoned");
        let before = inner.len();
        inner.retain(|_, e| e.first_seen >= cutoff);
        Ok(before - inner.len())
    }

    async fn stats(&self) -> CoreResult<DlqStats> {
        let inner = self.inner.read().expect("dlq lock poisoned");
        let mut stats = DlqStats {
            total: inner.len(),
            ..Default::default()
        };
        for entry in inner.values() {
            *stats.by_status.entry(entry.status.to_string()).or_default() += 1;
            *stats.by_target.entry(entry.target.clone()).or_default() += 1;
        }
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
