use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use ar_config::Priority;

use crate::publish::GroupSnapshot;
use crate::target::PublishingTarget;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    InFlight,
    Succeeded,
    /// Transient failure, parked in the retry heap.
    Failed,
    DeadLettered,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::InFlight => "in-flight",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::DeadLettered => "dead-lettered",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// PublishJob
// ---------------------------------------------------------------------------

/// One delivery unit: a group snapshot bound to a single target.
///
/// The attempt counter is job-local; it survives DLQ replay so a replayed
/// job resumes its budget instead of restarting it.
#[derive(Debug, Clone)]
pub struct PublishJob {
    pub id: Uuid,
    pub priority: Priority,
    pub target: Arc<PublishingTarget>,
    pub snapshot: GroupSnapshot,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Set on jobs re-enqueued from the DLQ; their terminal outcome is
    /// written back to the dead-letter row.
    pub replayed: bool,
}

impl PublishJob {
    pub fn new(priority: Priority, target: Arc<PublishingTarget>, snapshot: GroupSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority,
            target,
            snapshot,
            attempts: 0,
            created_at: Utc::now(),
            replayed: false,
        }
    }

    pub fn record(&self, status: JobStatus) -> JobRecord {
        JobRecord {
            id: self.id,
            target: self.target.name.clone(),
            priority: self.priority,
            attempts: self.attempts,
            status,
            updated_at: Utc::now(),
        }
    }
}

/// Last-known state of a job, retained in the tracking LRU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: Uuid,
    pub target: String,
    pub priority: Priority,
    pub attempts: u32,
    pub status: JobStatus,
    pub updated_at: DateTime<Utc>,
}
