mod job;
mod retry;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use lru_time_cache::LruCache;
use tokio::sync::Notify;
use uuid::Uuid;

use ar_config::{Priority, TierCapacity};

pub use job::{JobRecord, JobStatus, PublishJob};
pub use retry::{ErrorClass, RetryPolicy, classify_http_status};

// ---------------------------------------------------------------------------
// Submit errors
// ---------------------------------------------------------------------------

/// Non-blocking submit refusal: the tier is at capacity. The caller drops
/// the job, counts it, and moves on — timer cadence bounds fan-out, so a
/// full tier means the relay is already far behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("publish queue tier {tier} is full")]
pub struct QueueFull {
    pub tier: Priority,
}

// ---------------------------------------------------------------------------
// PublishQueue
// ---------------------------------------------------------------------------

struct DelayedJob {
    at: Instant,
    seq: u64,
    job: PublishJob,
}

impl PartialEq for DelayedJob {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for DelayedJob {}

impl Ord for DelayedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at).then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for DelayedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueInner {
    high: VecDeque<PublishJob>,
    medium: VecDeque<PublishJob>,
    low: VecDeque<PublishJob>,
    /// Time-ordered retry heap; due entries promote back into their tier.
    delayed: BinaryHeap<Reverse<DelayedJob>>,
    seq: u64,
    /// Last-known job state for operator queries, bounded.
    tracking: LruCache<Uuid, JobRecord>,
}

/// Three-tier bounded priority queue with a retry heap.
///
/// `submit` never blocks; workers drain with strict priority (a high job
/// always beats medium/low) and FIFO order within a tier. Retries live in a
/// time-ordered heap and rejoin their tier when due — promotion bypasses the
/// capacity check, since the job was already admitted once.
pub struct PublishQueue {
    inner: Mutex<QueueInner>,
    caps: TierCapacity,
    notify: Notify,
}

impl PublishQueue {
    pub fn new(caps: TierCapacity, tracking_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                high: VecDeque::new(),
                medium: VecDeque::new(),
                low: VecDeque::new(),
                delayed: BinaryHeap::new(),
                seq: 0,
                tracking: LruCache::with_capacity(tracking_capacity.max(1)),
            }),
            caps,
            notify: Notify::new(),
        }
    }

    /// Non-blocking enqueue into the job's priority tier.
    pub fn submit(&self, job: PublishJob) -> Result<(), QueueFull> {
        {
            let mut guard = self.inner.lock().expect("publish queue lock poisoned");
            let inner = &mut *guard;
            let (tier, cap) = match job.priority {
                Priority::High => (&mut inner.high, self.caps.high),
                Priority::Medium => (&mut inner.medium, self.caps.medium),
                Priority::Low => (&mut inner.low, self.caps.low),
            };
            if tier.len() >= cap {
                return Err(QueueFull { tier: job.priority });
            }
            inner.tracking.insert(job.id, job.record(JobStatus::Queued));
            tier.push_back(job);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Park a job until `at`; it promotes back to its tier when due.
    pub fn schedule_retry(&self, job: PublishJob, at: Instant) {
        {
            let mut guard = self.inner.lock().expect("publish queue lock poisoned");
            let inner = &mut *guard;
            inner.tracking.insert(job.id, job.record(JobStatus::Failed));
            let seq = inner.seq;
            inner.seq += 1;
            inner.delayed.push(Reverse(DelayedJob { at, seq, job }));
        }
        // Wake a worker so it can shorten its sleep to the new deadline.
        self.notify.notify_one();
    }

    /// Pop the next runnable job at `now`. Returns the job (marked
    /// in-flight) or, when nothing is runnable, the instant the earliest
    /// retry becomes due.
    pub fn pop_due(&self, now: Instant) -> Result<PublishJob, Option<Instant>> {
        let mut guard = self.inner.lock().expect("publish queue lock poisoned");
        let inner = &mut *guard;

        // Promote due retries into their tiers first so priority order holds
        // between fresh and retried work.
        while let Some(Reverse(entry)) = inner.delayed.peek() {
            if entry.at > now {
                break;
            }
            let Reverse(entry) = inner.delayed.pop().expect("peeked entry vanished");
            match entry.job.priority {
                Priority::High => inner.high.push_back(entry.job),
                Priority::Medium => inner.medium.push_back(entry.job),
                Priority::Low => inner.low.push_back(entry.job),
            }
        }

        let job = if let Some(j) = inner.high.pop_front() {
            Some(j)
        } else if let Some(j) = inner.medium.pop_front() {
            Some(j)
        } else {
            inner.low.pop_front()
        };
        match job {
            Some(job) => {
                inner
                    .tracking
                    .insert(job.id, job.record(JobStatus::InFlight));
                Ok(job)
            }
            None => Err(inner.delayed.peek().map(|Reverse(e)| e.at)),
        }
    }

    /// Record a terminal (or in-flight) status for operator queries.
    pub fn track(&self, job: &PublishJob, status: JobStatus) {
        let mut inner = self.inner.lock().expect("publish queue lock poisoned");
        inner.tracking.insert(job.id, job.record(status));
    }

    /// O(1) last-known state lookup by job id.
    pub fn job_state(&self, id: Uuid) -> Option<JobRecord> {
        let mut inner = self.inner.lock().expect("publish queue lock poisoned");
        inner.tracking.get(&id).cloned()
    }

    /// `(high, medium, low, delayed)` depths for metrics.
    pub fn depths(&self) -> (usize, usize, usize, usize) {
        let inner = self.inner.lock().expect("publish queue lock poisoned");
        (
            inner.high.len(),
            inner.medium.len(),
            inner.low.len(),
            inner.delayed.len(),
        )
    }

    /// Wait until a submit/retry wakes this worker.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
