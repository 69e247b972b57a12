use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ar_config::Priority;
use ar_core::breaker::{BreakerDecision, BreakerRegistry};
use ar_core::dlq::DlqStore;
use ar_core::error::CoreResult;
use ar_core::publish::{Deliverer, DeliveryOutcome, format_payload};
use ar_core::queue::{ErrorClass, JobStatus, PublishJob, PublishQueue, RetryPolicy};
use ar_core::target::TargetTable;

use crate::metrics::RuntimeMetrics;

// ---------------------------------------------------------------------------
// Publisher workers
// ---------------------------------------------------------------------------

/// Shared dependencies of the worker pool.
#[derive(Clone)]
pub struct PublisherDeps {
    pub queue: Arc<PublishQueue>,
    pub breakers: Arc<BreakerRegistry>,
    pub deliverer: Arc<dyn Deliverer>,
    pub dlq: Arc<dyn DlqStore>,
    pub policy: RetryPolicy,
    pub metrics: Arc<RuntimeMetrics>,
}

/// One worker of the pool: drain the queue with strict priority, consult the
/// per-target breaker, deliver, classify, and retry or dead-letter.
///
/// Cancellation is observed between jobs; an in-flight delivery finishes
/// first, so a worker never abandons a job half-processed.
pub async fn run_worker(
    worker_id: usize,
    deps: PublisherDeps,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    ar_debug!(sys, worker_id, "publish worker started");
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match deps.queue.pop_due(Instant::now()) {
            Ok(job) => process_job(&deps, job).await,
            Err(next_due) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = deps.queue.notified() => {}
                    _ = sleep_until_opt(next_due) => {}
                }
            }
        }
    }
    ar_debug!(sys, worker_id, "publish worker stopped");
    Ok(())
}

async fn process_job(deps: &PublisherDeps, job: PublishJob) {
    let breaker = deps.breakers.get(&job.target.name);
    let now = Instant::now();

    // An open breaker fast-fails without consuming an attempt; the job
    // parks until the cooldown would admit a probe.
    if let BreakerDecision::Deny { retry_after } = breaker.try_acquire(now) {
        deps.metrics.inc_breaker_denied();
        let delay = retry_after
            .unwrap_or_else(|| deps.policy.delay(job.attempts, &mut rand::thread_rng()));
        ar_debug!(
            pub,
            target = %job.target.name,
            job = %job.id,
            delay_ms = delay.as_millis() as u64,
            "breaker open, delivery deferred"
        );
        deps.queue.schedule_retry(job, now + delay);
        return;
    }

    let payload = match format_payload(&job.target, &job.snapshot) {
        Ok(p) => p,
        Err(e) => {
            // A payload the adapter cannot render will never deliver; the
            // target itself is not at fault, so the breaker is untouched.
            dead_letter(deps, job, &format!("format: {e}")).await;
            return;
        }
    };

    match deps.deliverer.deliver(&payload, &job.target).await {
        DeliveryOutcome::Delivered => {
            breaker.record_success();
            deps.metrics.inc_publish_success();
            deps.queue.track(&job, JobStatus::Succeeded);
            if job.replayed
                && let Err(e) = deps.dlq.record_replay_result(job.id, true).await
            {
                ar_warn!(pub, job = %job.id, error = %e, "replay bookkeeping failed");
            }
            ar_debug!(pub, target = %job.target.name, job = %job.id, "delivered");
        }
        DeliveryOutcome::Transient(reason) => {
            breaker.record_failure(now);
            deps.metrics.inc_publish_transient();
            retry_or_bury(deps, job, ErrorClass::Transient, reason).await;
        }
        DeliveryOutcome::Unknown(reason) => {
            breaker.record_failure(now);
            deps.metrics.inc_publish_transient();
            retry_or_bury(deps, job, ErrorClass::Unknown, reason).await;
        }
        DeliveryOutcome::Permanent(reason) => {
            breaker.record_failure(now);
            deps.metrics.inc_publish_permanent();
            dead_letter(deps, job, &reason).await;
        }
    }
}

async fn retry_or_bury(deps: &PublisherDeps, mut job: PublishJob, class: ErrorClass, reason: String) {
    job.attempts += 1;
    if job.attempts >= deps.policy.budget(class) {
        dead_letter(deps, job, &reason).await;
        return;
    }
    let delay = deps
        .policy
        .delay(job.attempts - 1, &mut rand::thread_rng());
    ar_debug!(
        pub,
        target = %job.target.name,
        job = %job.id,
        attempt = job.attempts,
        delay_ms = delay.as_millis() as u64,
        reason = %reason,
        "delivery failed, retry scheduled"
    );
    deps.queue.schedule_retry(job, Instant::now() + delay);
}

async fn dead_letter(deps: &PublisherDeps, job: PublishJob, reason: &str) {
    deps.queue.track(&job, JobStatus::DeadLettered);
    deps.metrics.inc_dead_lettered();
    ar_warn!(
        pub,
        target = %job.target.name,
        job = %job.id,
        attempts = job.attempts,
        reason = %reason,
        "job dead-lettered"
    );
    if let Err(e) = deps.dlq.append(&job, reason).await {
        ar_error!(pub, job = %job.id, error = %e, "dead-letter append failed");
    }
}

// ---------------------------------------------------------------------------
// DLQ replay
// ---------------------------------------------------------------------------

/// Re-enqueue dead-lettered jobs. The attempt counter carries over, so a
/// replay resumes the budget under the current retry config rather than
/// restarting it; `tier` overrides the target's own priority when given.
pub async fn replay_dlq(
    queue: &PublishQueue,
    dlq: &dyn DlqStore,
    targets: &TargetTable,
    ids: &[Uuid],
    tier: Option<Priority>,
) -> CoreResult<usize> {
    let entries = dlq.mark_replayed(ids).await?;
    let mut enqueued = 0;
    for entry in entries {
        let Some(target) = targets.get(&entry.target) else {
            ar_warn!(pub, target = %entry.target, job = %entry.job_id, "replay target no longer exists");
            continue;
        };
        let job = PublishJob {
            id: entry.job_id,
            priority: tier.unwrap_or(target.priority),
            target,
            snapshot: entry.payload.clone(),
            attempts: entry.attempt_count,
            created_at: entry.first_seen,
            replayed: true,
        };
        match queue.submit(job) {
            Ok(()) => enqueued += 1,
            Err(e) => {
                ar_warn!(pub, job = %entry.job_id, error = %e, "replay submit rejected");
            }
        }
    }
    Ok(enqueued)
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
