use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ar_core::cache::{AlertCache, IngestOutcome};
use ar_core::group::GroupingEngine;
use ar_core::ingest::IngestBatch;
use ar_core::inhibit::{InhibitRule, InhibitionRecord, InhibitionState, find_inhibition};
use ar_core::matcher::RegexCache;
use ar_core::publish::GroupSnapshot;
use ar_core::queue::{PublishJob, PublishQueue};
use ar_core::route::RouteTree;
use ar_core::silence::SilenceOracle;
use ar_core::target::TargetTable;

use crate::metrics::RuntimeMetrics;

// ---------------------------------------------------------------------------
// Pipeline — the per-alert coordinator
// ---------------------------------------------------------------------------

/// Everything the coordinator consults, shared with the rest of the runtime.
/// The route tree and inhibition rules are immutable after bootstrap; the
/// rest are concurrent structures with their own locking.
pub struct PipelineDeps {
    pub tree: Arc<RouteTree>,
    pub regex_cache: Arc<RegexCache>,
    pub cache: Arc<AlertCache>,
    pub oracle: Arc<SilenceOracle>,
    pub inhibit_rules: Arc<Vec<InhibitRule>>,
    pub inhibit_state: Arc<InhibitionState>,
    pub targets: Arc<TargetTable>,
    pub queue: Arc<PublishQueue>,
    pub metrics: Arc<RuntimeMetrics>,
}

/// The coordinator task: owns the grouping engine and serializes the hop
/// sequence per inbound alert — dedup → silence → inhibition → routing →
/// grouping. Group timers fire inside the same loop, so member mutation and
/// emission never race.
///
/// Alerts for one fingerprint are processed in arrival order (the loop is
/// sequential); ordering across fingerprints is not guaranteed.
pub struct Pipeline {
    deps: PipelineDeps,
    engine: GroupingEngine,
    ingest_rx: mpsc::Receiver<IngestBatch>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        deps: PipelineDeps,
        ingest_rx: mpsc::Receiver<IngestBatch>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            deps,
            engine: GroupingEngine::new(),
            ingest_rx,
            cancel,
        }
    }

    /// Run until cancelled. On cancellation the ingest channel is drained
    /// (the receiver has already stopped and dropped its senders), then the
    /// loop exits; pending group timers are discarded — downstream state
    /// re-forms on re-ingest after restart.
    #[tracing::instrument(name = "pipeline", skip_all)]
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            let deadline = self.engine.next_deadline();
            tokio::select! {
                batch = self.ingest_rx.recv() => {
                    match batch {
                        Some(batch) => self.process_batch(batch).await,
                        None => break, // all senders dropped
                    }
                }
                _ = sleep_until_opt(deadline) => {
                    self.fire_due();
                }
                _ = self.cancel.cancelled() => {
                    while let Some(batch) = self.ingest_rx.recv().await {
                        self.process_batch(batch).await;
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    async fn process_batch(&mut self, batch: IngestBatch) {
        for alert in batch.alerts {
            self.process_alert(alert).await;
        }
        // Arrivals may have armed an earlier deadline than the one the
        // select slept on; fire anything already due before sleeping again.
        self.fire_due();
    }

    async fn process_alert(&mut self, alert: ar_core::Alert) {
        let now_utc = Utc::now();
        let (outcome, stored) = self.deps.cache.upsert(alert).await;
        match outcome {
            IngestOutcome::Ignored => {
                self.deps.metrics.inc_ignored();
                return;
            }
            IngestOutcome::Created => self.deps.metrics.inc_created(),
            IngestOutcome::Updated => self.deps.metrics.inc_updated(),
        }

        // A resolving alert stops suppressing its targets.
        if stored.is_resolved() {
            let released = self
                .deps
                .inhibit_state
                .remove_by_source(&stored.fingerprint)
                .await;
            if released > 0 {
                ar_debug!(pipe, fp = %stored.fingerprint, released, "source resolved, inhibitions released");
            }
        }

        if self
            .deps
            .oracle
            .is_silenced(&stored.labels, now_utc, &self.deps.regex_cache)
        {
            self.deps.metrics.inc_silenced();
            ar_debug!(pipe, fp = %stored.fingerprint, "alert silenced");
            return;
        }

        if let Some(hit) = find_inhibition(&self.deps.inhibit_rules, &stored, &self.deps.cache) {
            self.deps
                .inhibit_state
                .record(InhibitionRecord {
                    target_fingerprint: stored.fingerprint.clone(),
                    source_fingerprint: hit.source_fingerprint.clone(),
                    rule_name: hit.rule_name.clone(),
                    inhibited_at: now_utc,
                    expires_at: None,
                })
                .await;
            self.deps.metrics.inc_inhibited();
            ar_debug!(
                pipe,
                fp = %stored.fingerprint,
                source = %hit.source_fingerprint,
                rule = %hit.rule_name,
                "alert inhibited"
            );
            return;
        }

        let matched = self.deps.tree.walk_with_cancel(
            &stored.labels,
            &self.deps.regex_cache,
            &|| self.cancel.is_cancelled(),
        );
        self.deps.metrics.add_route_matches(matched.len());

        let now = Instant::now();
        for idx in matched {
            self.engine.on_alert(&self.deps.tree, idx, &stored, now);
        }
        self.deps.metrics.set_groups(self.engine.group_count());
    }

    fn fire_due(&mut self) {
        let fires = self.engine.due(Instant::now(), &self.deps.tree);
        for fire in fires {
            self.deps.metrics.inc_group_fire();
            let targets = self.deps.targets.targets_for(&fire.receiver);
            if targets.is_empty() {
                ar_warn!(pipe, receiver = %fire.receiver, "group fired but no enabled target serves it");
                continue;
            }
            let snapshot = GroupSnapshot::from_fire(&fire);
            ar_debug!(
                pipe,
                receiver = %fire.receiver,
                group = %fire.group_key,
                alerts = snapshot.alerts.len(),
                targets = targets.len(),
                "group fired"
            );
            for target in targets {
                let job = PublishJob::new(target.priority, Arc::clone(&target), snapshot.clone());
                match self.deps.queue.submit(job) {
                    Ok(()) => self.deps.metrics.inc_queue_submitted(),
                    Err(e) => {
                        self.deps.metrics.inc_queue_dropped();
                        ar_warn!(pub, target = %target.name, error = %e, "job dropped");
                    }
                }
            }
        }
        self.deps.metrics.set_groups(self.engine.group_count());
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
