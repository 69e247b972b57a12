use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use ar_core::cache::AlertCache;
use ar_core::inhibit::InhibitionState;
use ar_core::silence::{SilenceOracle, SilenceStore};

use crate::metrics::RuntimeMetrics;

/// Cadence of the silence-oracle snapshot refresh, independent of the much
/// slower expiry sweep.
pub const ORACLE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Background sweepers
// ---------------------------------------------------------------------------

/// Silence maintenance: refresh the oracle snapshot on a short tick and
/// hard-delete long-expired rules on the configured sweep tick.
pub async fn run_silence_sweeper(
    store: Arc<dyn SilenceStore>,
    oracle: Arc<SilenceOracle>,
    sweep_interval: Duration,
    retention: Duration,
    refresh_interval: Duration,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut sweep = tokio::time::interval(sweep_interval);
    let mut refresh = tokio::time::interval(refresh_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = refresh.tick() => {
                match store.active_silences(Utc::now()).await {
                    Ok(active) => oracle.refresh(active),
                    Err(e) => ar_warn!(res, error = %e, "silence snapshot refresh failed"),
                }
            }
            _ = sweep.tick() => {
                let cutoff = Utc::now()
                    - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
                match store.expire_silences(cutoff, true).await {
                    Ok(0) => {}
                    Ok(n) => {
                        metrics.add_silences_expired(n);
                        ar_info!(res, expired = n, "silence sweep removed expired rules");
                    }
                    Err(e) => ar_warn!(res, error = %e, "silence sweep failed"),
                }
            }
        }
    }
    Ok(())
}

/// Inhibition-state maintenance: drop expired records and records whose
/// source alert has left the cache.
pub async fn run_inhibition_sweeper(
    state: Arc<InhibitionState>,
    cache: Arc<AlertCache>,
    interval: Duration,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let report = state
                    .sweep(Utc::now(), |fp| {
                        cache.get(fp).is_some_and(|a| a.is_firing())
                    })
                    .await;
                let dropped = report.expired + report.orphaned;
                if dropped > 0 {
                    metrics.add_inhibitions_swept(dropped);
                    ar_debug!(
                        res,
                        expired = report.expired,
                        orphaned = report.orphaned,
                        "inhibition sweep"
                    );
                }
            }
        }
    }
    Ok(())
}

/// Cache maintenance: remove resolved alerts past their retention window.
pub async fn run_cache_sweeper(
    cache: Arc<AlertCache>,
    interval: Duration,
    retention: Duration,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let cutoff = Utc::now()
                    - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
                let removed = cache.sweep_resolved(cutoff);
                if removed > 0 {
                    metrics.add_cache_swept(removed);
                    ar_debug!(res, removed, "cache sweep removed resolved alerts");
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ar_core::alert::{Alert, labels};
    use ar_core::inhibit::InhibitionRecord;
    use ar_core::matcher::Matcher;
    use ar_core::silence::{MemorySilenceStore, Silence};

    #[tokio::test]
    async fn silence_sweeper_refreshes_oracle_and_expires() {
        let store = Arc::new(MemorySilenceStore::new());
        let oracle = Arc::new(SilenceOracle::new());
        let metrics = Arc::new(RuntimeMetrics::new());
        let cancel = CancellationToken::new();

        let now = Utc::now();
        store
            .create_silence(Silence::new(
                "ops",
                "active",
                now - chrono::Duration::minutes(5),
                now + chrono::Duration::minutes(55),
                vec![Matcher::parse("alertname = Flapping").unwrap()],
            ))
            .await
            .unwrap();
        store
            .create_silence(Silence::new(
                "ops",
                "long gone",
                now - chrono::Duration::days(3),
                now - chrono::Duration::days(2),
                vec![Matcher::parse("alertname = Old").unwrap()],
            ))
            .await
            .unwrap();

        let handle = tokio::spawn(run_silence_sweeper(
            store.clone() as Arc<dyn SilenceStore>,
            Arc::clone(&oracle),
            Duration::from_millis(20),
            Duration::from_secs(24 * 3600),
            Duration::from_millis(10),
            metrics,
            cancel.clone(),
        ));

        tokio::time::timeout(Duration::from_secs(2), async {
            while oracle.rule_count() != 1 || store.len() != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sweeper should refresh the oracle and drop the stale rule");

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn inhibition_sweeper_drops_orphans() {
        let state = Arc::new(InhibitionState::new());
        let cache = Arc::new(AlertCache::new(2));
        let metrics = Arc::new(RuntimeMetrics::new());
        let cancel = CancellationToken::new();

        let source = Alert::firing(labels(&[("alertname", "NodeDown")]), Utc::now());
        cache.put(source.clone()).await;

        state
            .record(InhibitionRecord {
                target_fingerprint: "t-live".into(),
                source_fingerprint: source.fingerprint.clone(),
                rule_name: "r".into(),
                inhibited_at: Utc::now(),
                expires_at: None,
            })
            .await;
        state
            .record(InhibitionRecord {
                target_fingerprint: "t-orphan".into(),
                source_fingerprint: "gone".into(),
                rule_name: "r".into(),
                inhibited_at: Utc::now(),
                expires_at: None,
            })
            .await;

        let handle = tokio::spawn(run_inhibition_sweeper(
            Arc::clone(&state),
            cache,
            Duration::from_millis(10),
            metrics,
            cancel.clone(),
        ));

        tokio::time::timeout(Duration::from_secs(2), async {
            while state.len() != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("orphaned record should be swept");
        assert!(state.is_inhibited("t-live", Utc::now()));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cache_sweeper_removes_stale_resolved() {
        let cache = Arc::new(AlertCache::new(2));
        let metrics = Arc::new(RuntimeMetrics::new());
        let cancel = CancellationToken::new();

        let mut resolved = Alert::firing(labels(&[("alertname", "Old")]), Utc::now());
        resolved.status = ar_core::AlertStatus::Resolved;
        resolved.ends_at = Some(Utc::now() - chrono::Duration::hours(1));
        cache.put(resolved).await;
        cache
            .put(Alert::firing(labels(&[("alertname", "Live")]), Utc::now()))
            .await;

        let handle = tokio::spawn(run_cache_sweeper(
            Arc::clone(&cache),
            Duration::from_millis(10),
            Duration::from_secs(60),
            metrics,
            cancel.clone(),
        ));

        tokio::time::timeout(Duration::from_secs(2), async {
            while cache.len() != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stale resolved alert should be swept");

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
