use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use ar_config::DiscoveryConfig;
use ar_core::target::{Secret, SecretEvent, SecretStore, TargetTable, target_from_secret};

use crate::metrics::RuntimeMetrics;

// ---------------------------------------------------------------------------
// TargetDiscovery
// ---------------------------------------------------------------------------

/// Outcome of a manual refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A list ran; count of secrets applied.
    Refreshed(usize),
    /// Inside the rate-limit window: the cached table stands.
    RateLimited,
}

/// Watches the secret store and keeps the target table current.
///
/// One initial list populates the table; afterwards a long-lived watch
/// applies added/modified/deleted events. Watch disruption reconnects with
/// exponential backoff (base → cap); while disconnected the table serves
/// stale. Malformed secrets are logged and skipped without affecting
/// others.
pub struct TargetDiscovery {
    store: Arc<dyn SecretStore>,
    table: Arc<TargetTable>,
    config: DiscoveryConfig,
    metrics: Arc<RuntimeMetrics>,
    last_refresh: Mutex<Option<Instant>>,
}

impl TargetDiscovery {
    pub fn new(
        store: Arc<dyn SecretStore>,
        table: Arc<TargetTable>,
        config: DiscoveryConfig,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            store,
            table,
            config,
            metrics,
            last_refresh: Mutex::new(None),
        }
    }

    #[tracing::instrument(name = "discovery", skip_all)]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let base: Duration = self.config.backoff_base.into();
        let cap: Duration = self.config.backoff_cap.into();

        // Initial list, retried until it lands.
        let mut backoff = base;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.store.list(&self.config.namespace, &self.config.selector) => {
                    match result {
                        Ok(secrets) => {
                            let applied = self.apply_list(&secrets);
                            ar_info!(sys, secrets = secrets.len(), targets = applied, "target discovery primed");
                            break;
                        }
                        Err(e) => {
                            self.metrics.inc_discovery_error();
                            ar_warn!(res, error = %e, retry_ms = backoff.as_millis() as u64, "initial target list failed");
                        }
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(cap);
        }

        // Watch loop with reconnect backoff.
        let mut backoff = base;
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self
                .store
                .watch(&self.config.namespace, &self.config.selector)
                .await
            {
                Ok(mut events) => {
                    backoff = base;
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            event = events.recv() => {
                                match event {
                                    Some(event) => self.apply_event(event),
                                    None => {
                                        ar_warn!(res, "secret watch stream closed, reconnecting");
                                        break;
                                    }
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    self.metrics.inc_discovery_error();
                    ar_warn!(res, error = %e, retry_ms = backoff.as_millis() as u64, "secret watch failed");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(cap);
        }
        Ok(())
    }

    /// One manual list, globally rate-limited to one per
    /// `refresh_min_interval`.
    pub async fn refresh(&self) -> RefreshOutcome {
        let min_gap: Duration = self.config.refresh_min_interval.into();
        {
            let last = self.last_refresh.lock().expect("refresh lock poisoned");
            if let Some(at) = *last
                && at.elapsed() < min_gap
            {
                return RefreshOutcome::RateLimited;
            }
        }
        match self
            .store
            .list(&self.config.namespace, &self.config.selector)
            .await
        {
            Ok(secrets) => {
                let applied = self.apply_list(&secrets);
                *self.last_refresh.lock().expect("refresh lock poisoned") = Some(Instant::now());
                self.metrics.inc_discovery_refresh();
                RefreshOutcome::Refreshed(applied)
            }
            Err(e) => {
                self.metrics.inc_discovery_error();
                ar_warn!(res, error = %e, "manual refresh list failed");
                RefreshOutcome::Refreshed(0)
            }
        }
    }

    fn apply_list(&self, secrets: &[Secret]) -> usize {
        secrets
            .iter()
            .filter(|s| self.apply_secret(s))
            .count()
    }

    fn apply_event(&self, event: SecretEvent) {
        self.metrics.inc_discovery_event();
        match event {
            SecretEvent::Added(secret) | SecretEvent::Modified(secret) => {
                self.apply_secret(&secret);
            }
            SecretEvent::Deleted(name) => {
                if self.table.remove(&name) {
                    ar_info!(res, target = %name, "discovered target removed");
                }
            }
        }
    }

    fn apply_secret(&self, secret: &Secret) -> bool {
        match target_from_secret(secret) {
            Ok(target) => {
                ar_info!(res, target = %target.name, kind = ?target.kind, "discovered target applied");
                self.table.upsert(target);
                true
            }
            Err(e) => {
                self.metrics.inc_discovery_error();
                ar_warn!(res, secret = %secret.name, error = %e, "malformed target secret skipped");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ar_core::error::CoreResult;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tokio::sync::mpsc;

    fn secret(name: &str, url: &str) -> Secret {
        let mut data = BTreeMap::new();
        data.insert("type".to_string(), "webhook".to_string());
        data.insert("url".to_string(), url.to_string());
        Secret {
            name: name.to_string(),
            labels: BTreeMap::new(),
            data,
        }
    }

    struct FakeSecretStore {
        initial: Vec<Secret>,
        /// The receiver handed out by the first `watch()` call.
        pending_rx: Mutex<Option<mpsc::Receiver<SecretEvent>>>,
    }

    impl FakeSecretStore {
        fn with_rx(initial: Vec<Secret>, rx: mpsc::Receiver<SecretEvent>) -> Arc<Self> {
            Arc::new(Self {
                initial,
                pending_rx: Mutex::new(Some(rx)),
            })
        }
    }

    #[async_trait]
    impl SecretStore for FakeSecretStore {
        async fn list(&self, _namespace: &str, _selector: &str) -> CoreResult<Vec<Secret>> {
            Ok(self.initial.clone())
        }

        async fn watch(
            &self,
            _namespace: &str,
            _selector: &str,
        ) -> CoreResult<mpsc::Receiver<SecretEvent>> {
            Ok(self
                .pending_rx
                .lock()
                .unwrap()
                .take()
                .expect("watch called twice"))
        }
    }

    #[tokio::test]
    async fn initial_list_then_watch_events() {
        let (tx, rx) = mpsc::channel(16);
        let store = FakeSecretStore::with_rx(
            vec![
                secret("dyn-a", "https://a.example/hook"),
                secret("bad-one", "not a url"),
            ],
            rx,
        );
        let table = Arc::new(TargetTable::new());
        let metrics = Arc::new(RuntimeMetrics::new());
        let discovery = Arc::new(TargetDiscovery::new(
            store,
            Arc::clone(&table),
            DiscoveryConfig::default(),
            Arc::clone(&metrics),
        ));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&discovery).run(cancel.clone()));

        // Initial list applied; the malformed secret is skipped.
        tokio::time::timeout(Duration::from_secs(2), async {
            while table.get("dyn-a").is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(metrics.discovery_errors(), 1);

        // Added, modified, deleted flow through the watch.
        tx.send(SecretEvent::Added(secret("dyn-b", "https://b.example/hook")))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while table.get("dyn-b").is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(SecretEvent::Modified(secret("dyn-b", "https://b2.example/hook")))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while table.get("dyn-b").unwrap().url != "https://b2.example/hook" {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        tx.send(SecretEvent::Deleted("dyn-a".to_string())).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while table.get("dyn-a").is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn refresh_is_rate_limited() {
        let (_tx, rx) = mpsc::channel(16);
        let store = FakeSecretStore::with_rx(vec![secret("dyn-a", "https://a.example/hook")], rx);
        let table = Arc::new(TargetTable::new());
        let metrics = Arc::new(RuntimeMetrics::new());
        let discovery = TargetDiscovery::new(
            store,
            table,
            DiscoveryConfig::default(),
            metrics,
        );

        assert_eq!(discovery.refresh().await, RefreshOutcome::Refreshed(1));
        assert_eq!(discovery.refresh().await, RefreshOutcome::RateLimited);
    }
}
