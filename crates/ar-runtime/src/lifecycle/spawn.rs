use std::net::SocketAddr;
use std::sync::Arc;

use orion_error::StructError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ar_config::RelayConfig;
use ar_core::ingest::IngestBatch;
use ar_core::publish::Deliverer;
use ar_core::queue::RetryPolicy;
use ar_core::target::SecretStore;

use super::types::{BootstrapData, TaskGroup};
use crate::discovery::TargetDiscovery;
use crate::error::{RuntimeReason, RuntimeResult};
use crate::metrics::{MetricsContext, run_metrics_task};
use crate::pipeline::{Pipeline, PipelineDeps};
use crate::publisher::{PublisherDeps, run_worker};
use crate::receiver::Receiver;
use crate::sweeper::{
    ORACLE_REFRESH_INTERVAL, run_cache_sweeper, run_inhibition_sweeper, run_silence_sweeper,
};

pub(super) fn spawn_publishers(
    config: &RelayConfig,
    data: &BootstrapData,
    deliverer: Arc<dyn Deliverer>,
    cancel: CancellationToken,
) -> TaskGroup {
    let mut group = TaskGroup::new("publisher");
    let deps = PublisherDeps {
        queue: Arc::clone(&data.queue),
        breakers: Arc::clone(&data.breakers),
        deliverer,
        dlq: Arc::clone(&data.dlq),
        policy: RetryPolicy::from(&config.retry),
        metrics: Arc::clone(&data.metrics),
    };
    for worker_id in 0..config.queue.workers {
        group.push(tokio::spawn(run_worker(
            worker_id,
            deps.clone(),
            cancel.clone(),
        )));
    }
    group
}

pub(super) fn spawn_sweepers(
    config: &RelayConfig,
    data: &BootstrapData,
    cancel: CancellationToken,
) -> TaskGroup {
    let mut group = TaskGroup::new("sweeper");
    group.push(tokio::spawn(run_silence_sweeper(
        Arc::clone(&data.silence_store),
        Arc::clone(&data.oracle),
        config.silence.cleanup.interval.into(),
        config.silence.cleanup.retention.into(),
        ORACLE_REFRESH_INTERVAL,
        Arc::clone(&data.metrics),
        cancel.clone(),
    )));
    group.push(tokio::spawn(run_inhibition_sweeper(
        Arc::clone(&data.inhibit_state),
        Arc::clone(&data.cache),
        config.inhibition.cleanup.interval.into(),
        Arc::clone(&data.metrics),
        cancel.clone(),
    )));
    group.push(tokio::spawn(run_cache_sweeper(
        Arc::clone(&data.cache),
        config.cache.sweep_interval.into(),
        config.cache.resolved_retention.into(),
        Arc::clone(&data.metrics),
        cancel,
    )));
    group
}

pub(super) fn spawn_discovery(
    config: &RelayConfig,
    data: &BootstrapData,
    secret_store: Arc<dyn SecretStore>,
    cancel: CancellationToken,
) -> TaskGroup {
    let mut group = TaskGroup::new("discovery");
    let discovery = Arc::new(TargetDiscovery::new(
        secret_store,
        Arc::clone(&data.targets),
        config.discovery.clone(),
        Arc::clone(&data.metrics),
    ));
    group.push(tokio::spawn(discovery.run(cancel)));
    group
}

pub(super) fn spawn_metrics(
    config: &RelayConfig,
    data: &BootstrapData,
    cancel: CancellationToken,
) -> TaskGroup {
    let mut group = TaskGroup::new("metrics");
    let ctx = MetricsContext {
        queue: Arc::clone(&data.queue),
        cache: Arc::clone(&data.cache),
        targets: Arc::clone(&data.targets),
        breakers: Arc::clone(&data.breakers),
    };
    group.push(tokio::spawn(run_metrics_task(
        Arc::clone(&data.metrics),
        config.metrics.clone(),
        ctx,
        cancel,
    )));
    group
}

pub(super) fn spawn_pipeline(
    data: &BootstrapData,
    ingest_rx: mpsc::Receiver<IngestBatch>,
    cancel: CancellationToken,
) -> TaskGroup {
    let mut group = TaskGroup::new("pipeline");
    let deps = PipelineDeps {
        tree: Arc::clone(&data.tree),
        regex_cache: Arc::clone(&data.regex_cache),
        cache: Arc::clone(&data.cache),
        oracle: Arc::clone(&data.oracle),
        inhibit_rules: Arc::clone(&data.inhibit_rules),
        inhibit_state: Arc::clone(&data.inhibit_state),
        targets: Arc::clone(&data.targets),
        queue: Arc::clone(&data.queue),
        metrics: Arc::clone(&data.metrics),
    };
    group.push(tokio::spawn(Pipeline::new(deps, ingest_rx, cancel).run()));
    group
}

pub(super) async fn spawn_receiver(
    config: &RelayConfig,
    data: &BootstrapData,
    ingest_tx: mpsc::Sender<IngestBatch>,
    cancel: CancellationToken,
) -> RuntimeResult<(SocketAddr, TaskGroup)> {
    let receiver = Receiver::bind(
        &config.server.listen,
        ingest_tx,
        Arc::clone(&data.metrics),
        cancel,
    )
    .await
    .map_err(|e| {
        StructError::from(RuntimeReason::Bootstrap)
            .with_detail(format!("bind {}: {e}", config.server.listen))
    })?;
    let listen_addr = receiver.local_addr().map_err(|e| {
        StructError::from(RuntimeReason::Bootstrap).with_detail(format!("local addr: {e}"))
    })?;

    let mut group = TaskGroup::new("receiver");
    group.push(tokio::spawn(receiver.run()));
    Ok((listen_addr, group))
}
