mod bootstrap;
mod signal;
mod spawn;
mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use orion_error::StructError;
use orion_error::op_context;
use orion_error::prelude::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ar_config::RelayConfig;
use ar_core::breaker::BreakerRegistry;
use ar_core::cache::AlertCache;
use ar_core::dlq::DlqStore;
use ar_core::inhibit::InhibitionState;
use ar_core::publish::Deliverer;
use ar_core::queue::PublishQueue;
use ar_core::silence::{SilenceOracle, SilenceStore};
use ar_core::target::{SecretStore, TargetTable};

use crate::metrics::RuntimeMetrics;

use crate::deliver::HttpDeliverer;
use crate::error::{RuntimeReason, RuntimeResult};

pub use signal::wait_for_signal;

use bootstrap::build_core;
use spawn::{
    spawn_discovery, spawn_metrics, spawn_pipeline, spawn_publishers, spawn_receiver,
    spawn_sweepers,
};
use types::TaskGroup;

// ---------------------------------------------------------------------------
// Relay — the top-level lifecycle handle
// ---------------------------------------------------------------------------

/// Manages the full lifecycle of the relay: bootstrap, run, graceful
/// shutdown.
///
/// Three cancellation phases drive the drain sequence. The root token stops
/// the ingress side (receiver, discovery, sweepers, metrics); once the
/// receiver has joined, the pipeline token fires so the coordinator drains
/// the ingest channel and flushes; once the pipeline has joined, the
/// publisher token fires and the workers finish their in-flight jobs.
pub struct Relay {
    cancel: CancellationToken,
    pipeline_cancel: CancellationToken,
    publisher_cancel: CancellationToken,
    groups: Vec<TaskGroup>,
    listen_addr: SocketAddr,
    handles: RelayHandles,
}

/// Shared structures the embedding layer (REST handlers, operator tooling,
/// tests) works against. Handles stay valid for the life of the process.
#[derive(Clone)]
pub struct RelayHandles {
    pub cache: Arc<AlertCache>,
    pub oracle: Arc<SilenceOracle>,
    pub silence_store: Arc<dyn SilenceStore>,
    pub inhibit_state: Arc<InhibitionState>,
    pub targets: Arc<TargetTable>,
    pub queue: Arc<PublishQueue>,
    pub breakers: Arc<BreakerRegistry>,
    pub dlq: Arc<dyn DlqStore>,
    pub metrics: Arc<RuntimeMetrics>,
}

impl Relay {
    /// Bootstrap with the production HTTP deliverer and no secret store
    /// (targets come from config receivers alone).
    pub async fn start(config: RelayConfig) -> RuntimeResult<Self> {
        let deliverer = HttpDeliverer::new().map_err(|e| {
            StructError::from(RuntimeReason::Bootstrap).with_detail(format!("http client: {e}"))
        })?;
        Self::start_with(config, Arc::new(deliverer), None).await
    }

    /// Bootstrap with explicit collaborators (tests inject scripted
    /// deliverers and fake secret stores here).
    #[tracing::instrument(name = "relay.start", skip_all, fields(listen = %config.server.listen))]
    pub async fn start_with(
        config: RelayConfig,
        deliverer: Arc<dyn Deliverer>,
        secret_store: Option<Arc<dyn SecretStore>>,
    ) -> RuntimeResult<Self> {
        let mut op = op_context!("relay-bootstrap").with_auto_log();
        op.record("listen", config.server.listen.as_str());

        let cancel = CancellationToken::new();
        let pipeline_cancel = CancellationToken::new();
        let publisher_cancel = CancellationToken::new();

        // Phase 1: compile config into shared artifacts.
        let data = build_core(&config)?;
        ar_info!(
            sys,
            routes = data.tree.len(),
            receivers = config.receivers.len(),
            inhibit_rules = data.inhibit_rules.len(),
            workers = config.queue.workers,
            "relay bootstrap complete"
        );

        let handles = RelayHandles {
            cache: Arc::clone(&data.cache),
            oracle: Arc::clone(&data.oracle),
            silence_store: Arc::clone(&data.silence_store),
            inhibit_state: Arc::clone(&data.inhibit_state),
            targets: Arc::clone(&data.targets),
            queue: Arc::clone(&data.queue),
            breakers: Arc::clone(&data.breakers),
            dlq: Arc::clone(&data.dlq),
            metrics: Arc::clone(&data.metrics),
        };

        let (ingest_tx, ingest_rx) = mpsc::channel(config.server.ingest_buffer);

        // Phase 2: spawn task groups, consumers first.
        let mut groups: Vec<TaskGroup> = Vec::with_capacity(6);
        groups.push(spawn_publishers(
            &config,
            &data,
            deliverer,
            publisher_cancel.child_token(),
        ));
        groups.push(spawn_sweepers(&config, &data, cancel.child_token()));
        if let Some(store) = secret_store.filter(|_| config.discovery.enabled) {
            groups.push(spawn_discovery(&config, &data, store, cancel.child_token()));
        }
        if config.metrics.enabled {
            groups.push(spawn_metrics(&config, &data, cancel.child_token()));
        }
        groups.push(spawn_pipeline(
            &data,
            ingest_rx,
            pipeline_cancel.child_token(),
        ));
        let (listen_addr, receiver_group) =
            spawn_receiver(&config, &data, ingest_tx, cancel.child_token()).await?;
        groups.push(receiver_group);

        op.mark_suc();
        Ok(Self {
            cancel,
            pipeline_cancel,
            publisher_cancel,
            groups,
            listen_addr,
            handles,
        })
    }

    /// The address the ingest listener is bound to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Shared-structure handles for the embedding layer.
    pub fn handles(&self) -> &RelayHandles {
        &self.handles
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        ar_info!(sys, "initiating graceful shutdown");
        self.cancel.cancel();
    }

    /// Clone of the root cancellation token (for signal integration).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Join all task groups after shutdown, in reverse start order, firing
    /// the drain-phase tokens as their upstream groups complete.
    pub async fn wait(mut self) -> RuntimeResult<()> {
        while let Some(group) = self.groups.pop() {
            let name = group.name;
            ar_debug!(sys, task_group = name, "waiting for task group to finish");
            group.wait().await?;
            ar_debug!(sys, task_group = name, "task group finished");

            match name {
                "receiver" => {
                    // No new ingest can arrive; let the pipeline drain the
                    // channel and exit.
                    self.pipeline_cancel.cancel();
                }
                "pipeline" => {
                    // No new jobs can be enqueued; let the workers finish.
                    self.publisher_cancel.cancel();
                }
                _ => {}
            }
        }
        Ok(())
    }
}
