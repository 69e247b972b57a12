use std::sync::Arc;

use orion_error::compat_prelude::*;
use orion_error::prelude::*;
use orion_error::StructError;
use tokio::task::JoinHandle;

use ar_core::breaker::BreakerRegistry;
use ar_core::cache::AlertCache;
use ar_core::dlq::DlqStore;
use ar_core::inhibit::{InhibitRule, InhibitionState};
use ar_core::matcher::RegexCache;
use ar_core::queue::PublishQueue;
use ar_core::route::RouteTree;
use ar_core::silence::{SilenceOracle, SilenceStore};
use ar_core::target::TargetTable;

use crate::error::{RuntimeReason, RuntimeResult};
use crate::metrics::RuntimeMetrics;

// ---------------------------------------------------------------------------
// TaskGroup — named collection of async tasks for ordered shutdown
// ---------------------------------------------------------------------------

/// A named group of async tasks that are shut down together.
///
/// Groups are assembled in *start order* and joined in *reverse order*
/// (LIFO) during shutdown:
///
///   start:  publisher → sweeper → discovery → metrics → pipeline → receiver
///   join:   receiver → pipeline → metrics → discovery → sweeper → publisher
///
/// Upstream producers exit before downstream consumers, so the pipeline can
/// drain every in-flight alert and the workers every queued job before the
/// relay stops.
pub(crate) struct TaskGroup {
    pub(super) name: &'static str,
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
}

impl TaskGroup {
    pub(super) fn new(name: &'static str) -> Self {
        Self {
            name,
            handles: Vec::new(),
        }
    }

    pub(super) fn push(&mut self, handle: JoinHandle<anyhow::Result<()>>) {
        self.handles.push(handle);
    }

    /// Join all tasks in this group, returning the first error.
    pub(super) async fn wait(self) -> RuntimeResult<()> {
        for handle in self.handles {
            handle
                .await
                .map_err(|e| {
                    StructError::from(RuntimeReason::Shutdown)
                        .with_detail(format!("task join error: {e}"))
                })?
                .owe(RuntimeReason::Shutdown)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BootstrapData — compiled artifacts from the config-loading phase
// ---------------------------------------------------------------------------

/// Everything the spawn phase wires into tasks, built once from config.
pub(crate) struct BootstrapData {
    pub regex_cache: Arc<RegexCache>,
    pub tree: Arc<RouteTree>,
    pub inhibit_rules: Arc<Vec<InhibitRule>>,
    pub inhibit_state: Arc<InhibitionState>,
    pub cache: Arc<AlertCache>,
    pub oracle: Arc<SilenceOracle>,
    pub silence_store: Arc<dyn SilenceStore>,
    pub targets: Arc<TargetTable>,
    pub queue: Arc<PublishQueue>,
    pub breakers: Arc<BreakerRegistry>,
    pub dlq: Arc<dyn DlqStore>,
    pub metrics: Arc<RuntimeMetrics>,
}

impl std::fmt::Debug for BootstrapData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapData").finish_non_exhaustive()
    }
}
