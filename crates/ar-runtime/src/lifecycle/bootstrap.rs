use std::collections::HashSet;
use std::sync::Arc;

use orion_error::compat_prelude::*;
use orion_error::prelude::*;

use ar_config::RelayConfig;
use ar_core::breaker::BreakerRegistry;
use ar_core::cache::AlertCache;
use ar_core::dlq::MemoryDlqStore;
use ar_core::inhibit::{InhibitionState, compile_rules};
use ar_core::matcher::RegexCache;
use ar_core::queue::PublishQueue;
use ar_core::route::RouteTree;
use ar_core::silence::{MemorySilenceStore, SilenceOracle};
use ar_core::target::{PublishingTarget, TargetTable};

use super::types::BootstrapData;
use crate::error::{RuntimeReason, RuntimeResult};
use crate::metrics::RuntimeMetrics;

/// Compile config into the shared immutable artifacts and live structures.
///
/// Every regex in routes and inhibition rules lands in the shared
/// [`RegexCache`] here, so match time never compiles. The silence and
/// dead-letter repositories default to their in-memory implementations; a
/// SQL-backed deployment swaps them behind the same traits.
pub(super) fn build_core(config: &RelayConfig) -> RuntimeResult<BootstrapData> {
    let regex_cache = Arc::new(RegexCache::default());

    let receiver_names: HashSet<String> =
        config.receivers.iter().map(|r| r.name.clone()).collect();
    let tree = RouteTree::build(&config.route, &receiver_names, &regex_cache)
        .owe(RuntimeReason::Bootstrap)?;

    let inhibit_rules =
        compile_rules(&config.inhibit_rules, &regex_cache).owe(RuntimeReason::Bootstrap)?;

    for receiver in &config.receivers {
        PublishingTarget::from_receiver(receiver)
            .validate()
            .owe(RuntimeReason::Bootstrap)?;
    }
    let targets = Arc::new(TargetTable::from_receivers(&config.receivers));

    Ok(BootstrapData {
        regex_cache,
        tree: Arc::new(tree),
        inhibit_rules: Arc::new(inhibit_rules),
        inhibit_state: Arc::new(InhibitionState::new()),
        cache: Arc::new(AlertCache::new(config.cache.shards)),
        oracle: Arc::new(SilenceOracle::new()),
        silence_store: Arc::new(MemorySilenceStore::new()),
        targets,
        queue: Arc::new(PublishQueue::new(
            config.queue.capacity.clone(),
            config.queue.tracking,
        )),
        breakers: Arc::new(BreakerRegistry::new(config.breaker)),
        dlq: Arc::new(MemoryDlqStore::new()),
        metrics: Arc::new(RuntimeMetrics::new()),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
