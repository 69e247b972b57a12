use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use wildmatch::WildMatch;

use ar_config::{PayloadFormat, Priority, ReceiverConfig, TargetKind, valid_receiver_name};

use crate::error::{CoreReason, CoreResult, core_err};

// ---------------------------------------------------------------------------
// PublishingTarget
// ---------------------------------------------------------------------------

/// One deliverable endpoint. Static targets come from config receivers;
/// dynamic ones are discovered from the secret store and overlay by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishingTarget {
    /// Unique, `^[a-z0-9][a-z0-9-]*$`.
    pub name: String,
    pub kind: TargetKind,
    pub url: String,
    pub enabled: bool,
    pub format: PayloadFormat,
    pub headers: BTreeMap<String, String>,
    /// Optional receiver-name pattern (`*` wildcards); a discovered target
    /// with a filter serves every receiver the pattern matches in addition
    /// to its own name.
    pub filter: Option<String>,
    pub priority: Priority,
}

impl PublishingTarget {
    pub fn from_receiver(cfg: &ReceiverConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            kind: cfg.kind,
            url: cfg.url.clone(),
            enabled: cfg.enabled,
            format: cfg.format(),
            headers: cfg.headers.clone(),
            filter: None,
            priority: cfg.priority,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !valid_receiver_name(&self.name) {
            return Err(core_err(
                CoreReason::Validation,
                format!("target name {:?} is invalid", self.name),
            ));
        }
        url::Url::parse(&self.url).map_err(|e| {
            core_err(
                CoreReason::Validation,
                format!("target {:?} url {:?}: {e}", self.name, self.url),
            )
        })?;
        Ok(())
    }

    /// Does this target serve `receiver`?
    pub fn serves(&self, receiver: &str) -> bool {
        if !self.enabled {
            return false;
        }
        if self.name == receiver {
            return true;
        }
        self.filter
            .as_deref()
            .is_some_and(|pattern| WildMatch::new(pattern).matches(receiver))
    }
}

// ---------------------------------------------------------------------------
// Secret-store contract
// ---------------------------------------------------------------------------

/// A decoded secret (Kubernetes Secrets shape: string data under a name,
/// selected by labels).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Secret {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SecretEvent {
    Added(Secret),
    Modified(Secret),
    Deleted(String),
}

/// Watchable secret source. `watch` yields a stream of events; a closed
/// channel means the watch dropped and the caller reconnects with backoff.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn list(&self, namespace: &str, selector: &str) -> CoreResult<Vec<Secret>>;
    async fn watch(
        &self,
        namespace: &str,
        selector: &str,
    ) -> CoreResult<mpsc::Receiver<SecretEvent>>;
}

/// Parse a secret into a target. Keys: `type` and `url` required; `format`,
/// `priority`, `enabled`, `filter` and `headers` (a JSON object) optional.
/// The secret name is the target name.
pub fn target_from_secret(secret: &Secret) -> CoreResult<PublishingTarget> {
    let field = |key: &str| -> CoreResult<&String> {
        secret.data.get(key).ok_or_else(|| {
            core_err(
                CoreReason::Validation,
                format!("secret {:?}: missing data key {key:?}", secret.name),
            )
        })
    };

    let kind = match field("type")?.as_str() {
        "pagerduty" => TargetKind::Pagerduty,
        "slack" => TargetKind::Slack,
        "rootly" => TargetKind::Rootly,
        "webhook" => TargetKind::Webhook,
        other => {
            return Err(core_err(
                CoreReason::Validation,
                format!("secret {:?}: unknown target type {other:?}", secret.name),
            ));
        }
    };
    let format = match secret.data.get("format").map(String::as_str) {
        None => kind.default_format(),
        Some("pagerduty") => PayloadFormat::Pagerduty,
        Some("slack") => PayloadFormat::Slack,
        Some("rootly") => PayloadFormat::Rootly,
        Some("json") => PayloadFormat::Json,
        Some(other) => {
            return Err(core_err(
                CoreReason::Validation,
                format!("secret {:?}: unknown format {other:?}", secret.name),
            ));
        }
    };
    let priority = match secret.data.get("priority").map(String::as_str) {
        None => Priority::default(),
        Some("high") => Priority::High,
        Some("medium") => Priority::Medium,
        Some("low") => Priority::Low,
        Some(other) => {
            return Err(core_err(
                CoreReason::Validation,
                format!("secret {:?}: unknown priority {other:?}", secret.name),
            ));
        }
    };
    let enabled = match secret.data.get("enabled").map(String::as_str) {
        None => true,
        Some("true") => true,
        Some("false") => false,
        Some(other) => {
            return Err(core_err(
                CoreReason::Validation,
                format!("secret {:?}: enabled must be true/false, got {other:?}", secret.name),
            ));
        }
    };
    let headers: BTreeMap<String, String> = match secret.data.get("headers") {
        None => BTreeMap::new(),
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            core_err(
                CoreReason::Validation,
                format!("secret {:?}: headers is not a JSON object: {e}", secret.name),
            )
        })?,
    };

    let target = PublishingTarget {
        name: secret.name.clone(),
        kind,
        url: field("url")?.clone(),
        enabled,
        format,
        headers,
        filter: secret.data.get("filter").cloned(),
        priority,
    };
    target.validate()?;
    Ok(target)
}

// ---------------------------------------------------------------------------
// TargetTable
// ---------------------------------------------------------------------------

/// Live routing table of targets. Entries are `Arc`-swapped whole, never
/// mutated in place; removal is a table-level drop, leaving captured `Arc`s
/// in in-flight jobs intact.
pub struct TargetTable {
    inner: RwLock<HashMap<String, Arc<PublishingTarget>>>,
}

impl TargetTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_receivers(receivers: &[ReceiverConfig]) -> Self {
        let table = Self::new();
        for r in receivers {
            table.upsert(PublishingTarget::from_receiver(r));
        }
        table
    }

    pub fn upsert(&self, target: PublishingTarget) {
        let mut inner = self.inner.write().expect("target table lock poisoned");
        inner.insert(target.name.clone(), Arc::new(target));
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut inner = self.inner.write().expect("target table lock poisoned");
        inner.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<PublishingTarget>> {
        self.inner
            .read()
            .expect("target table lock poisoned")
            .get(name)
            .cloned()
    }

    /// Enabled targets serving the given receiver, name-sorted for
    /// deterministic fan-out order.
    pub fn targets_for(&self, receiver: &str) -> Vec<Arc<PublishingTarget>> {
        let inner = self.inner.read().expect("target table lock poisoned");
        let mut out: Vec<Arc<PublishingTarget>> = inner
            .values()
            .filter(|t| t.serves(receiver))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("target table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TargetTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
