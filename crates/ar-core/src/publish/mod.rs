mod pagerduty;
mod rootly;
mod slack;
mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use ar_config::PayloadFormat;

use crate::alert::{Alert, AlertStatus, LabelSet};
use crate::error::CoreResult;
use crate::group::GroupFire;
use crate::target::PublishingTarget;

// ---------------------------------------------------------------------------
// GroupSnapshot — the unit handed to adapters
// ---------------------------------------------------------------------------

/// Immutable copy of a group at fire time, serializable for the DLQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub receiver: String,
    pub group_key: String,
    pub common_labels: LabelSet,
    pub alerts: Vec<Alert>,
}

impl GroupSnapshot {
    pub fn from_fire(fire: &GroupFire) -> Self {
        Self {
            receiver: fire.receiver.clone(),
            group_key: fire.group_key.clone(),
            common_labels: fire.common_labels.clone(),
            alerts: fire.alerts.clone(),
        }
    }

    /// A group is firing while any member is; all-resolved groups notify
    /// resolution.
    pub fn status(&self) -> AlertStatus {
        if self.alerts.iter().any(Alert::is_firing) {
            AlertStatus::Firing
        } else {
            AlertStatus::Resolved
        }
    }

    pub fn firing_count(&self) -> usize {
        self.alerts.iter().filter(|a| a.is_firing()).count()
    }

    pub fn resolved_count(&self) -> usize {
        self.alerts.len() - self.firing_count()
    }
}

// ---------------------------------------------------------------------------
// WirePayload / delivery contract
// ---------------------------------------------------------------------------

/// A rendered, ready-to-send body.
#[derive(Debug, Clone, PartialEq)]
pub struct WirePayload {
    pub content_type: &'static str,
    pub body: serde_json::Value,
}

/// Delivery verdict, pre-classified by the deliverer:
/// network errors / 5xx / 429 / 408 are transient, other 4xx and TLS
/// validation failures are permanent, anything unrecognizable is unknown
/// (treated as transient under a shorter retry budget).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Transient(String),
    Permanent(String),
    Unknown(String),
}

/// Sends a rendered payload to one target. Implementations own the wire
/// protocol; the queue only sees the classified outcome.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, payload: &WirePayload, target: &PublishingTarget) -> DeliveryOutcome;
}

// ---------------------------------------------------------------------------
// Adapter dispatch
// ---------------------------------------------------------------------------

/// Render `snapshot` in the target's wire format.
///
/// Adapters are pure: the same `(target, snapshot)` pair yields
/// byte-identical output, which keeps retries idempotent and golden tests
/// honest.
pub fn format_payload(
    target: &PublishingTarget,
    snapshot: &GroupSnapshot,
) -> CoreResult<WirePayload> {
    let body = match target.format {
        PayloadFormat::Pagerduty => pagerduty::format(target, snapshot)?,
        PayloadFormat::Slack => slack::format(snapshot),
        PayloadFormat::Rootly => rootly::format(snapshot),
        PayloadFormat::Json => webhook::format(snapshot),
    };
    Ok(WirePayload {
        content_type: "application/json",
        body,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;
    use crate::alert::labels;
    use chrono::{DateTime, Utc};

    pub fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    /// Two-member snapshot with one resolved alert, fixed timestamps.
    pub fn snapshot() -> GroupSnapshot {
        let mut firing = Alert::firing(
            labels(&[
                ("alertname", "HighLoad"),
                ("cluster", "a"),
                ("instance", "n1"),
            ]),
            ts("2026-03-01T10:00:00Z"),
        );
        firing.annotations = labels(&[("summary", "load is high")]);

        let mut resolved = Alert::firing(
            labels(&[
                ("alertname", "HighLoad"),
                ("cluster", "a"),
                ("instance", "n2"),
            ]),
            ts("2026-03-01T09:00:00Z"),
        );
        resolved.status = AlertStatus::Resolved;
        resolved.ends_at = Some(ts("2026-03-01T09:45:00Z"));

        GroupSnapshot {
            receiver: "pagerduty-prod".into(),
            group_key: "alertname=HighLoad,cluster=a".into(),
            common_labels: labels(&[("alertname", "HighLoad"), ("cluster", "a")]),
            alerts: vec![firing, resolved],
        }
    }
}
