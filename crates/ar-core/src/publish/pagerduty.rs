use serde_json::{Value, json};

use super::GroupSnapshot;
use crate::alert::AlertStatus;
use crate::error::{CoreReason, CoreResult, core_err};
use crate::target::PublishingTarget;

/// Target header carrying the PagerDuty integration routing key.
pub const ROUTING_KEY_HEADER: &str = "x-routing-key";

/// PagerDuty Events API v2 body. The group key doubles as `dedup_key`, so
/// repeats and retries collapse into one incident.
pub(super) fn format(target: &PublishingTarget, snapshot: &GroupSnapshot) -> CoreResult<Value> {
    let routing_key = target.headers.get(ROUTING_KEY_HEADER).ok_or_else(|| {
        core_err(
            CoreReason::Permanent,
            format!("pagerduty target {:?} lacks {ROUTING_KEY_HEADER}", target.name),
        )
    })?;

    let event_action = match snapshot.status() {
        AlertStatus::Firing => "trigger",
        AlertStatus::Resolved => "resolve",
    };
    let severity = snapshot
        .common_labels
        .get("severity")
        .map(String::as_str)
        .unwrap_or("error");

    let summary = format!(
        "[{}:{}] {} on {}",
        snapshot.status().to_string().to_uppercase(),
        snapshot.firing_count(),
        snapshot
            .common_labels
            .get("alertname")
            .map(String::as_str)
            .unwrap_or("alerts"),
        snapshot
            .common_labels
            .get("cluster")
            .map(String::as_str)
            .unwrap_or(snapshot.receiver.as_str()),
    );

    Ok(json!({
        "routing_key": routing_key,
        "event_action": event_action,
        "dedup_key": snapshot.group_key,
        "payload": {
            "summary": summary,
            "source": snapshot.receiver,
            "severity": severity,
            "custom_details": {
                "group_key": snapshot.group_key,
                "common_labels": snapshot.common_labels,
                "alerts": snapshot.alerts,
            },
        },
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::snapshot;
    use super::*;
    use ar_config::{PayloadFormat, Priority, TargetKind};
    use std::collections::BTreeMap;

    fn target(with_key: bool) -> PublishingTarget {
        let mut headers = BTreeMap::new();
        if with_key {
            headers.insert(ROUTING_KEY_HEADER.to_string(), "pd-key-123".to_string());
        }
        PublishingTarget {
            name: "pagerduty-prod".into(),
            kind: TargetKind::Pagerduty,
            url: "https://events.pagerduty.com/v2/enqueue".into(),
            enabled: true,
            format: PayloadFormat::Pagerduty,
            headers,
            filter: None,
            priority: Priority::High,
        }
    }

    #[test]
    fn pagerduty_shape() {
        let body = format(&target(true), &snapshot()).unwrap();
        assert_eq!(body["routing_key"], "pd-key-123");
        assert_eq!(body["event_action"], "trigger");
        assert_eq!(body["dedup_key"], "alertname=HighLoad,cluster=a");
        assert_eq!(body["payload"]["summary"], "[FIRING:1] HighLoad on a");
        assert_eq!(body["payload"]["severity"], "error");
        assert_eq!(
            body["payload"]["custom_details"]["alerts"]
                .as_array()
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn resolved_group_resolves_incident() {
        let mut snap = snapshot();
        snap.alerts.remove(0);
        let body = format(&target(true), &snap).unwrap();
        assert_eq!(body["event_action"], "resolve");
    }

    #[test]
    fn missing_routing_key_is_permanent() {
        let err = format(&target(false), &snapshot()).unwrap_err();
        assert!(err.to_string().contains(ROUTING_KEY_HEADER), "{err}");
    }
}
