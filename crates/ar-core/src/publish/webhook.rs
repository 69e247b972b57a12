use serde_json::{Value, json};

use super::GroupSnapshot;

/// Alertmanager-compatible webhook body (`version: "4"`), so generic
/// receivers written against upstream keep working unchanged.
pub(super) fn format(snapshot: &GroupSnapshot) -> Value {
    json!({
        "version": "4",
        "groupKey": snapshot.group_key,
        "receiver": snapshot.receiver,
        "status": snapshot.status().to_string(),
        "groupLabels": snapshot.common_labels,
        "commonLabels": snapshot.common_labels,
        "alerts": snapshot.alerts,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
