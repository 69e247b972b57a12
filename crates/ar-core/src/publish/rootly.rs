use serde_json::{Value, json};

use super::GroupSnapshot;

/// Rootly alert-ingestion body (`data.type: alerts` JSON:API envelope).
pub(super) fn format(snapshot: &GroupSnapshot) -> Value {
    let summary = format!(
        "{} [{}]",
        snapshot
            .common_labels
            .get("alertname")
            .map(String::as_str)
            .unwrap_or("alerts"),
        snapshot.status(),
    );

    json!({
        "data": {
            "type": "alerts",
            "attributes": {
                "summary": summary,
                "status": snapshot.status().to_string(),
                "external_id": snapshot.group_key,
                "service": snapshot.receiver,
                "labels": snapshot.common_labels,
                "details": {
                    "firing": snapshot.firing_count(),
                    "resolved": snapshot.resolved_count(),
                    "alerts": snapshot.alerts,
                },
            },
        },
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
