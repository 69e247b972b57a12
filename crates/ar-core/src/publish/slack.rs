use std::fmt::Write as _;

use serde_json::{Value, json};

use super::GroupSnapshot;
use crate::alert::AlertStatus;

/// Slack incoming-webhook body: headline text plus one color-coded
/// attachment listing the member alerts.
pub(super) fn format(snapshot: &GroupSnapshot) -> Value {
    let status = snapshot.status();
    let color = match status {
        AlertStatus::Firing => "danger",
        AlertStatus::Resolved => "good",
    };

    let headline = format!(
        "[{}:{}] {} ({})",
        status.to_string().to_uppercase(),
        snapshot.firing_count(),
        snapshot
            .common_labels
            .get("alertname")
            .map(String::as_str)
            .unwrap_or("alerts"),
        snapshot.receiver,
    );

    let mut text = String::new();
    for alert in &snapshot.alerts {
        let _ = write!(text, "• *{}*", alert.status);
        for (name, value) in &alert.labels {
            let _ = write!(text, " {name}={value}");
        }
        if let Some(summary) = alert.annotations.get("summary") {
            let _ = write!(text, " — {summary}");
        }
        text.push('\n');
    }

    json!({
        "text": headline,
        "attachments": [{
            "color": color,
            "mrkdwn_in": ["text"],
            "text": text,
            "footer": snapshot.group_key,
        }],
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::snapshot;
    use super::*;

    #[test]
    fn slack_shape() {
        let body = format(&snapshot());
        assert_eq!(body["text"], "[FIRING:1] HighLoad (pagerduty-prod)");
        let attachment = &body["attachments"][0];
        assert_eq!(attachment["color"], "danger");
        assert_eq!(attachment["footer"], "alertname=HighLoad,cluster=a");
        let text = attachment["text"].as_str().unwrap();
        assert!(text.contains("instance=n1"));
        assert!(text.contains("load is high"));
        assert!(text.contains("*resolved*"));
    }

    #[test]
    fn all_resolved_goes_green() {
        let mut snap = snapshot();
        snap.alerts.remove(0);
        let body = format(&snap);
        assert!(body["text"].as_str().unwrap().starts_with("[RESOLVED:0]"));
        assert_eq!(body["attachments"][0]["color"], "good");
    }
}
