use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Receiver descriptors — named publishing endpoints referenced by routes
// ---------------------------------------------------------------------------

/// Kind of external system a target delivers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Pagerduty,
    Slack,
    Rootly,
    Webhook,
}

/// Wire format of the rendered payload. Defaults from the target kind;
/// a `webhook` target may override it to mimic another system's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    Pagerduty,
    Slack,
    Rootly,
    Json,
}

impl TargetKind {
    pub fn default_format(self) -> PayloadFormat {
        match self {
            TargetKind::Pagerduty => PayloadFormat::Pagerduty,
            TargetKind::Slack => PayloadFormat::Slack,
            TargetKind::Rootly => PayloadFormat::Rootly,
            TargetKind::Webhook => PayloadFormat::Json,
        }
    }
}

/// Publishing priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

/// One receiver entry under `receivers:`. A receiver is addressed by routes
/// and yields a static publishing target; additional targets may be overlaid
/// at runtime by discovery.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiverConfig {
    /// Unique name, `^[a-z0-9][a-z0-9-]*$`.
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub url: String,
    /// Payload format override; defaults from `type`.
    #[serde(default)]
    pub format: Option<PayloadFormat>,
    /// Extra HTTP headers sent with each delivery.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ReceiverConfig {
    pub fn format(&self) -> PayloadFormat {
        self.format.unwrap_or_else(|| self.kind.default_format())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
