use serde::Deserialize;

use crate::types::HumanDuration;

/// Runtime metrics exporter settings. Disabled by default; the `--metrics`
/// CLI flag force-enables it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Listen address for the plain-text `GET /metrics` endpoint.
    pub listen: String,
    /// Cadence of the one-line summary log.
    pub report_interval: HumanDuration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:9421".to_string(),
            report_interval: std::time::Duration::from_secs(30).into(),
        }
    }
}
