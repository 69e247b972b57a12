use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::inhibit::InhibitRuleConfig;
use crate::limits::{
    BreakerConfig, CacheConfig, DiscoveryConfig, InhibitionCleanupConfig, QueueConfig,
    RetryConfig, SilenceCleanupConfig,
};
use crate::logging::LoggingConfig;
use crate::metrics::MetricsConfig;
use crate::receiver::ReceiverConfig;
use crate::route::RouteConfig;
use crate::server::ServerConfig;
use crate::validate;

// ---------------------------------------------------------------------------
// Raw YAML structure (intermediate representation)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RelayConfigRaw {
    server: ServerConfig,
    route: RouteConfig,
    receivers: Vec<ReceiverConfig>,
    #[serde(default)]
    inhibit_rules: Vec<InhibitRuleConfig>,
    #[serde(default)]
    queue: QueueConfig,
    #[serde(default)]
    retry: RetryConfig,
    #[serde(default)]
    breaker: BreakerConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    silence: SilenceSection,
    #[serde(default)]
    inhibition: InhibitionSection,
    #[serde(default)]
    discovery: DiscoveryConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SilenceSection {
    pub cleanup: SilenceCleanupConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InhibitionSection {
    pub cleanup: InhibitionCleanupConfig,
}

// ---------------------------------------------------------------------------
// RelayConfig (parsed, validated)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub route: RouteConfig,
    pub receivers: Vec<ReceiverConfig>,
    pub inhibit_rules: Vec<InhibitRuleConfig>,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    pub silence: SilenceSection,
    pub inhibition: InhibitionSection,
    pub discovery: DiscoveryConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl RelayConfig {
    /// Read and parse a `relay.yaml` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }
}

impl FromStr for RelayConfig {
    type Err = anyhow::Error;

    /// Parse a YAML string into a validated [`RelayConfig`].
    fn from_str(yaml: &str) -> anyhow::Result<Self> {
        let raw: RelayConfigRaw = serde_yaml::from_str(yaml)?;

        let config = RelayConfig {
            server: raw.server,
            route: raw.route,
            receivers: raw.receivers,
            inhibit_rules: raw.inhibit_rules,
            queue: raw.queue,
            retry: raw.retry,
            breaker: raw.breaker,
            cache: raw.cache,
            silence: raw.silence,
            inhibition: raw.inhibition,
            discovery: raw.discovery,
            logging: raw.logging,
            metrics: raw.metrics,
        };

        validate::validate(&config)?;

        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::{Priority, TargetKind};
    use std::time::Duration;

    const FULL_YAML: &str = r#"
server:
  listen: tcp://127.0.0.1:9830

route:
  receiver: slack-prod
  group_by: [alertname, cluster]
  group_wait: 30s
  group_interval: 5m
  repeat_interval: 4h
  routes:
    - matchers: ["severity = critical"]
      receiver: pagerduty-prod
      continue: true

receivers:
  - name: slack-prod
    type: slack
    url: https://hooks.slack.com/services/T0/B0/x
  - name: pagerduty-prod
    type: pagerduty
    url: https://events.pagerduty.com/v2/enqueue
    priority: high

inhibit_rules:
  - source_match:
      alertname: NodeDown
    target_match:
      alertname: InstanceDown
    equal: [cluster]

queue:
  workers: 4
  capacity:
    high: 64
    medium: 64
    low: 64

retry:
  base: 100ms
  cap: 5s
  max_attempts: 5

breaker:
  fail_threshold: 5
  success_threshold: 2
  cooldown: 30s

silence:
  cleanup:
    interval: 1h
    retention: 24h

inhibition:
  cleanup:
    interval: 1m
"#;

    #[test]
    fn load_full_yaml() {
        let cfg: RelayConfig = FULL_YAML.parse().unwrap();

        assert_eq!(cfg.server.listen, "tcp://127.0.0.1:9830");
        assert_eq!(cfg.server.ingest_buffer, 256);

        assert_eq!(cfg.route.receiver.as_deref(), Some("slack-prod"));
        assert_eq!(cfg.route.routes.len(), 1);

        assert_eq!(cfg.receivers.len(), 2);
        assert_eq!(cfg.receivers[0].kind, TargetKind::Slack);
        assert_eq!(cfg.receivers[1].priority, Priority::High);

        assert_eq!(cfg.inhibit_rules.len(), 1);

        assert_eq!(cfg.queue.workers, 4);
        assert_eq!(cfg.queue.capacity.low, 64);
        assert_eq!(cfg.retry.cap.as_duration(), Duration::from_secs(5));
        assert_eq!(cfg.breaker.fail_threshold, 5);
        assert_eq!(
            cfg.silence.cleanup.retention.as_duration(),
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(
            cfg.inhibition.cleanup.interval.as_duration(),
            Duration::from_secs(60)
        );

        // omitted sections take defaults
        assert!(!cfg.discovery.enabled);
        assert!(!cfg.metrics.enabled);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn reject_unknown_receiver_reference() {
        let yaml = FULL_YAML.replace("receiver: pagerduty-prod", "receiver: nonexistent");
        let err = yaml.parse::<RelayConfig>().unwrap_err();
        assert!(err.to_string().contains("nonexistent"), "{err}");
    }

    #[test]
    fn reject_invalid_listen() {
        let yaml = FULL_YAML.replace("tcp://127.0.0.1:9830", "http://bad");
        assert!(yaml.parse::<RelayConfig>().is_err());
    }

    #[test]
    fn reject_duplicate_receiver() {
        let yaml = FULL_YAML.replace("name: pagerduty-prod", "name: slack-prod");
        assert!(yaml.parse::<RelayConfig>().is_err());
    }

    #[test]
    fn reject_zero_workers() {
        let yaml = FULL_YAML.replace("workers: 4", "workers: 0");
        assert!(yaml.parse::<RelayConfig>().is_err());
    }

    #[test]
    fn reject_missing_root_receiver() {
        let yaml = FULL_YAML.replace("  receiver: slack-prod\n", "");
        assert!(yaml.parse::<RelayConfig>().is_err());
    }

    #[test]
    fn reject_zero_group_wait() {
        let yaml = FULL_YAML.replace("group_wait: 30s", "group_wait: 0s");
        assert!(yaml.parse::<RelayConfig>().is_err());
    }

    #[test]
    fn reject_unknown_log_domain() {
        let yaml = format!("{FULL_YAML}\nlogging:\n  domains:\n    engine: debug\n");
        let err = yaml.parse::<RelayConfig>().unwrap_err();
        assert!(err.to_string().contains("engine"), "{err}");
    }
}
