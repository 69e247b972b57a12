use std::collections::HashSet;

use crate::relay::RelayConfig;
use crate::route::RouteConfig;

/// Maximum nesting depth accepted for the routing tree.
pub const MAX_ROUTE_DEPTH: usize = 20;

/// Structural validation of a parsed [`RelayConfig`].
///
/// Only checks that need no compiled artifacts live here: listener syntax,
/// name uniqueness and shape, receiver references, bounds. Matcher and regex
/// compilation errors surface later, when the core compiles the tree.
pub fn validate(config: &RelayConfig) -> anyhow::Result<()> {
    if !config.server.listen.starts_with("tcp://") {
        anyhow::bail!(
            "server.listen must be tcp://host:port, got {:?}",
            config.server.listen
        );
    }
    if config.server.ingest_buffer == 0 {
        anyhow::bail!("server.ingest_buffer must be > 0");
    }

    if config.receivers.is_empty() {
        anyhow::bail!("at least one receiver must be defined");
    }
    let mut names = HashSet::new();
    for r in &config.receivers {
        if !valid_receiver_name(&r.name) {
            anyhow::bail!(
                "receiver name {:?} is invalid (expected ^[a-z0-9][a-z0-9-]*$)",
                r.name
            );
        }
        if !names.insert(r.name.as_str()) {
            anyhow::bail!("duplicate receiver name {:?}", r.name);
        }
        if r.url.is_empty() {
            anyhow::bail!("receiver {:?} has an empty url", r.name);
        }
    }

    if config.route.receiver.is_none() {
        anyhow::bail!("route.receiver is required on the root route");
    }
    if config.route.depth() > MAX_ROUTE_DEPTH {
        anyhow::bail!(
            "route tree depth {} exceeds the maximum of {MAX_ROUTE_DEPTH}",
            config.route.depth()
        );
    }
    validate_route_receivers(&config.route, &names, "route")?;

    if config.queue.workers == 0 {
        anyhow::bail!("queue.workers must be > 0");
    }
    for (tier, cap) in [
        ("high", config.queue.capacity.high),
        ("medium", config.queue.capacity.medium),
        ("low", config.queue.capacity.low),
    ] {
        if cap == 0 {
            anyhow::bail!("queue.capacity.{tier} must be > 0");
        }
    }

    if !(0.0..1.0).contains(&config.retry.jitter) {
        anyhow::bail!("retry.jitter must be in [0, 1), got {}", config.retry.jitter);
    }
    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be > 0");
    }
    if config.retry.base.is_zero() {
        anyhow::bail!("retry.base must be > 0");
    }

    if config.breaker.fail_threshold == 0 || config.breaker.success_threshold == 0 {
        anyhow::bail!("breaker thresholds must be > 0");
    }

    for (what, interval) in [
        ("silence.cleanup.interval", config.silence.cleanup.interval),
        ("inhibition.cleanup.interval", config.inhibition.cleanup.interval),
        ("cache.sweep_interval", config.cache.sweep_interval),
        ("metrics.report_interval", config.metrics.report_interval),
    ] {
        if interval.is_zero() {
            anyhow::bail!("{what} must be > 0");
        }
    }

    config.logging.validate()?;

    Ok(())
}

fn validate_route_receivers(
    node: &RouteConfig,
    receivers: &HashSet<&str>,
    path: &str,
) -> anyhow::Result<()> {
    if let Some(ref name) = node.receiver
        && !receivers.contains(name.as_str())
    {
        anyhow::bail!("{path}: receiver {name:?} is not defined under receivers");
    }
    for (dur, what) in [
        (node.group_wait, "group_wait"),
        (node.group_interval, "group_interval"),
        (node.repeat_interval, "repeat_interval"),
    ] {
        if let Some(d) = dur
            && d.is_zero()
        {
            anyhow::bail!("{path}: {what} must be > 0");
        }
    }
    for (i, child) in node.routes.iter().enumerate() {
        validate_route_receivers(child, receivers, &format!("{path}.routes[{i}]"))?;
    }
    Ok(())
}

/// Receiver and target names follow `^[a-z0-9][a-z0-9-]*$`.
pub fn valid_receiver_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receiver_name_shape() {
        assert!(valid_receiver_name("slack-prod"));
        assert!(valid_receiver_name("0pager"));
        assert!(!valid_receiver_name(""));
        assert!(!valid_receiver_name("-leading"));
        assert!(!valid_receiver_name("Upper"));
        assert!(!valid_receiver_name("under_score"));
    }
}
