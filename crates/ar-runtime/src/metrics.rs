use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use ar_config::MetricsConfig;
use ar_core::breaker::{BreakerRegistry, BreakerState};
use ar_core::cache::AlertCache;
use ar_core::queue::PublishQueue;
use ar_core::target::TargetTable;

// ---------------------------------------------------------------------------
// RuntimeMetrics
// ---------------------------------------------------------------------------

/// Shared runtime metrics store.
///
/// Counters are lock-free atomics; gauges that track live structures
/// (queue depths, cache size, targets, breaker states) are read from those
/// structures at render time instead of being maintained redundantly.
#[derive(Default)]
pub struct RuntimeMetrics {
    ingest_frames_total: AtomicU64,
    ingest_alerts_total: AtomicU64,
    ingest_decode_errors_total: AtomicU64,
    ingest_read_errors_total: AtomicU64,
    ingest_connections_total: AtomicU64,

    alerts_created_total: AtomicU64,
    alerts_updated_total: AtomicU64,
    alerts_ignored_total: AtomicU64,
    silence_hits_total: AtomicU64,
    inhibit_hits_total: AtomicU64,
    route_matches_total: AtomicU64,
    group_fires_total: AtomicU64,
    groups: AtomicU64,

    queue_submitted_total: AtomicU64,
    queue_dropped_total: AtomicU64,

    publish_success_total: AtomicU64,
    publish_transient_total: AtomicU64,
    publish_permanent_total: AtomicU64,
    breaker_denied_total: AtomicU64,
    dead_lettered_total: AtomicU64,

    discovery_events_total: AtomicU64,
    discovery_errors_total: AtomicU64,
    discovery_refreshes_total: AtomicU64,

    silences_expired_total: AtomicU64,
    inhibitions_swept_total: AtomicU64,
    cache_swept_total: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $get:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(inc_ingest_frame, ingest_frames, ingest_frames_total);
    counter!(inc_decode_error, decode_errors, ingest_decode_errors_total);
    counter!(inc_read_error, read_errors, ingest_read_errors_total);
    counter!(inc_connection, connections, ingest_connections_total);
    counter!(inc_created, created, alerts_created_total);
    counter!(inc_updated, updated, alerts_updated_total);
    counter!(inc_ignored, ignored, alerts_ignored_total);
    counter!(inc_silenced, silenced, silence_hits_total);
    counter!(inc_inhibited, inhibited, inhibit_hits_total);
    counter!(inc_group_fire, group_fires, group_fires_total);
    counter!(inc_queue_submitted, queue_submitted, queue_submitted_total);
    counter!(inc_queue_dropped, queue_dropped, queue_dropped_total);
    counter!(inc_publish_success, publish_success, publish_success_total);
    counter!(inc_publish_transient, publish_transient, publish_transient_total);
    counter!(inc_publish_permanent, publish_permanent, publish_permanent_total);
    counter!(inc_breaker_denied, breaker_denied, breaker_denied_total);
    counter!(inc_dead_lettered, dead_lettered, dead_lettered_total);
    counter!(inc_discovery_event, discovery_events, discovery_events_total);
    counter!(inc_discovery_error, discovery_errors, discovery_errors_total);
    counter!(inc_discovery_refresh, discovery_refreshes, discovery_refreshes_total);

    pub fn add_ingest_alerts(&self, count: usize) {
        self.ingest_alerts_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn ingest_alerts(&self) -> u64 {
        self.ingest_alerts_total.load(Ordering::Relaxed)
    }

    pub fn add_route_matches(&self, count: usize) {
        self.route_matches_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn route_matches(&self) -> u64 {
        self.route_matches_total.load(Ordering::Relaxed)
    }

    pub fn set_groups(&self, count: usize) {
        self.groups.store(count as u64, Ordering::Relaxed);
    }

    pub fn add_silences_expired(&self, count: usize) {
        self.silences_expired_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_inhibitions_swept(&self, count: usize) {
        self.inhibitions_swept_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn add_cache_swept(&self, count: usize) {
        self.cache_swept_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    fn render_prometheus(&self, ctx: &MetricsContext) -> String {
        let mut out = String::with_capacity(8 * 1024);

        let counters: &[(&str, u64)] = &[
            ("ar_ingest_frames_total", self.ingest_frames()),
            ("ar_ingest_alerts_total", self.ingest_alerts()),
            ("ar_ingest_decode_errors_total", self.decode_errors()),
            ("ar_ingest_read_errors_total", self.read_errors()),
            ("ar_ingest_connections_total", self.connections()),
            ("ar_alerts_created_total", self.created()),
            ("ar_alerts_updated_total", self.updated()),
            ("ar_alerts_ignored_total", self.ignored()),
            ("ar_silence_hits_total", self.silenced()),
            ("ar_inhibit_hits_total", self.inhibited()),
            ("ar_route_matches_total", self.route_matches()),
            ("ar_group_fires_total", self.group_fires()),
            ("ar_queue_submitted_total", self.queue_submitted()),
            ("ar_queue_dropped_total", self.queue_dropped()),
            ("ar_publish_success_total", self.publish_success()),
            ("ar_publish_transient_total", self.publish_transient()),
            ("ar_publish_permanent_total", self.publish_permanent()),
            ("ar_breaker_denied_total", self.breaker_denied()),
            ("ar_dead_lettered_total", self.dead_lettered()),
            ("ar_discovery_events_total", self.discovery_events()),
            ("ar_discovery_errors_total", self.discovery_errors()),
            ("ar_discovery_refreshes_total", self.discovery_refreshes()),
            (
                "ar_silences_expired_total",
                self.silences_expired_total.load(Ordering::Relaxed),
            ),
            (
                "ar_inhibitions_swept_total",
                self.inhibitions_swept_total.load(Ordering::Relaxed),
            ),
            (
                "ar_cache_swept_total",
                self.cache_swept_total.load(Ordering::Relaxed),
            ),
        ];
        for (name, value) in counters {
            render_counter(&mut out, name, *value);
        }

        let (high, medium, low, delayed) = ctx.queue.depths();
        render_gauge_labeled(&mut out, "ar_queue_depth", &[("tier", "high")], high as u64);
        render_gauge_labeled(&mut out, "ar_queue_depth", &[("tier", "medium")], medium as u64);
        render_gauge_labeled(&mut out, "ar_queue_depth", &[("tier", "low")], low as u64);
        render_gauge_labeled(&mut out, "ar_queue_depth", &[("tier", "delayed")], delayed as u64);

        render_gauge(&mut out, "ar_alerts_live", ctx.cache.len() as u64);
        render_gauge(&mut out, "ar_groups", self.groups.load(Ordering::Relaxed));
        render_gauge(&mut out, "ar_targets", ctx.targets.len() as u64);

        for (target, state) in ctx.breakers.states() {
            let value = match state {
                BreakerState::Closed => 0,
                BreakerState::Open => 1,
                BreakerState::HalfOpen => 2,
            };
            render_gauge_labeled(&mut out, "ar_breaker_state", &[("target", target.as_str())], value);
        }

        out
    }

    fn summary_line(&self, ctx: &MetricsContext) -> String {
        let (high, medium, low, delayed) = ctx.queue.depths();
        format!(
            "alerts={} created={} ignored={} silenced={} inhibited={} fires={} \
             published={} dlq={} queue={}/{}/{}+{} live={}",
            self.ingest_alerts(),
            self.created(),
            self.ignored(),
            self.silenced(),
            self.inhibited(),
            self.group_fires(),
            self.publish_success(),
            self.dead_lettered(),
            high,
            medium,
            low,
            delayed,
            ctx.cache.len(),
        )
    }
}

fn render_counter(out: &mut String, name: &str, value: u64) {
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn render_gauge(out: &mut String, name: &str, value: u64) {
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

fn render_gauge_labeled(out: &mut String, name: &str, labels: &[(&str, &str)], value: u64) {
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name}{} {value}", format_labels(labels));
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    let mut out = String::from("{");
    for (idx, (key, value)) in labels.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(key);
        out.push('=');
        out.push('"');
        for ch in value.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                _ => out.push(ch),
            }
        }
        out.push('"');
    }
    out.push('}');
    out
}

// ---------------------------------------------------------------------------
// Exporter task
// ---------------------------------------------------------------------------

/// Live structures sampled at render time.
pub struct MetricsContext {
    pub queue: Arc<PublishQueue>,
    pub cache: Arc<AlertCache>,
    pub targets: Arc<TargetTable>,
    pub breakers: Arc<BreakerRegistry>,
}

/// Serve `GET /metrics` in Prometheus text format on a raw TCP listener and
/// log a one-line summary every `report_interval`.
pub async fn run_metrics_task(
    metrics: Arc<RuntimeMetrics>,
    config: MetricsConfig,
    ctx: MetricsContext,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.listen).await?;
    ar_info!(
        sys,
        listen = %config.listen,
        interval = %config.report_interval,
        "metrics exporter started"
    );

    let mut tick = tokio::time::interval(config.report_interval.as_duration());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                ar_info!(res, summary = %metrics.summary_line(&ctx), "metrics snapshot");
            }
            result = listener.accept() => {
                let (mut stream, _) = result?;
                let body = metrics.render_prometheus(&ctx);
                let mut req_buf = [0u8; 512];
                let req_n = stream.read(&mut req_buf).await.unwrap_or(0);
                let is_metrics = req_n > 0
                    && std::str::from_utf8(&req_buf[..req_n])
                        .unwrap_or("")
                        .starts_with("GET /metrics");
                if is_metrics {
                    let header = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    stream.write_all(header.as_bytes()).await?;
                    stream.write_all(body.as_bytes()).await?;
                } else {
                    stream
                        .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await?;
                }
                stream.shutdown().await?;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
