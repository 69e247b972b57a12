//! End-to-end scenarios: a full relay (TCP ingest → pipeline → queue →
//! workers) with a scripted in-memory deliverer standing in for the wire.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use ar_config::{Priority, RelayConfig};
use ar_core::breaker::BreakerState;
use ar_core::dlq::{DlqFilter, DlqStatus};
use ar_core::matcher::Matcher;
use ar_core::publish::{Deliverer, DeliveryOutcome, WirePayload};
use ar_core::silence::{Silence, SilenceStore};
use ar_core::target::PublishingTarget;
use ar_runtime::lifecycle::Relay;
use ar_runtime::publisher::replay_dlq;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Deliverer with per-target scripted outcomes; unscripted calls deliver.
#[derive(Default)]
struct MockDeliverer {
    scripts: Mutex<HashMap<String, VecDeque<DeliveryOutcome>>>,
    deliveries: Mutex<Vec<(String, serde_json::Value)>>,
}

impl MockDeliverer {
    fn script(&self, target: &str, outcomes: Vec<DeliveryOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(target.to_string(), outcomes.into());
    }

    fn deliveries(&self) -> Vec<(String, serde_json::Value)> {
        self.deliveries.lock().unwrap().clone()
    }

    fn deliveries_for(&self, target: &str) -> Vec<serde_json::Value> {
        self.deliveries()
            .into_iter()
            .filter(|(t, _)| t == target)
            .map(|(_, body)| body)
            .collect()
    }
}

#[async_trait]
impl Deliverer for MockDeliverer {
    async fn deliver(&self, payload: &WirePayload, target: &PublishingTarget) -> DeliveryOutcome {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&target.name)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(outcome) => outcome,
            None => {
                self.deliveries
                    .lock()
                    .unwrap()
                    .push((target.name.clone(), payload.body.clone()));
                DeliveryOutcome::Delivered
            }
        }
    }
}

async fn start_relay(yaml: &str) -> (Relay, Arc<MockDeliverer>) {
    let config: RelayConfig = yaml.parse().expect("test config must parse");
    let deliverer = Arc::new(MockDeliverer::default());
    let relay = Relay::start_with(config, deliverer.clone(), None)
        .await
        .expect("relay must start");
    (relay, deliverer)
}

async fn send_frames(addr: SocketAddr, bodies: &[serde_json::Value]) {
    let mut conn = TcpStream::connect(addr).await.unwrap();
    for body in bodies {
        let payload = serde_json::to_vec(body).unwrap();
        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        conn.write_all(&frame).await.unwrap();
    }
    conn.flush().await.unwrap();
    // Keep the socket open long enough for the frames to be read.
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn alert(pairs: &[(&str, &str)]) -> serde_json::Value {
    let labels: serde_json::Map<String, serde_json::Value> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect();
    serde_json::json!({"labels": labels, "status": "firing"})
}

fn resolved(pairs: &[(&str, &str)]) -> serde_json::Value {
    let mut body = alert(pairs);
    body["status"] = "resolved".into();
    body["endsAt"] = serde_json::json!(Utc::now());
    body
}

fn batch(alerts: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({"alerts": alerts})
}

/// Poll until `cond` holds or the timeout elapses; panics with `what` on
/// timeout.
async fn wait_until(timeout: Duration, what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn alertnames(body: &serde_json::Value) -> Vec<String> {
    body["alerts"]
        .as_array()
        .unwrap_or(&Vec::new())
        .iter()
        .map(|a| a["labels"]["alertname"].as_str().unwrap_or("").to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Scenario: silencing path
// ---------------------------------------------------------------------------

const SILENCE_CONFIG: &str = r#"
server:
  listen: tcp://127.0.0.1:0
route:
  receiver: slack-prod
  group_wait: 100ms
  group_interval: 300ms
  repeat_interval: 1h
receivers:
  - name: slack-prod
    type: webhook
    url: https://hooks.example/slack
"#;

#[tokio::test]
async fn silenced_alert_is_cached_but_never_published() {
    let (relay, deliverer) = start_relay(SILENCE_CONFIG).await;
    let handles = relay.handles().clone();

    // Active silence on alertname=Flapping, installed the way the CRUD
    // surface would: create, then refresh the oracle snapshot.
    handles
        .silence_store
        .create_silence(Silence::new(
            "ops",
            "noisy deploy",
            Utc::now() - chrono::Duration::minutes(1),
            Utc::now() + chrono::Duration::minutes(59),
            vec![Matcher::parse("alertname = Flapping").unwrap()],
        ))
        .await
        .unwrap();
    let active = handles.silence_store.active_silences(Utc::now()).await.unwrap();
    handles.oracle.refresh(active);

    send_frames(
        relay.listen_addr(),
        &[batch(vec![alert(&[
            ("alertname", "Flapping"),
            ("severity", "warning"),
        ])])],
    )
    .await;

    wait_until(Duration::from_secs(2), "silence hit", || {
        handles.metrics.silenced() == 1
    })
    .await;

    // The alert is live in the cache regardless.
    let fp = ar_core::fingerprint::of_labels(&ar_core::alert::labels(&[
        ("alertname", "Flapping"),
        ("severity", "warning"),
    ]));
    assert!(handles.cache.get(&fp).is_some());

    // And nothing reaches the target, even after the group_wait horizon.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(deliverer.deliveries().is_empty());
    assert_eq!(handles.metrics.queue_submitted(), 0);

    relay.shutdown();
    relay.wait().await.unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: inhibition path
// ---------------------------------------------------------------------------

const INHIBIT_CONFIG: &str = r#"
server:
  listen: tcp://127.0.0.1:0
route:
  receiver: hook
  group_by: [alertname]
  group_wait: 100ms
  group_interval: 300ms
  repeat_interval: 1h
receivers:
  - name: hook
    type: webhook
    url: https://hooks.example/all
inhibit_rules:
  - source_match:
      alertname: NodeDown
      severity: critical
    target_match:
      alertname: InstanceDown
    equal: [cluster]
"#;

#[tokio::test]
async fn inhibited_target_is_suppressed_until_source_resolves() {
    let (relay, deliverer) = start_relay(INHIBIT_CONFIG).await;
    let handles = relay.handles().clone();
    let addr = relay.listen_addr();

    let source = &[
        ("alertname", "NodeDown"),
        ("severity", "critical"),
        ("cluster", "a"),
    ];
    let target = &[
        ("alertname", "InstanceDown"),
        ("cluster", "a"),
        ("instance", "n1"),
    ];

    send_frames(addr, &[batch(vec![alert(source)])]).await;
    wait_until(Duration::from_secs(2), "source cached", || {
        handles.metrics.created() == 1
    })
    .await;

    send_frames(addr, &[batch(vec![alert(target)])]).await;
    wait_until(Duration::from_secs(2), "inhibition hit", || {
        handles.metrics.inhibited() == 1
    })
    .await;

    // A state record links target to source; the target never publishes.
    let target_fp = ar_core::fingerprint::of_labels(&ar_core::alert::labels(target));
    let source_fp = ar_core::fingerprint::of_labels(&ar_core::alert::labels(source));
    let records = handles.inhibit_state.records_for(&target_fp);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source_fingerprint, source_fp);

    tokio::time::sleep(Duration::from_millis(400)).await;
    for (_, body) in deliverer.deliveries() {
        assert!(
            !alertnames(&body).contains(&"InstanceDown".to_string()),
            "inhibited target must not publish"
        );
    }

    // Source resolves: the state record is released…
    send_frames(addr, &[batch(vec![resolved(source)])]).await;
    wait_until(Duration::from_secs(2), "inhibition release", || {
        handles.inhibit_state.records_for(&target_fp).is_empty()
    })
    .await;

    // …and the next matching target ingest goes through.
    let second_target = &[
        ("alertname", "InstanceDown"),
        ("cluster", "a"),
        ("instance", "n2"),
    ];
    send_frames(addr, &[batch(vec![alert(second_target)])]).await;
    wait_until(Duration::from_secs(3), "uninhibited publish", || {
        deliverer
            .deliveries()
            .iter()
            .any(|(_, body)| alertnames(body).contains(&"InstanceDown".to_string()))
    })
    .await;
    assert_eq!(handles.metrics.inhibited(), 1, "no second inhibition");

    relay.shutdown();
    relay.wait().await.unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: grouping and timers
// ---------------------------------------------------------------------------

const GROUPING_CONFIG: &str = r#"
server:
  listen: tcp://127.0.0.1:0
route:
  receiver: pagerduty-prod
  group_by: [alertname, cluster]
  group_wait: 150ms
  group_interval: 600ms
  repeat_interval: 1h
receivers:
  - name: pagerduty-prod
    type: webhook
    url: https://events.example/enqueue
"#;

#[tokio::test]
async fn group_wait_batches_then_interval_emits_delta() {
    let (relay, deliverer) = start_relay(GROUPING_CONFIG).await;
    let addr = relay.listen_addr();

    // A and B arrive inside the same group_wait window.
    send_frames(
        addr,
        &[
            batch(vec![alert(&[
                ("alertname", "HighLoad"),
                ("cluster", "a"),
                ("instance", "n1"),
            ])]),
            batch(vec![alert(&[
                ("alertname", "HighLoad"),
                ("cluster", "a"),
                ("instance", "n2"),
            ])]),
        ],
    )
    .await;

    wait_until(Duration::from_secs(3), "first group notification", || {
        !deliverer.deliveries_for("pagerduty-prod").is_empty()
    })
    .await;
    let first = deliverer.deliveries_for("pagerduty-prod");
    assert_eq!(first.len(), 1, "one batched notification, not two");
    assert_eq!(first[0]["alerts"].as_array().unwrap().len(), 2);

    // C joins the existing group: no immediate publish, the delta arrives
    // with the next group_interval tick.
    send_frames(
        addr,
        &[batch(vec![alert(&[
            ("alertname", "HighLoad"),
            ("cluster", "a"),
            ("instance", "n3"),
        ])])],
    )
    .await;
    assert_eq!(deliverer.deliveries_for("pagerduty-prod").len(), 1);

    wait_until(Duration::from_secs(3), "delta notification", || {
        deliverer.deliveries_for("pagerduty-prod").len() == 2
    })
    .await;
    let second = &deliverer.deliveries_for("pagerduty-prod")[1];
    assert_eq!(second["alerts"].as_array().unwrap().len(), 3);

    // Unchanged group: nothing further before the repeat horizon.
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(deliverer.deliveries_for("pagerduty-prod").len(), 2);

    relay.shutdown();
    relay.wait().await.unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: dedup no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_ingest_is_a_no_op() {
    let (relay, deliverer) = start_relay(GROUPING_CONFIG).await;
    let handles = relay.handles().clone();
    let addr = relay.listen_addr();

    let body = batch(vec![serde_json::json!({
        "labels": {"alertname": "HighLoad", "cluster": "a"},
        "status": "firing",
        "startsAt": "2026-03-01T10:00:00Z"
    })]);
    send_frames(addr, &[body.clone()]).await;
    send_frames(addr, &[body]).await;

    wait_until(Duration::from_secs(2), "duplicate counted", || {
        handles.metrics.ignored() == 1
    })
    .await;
    assert_eq!(handles.metrics.created(), 1);
    assert_eq!(handles.cache.len(), 1);

    wait_until(Duration::from_secs(3), "single notification", || {
        !deliverer.deliveries().is_empty()
    })
    .await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let deliveries = deliverer.deliveries();
    assert_eq!(deliveries.len(), 1, "no second publish job");
    assert_eq!(deliveries[0].1["alerts"].as_array().unwrap().len(), 1);

    relay.shutdown();
    relay.wait().await.unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: route `continue`
// ---------------------------------------------------------------------------

const CONTINUE_CONFIG: &str = r#"
server:
  listen: tcp://127.0.0.1:0
route:
  receiver: default-hook
  group_by: [alertname]
  group_wait: 100ms
  group_interval: 300ms
  repeat_interval: 1h
  routes:
    - matchers: ["severity = critical"]
      receiver: slack-hook
      continue: true
    - matchers: ["team = platform"]
      receiver: pagerduty-hook
receivers:
  - name: default-hook
    type: webhook
    url: https://hooks.example/default
  - name: slack-hook
    type: webhook
    url: https://hooks.example/slack
  - name: pagerduty-hook
    type: webhook
    url: https://hooks.example/pagerduty
"#;

#[tokio::test]
async fn continue_routes_fan_out_to_both_receivers() {
    let (relay, deliverer) = start_relay(CONTINUE_CONFIG).await;
    let addr = relay.listen_addr();

    send_frames(
        addr,
        &[batch(vec![
            alert(&[("alertname", "Both"), ("severity", "critical"), ("team", "platform")]),
            alert(&[("alertname", "CritOnly"), ("severity", "critical"), ("team", "other")]),
            alert(&[("alertname", "TeamOnly"), ("severity", "warning"), ("team", "platform")]),
        ])],
    )
    .await;

    wait_until(Duration::from_secs(3), "all four notifications", || {
        deliverer.deliveries().len() == 4
    })
    .await;

    let slack: Vec<String> = deliverer
        .deliveries_for("slack-hook")
        .iter()
        .flat_map(alertnames)
        .collect();
    let pagerduty: Vec<String> = deliverer
        .deliveries_for("pagerduty-hook")
        .iter()
        .flat_map(alertnames)
        .collect();

    assert!(slack.contains(&"Both".to_string()));
    assert!(slack.contains(&"CritOnly".to_string()));
    assert!(!slack.contains(&"TeamOnly".to_string()));

    assert!(pagerduty.contains(&"Both".to_string()));
    assert!(pagerduty.contains(&"TeamOnly".to_string()));
    assert!(!pagerduty.contains(&"CritOnly".to_string()));

    assert!(deliverer.deliveries_for("default-hook").is_empty());

    relay.shutdown();
    relay.wait().await.unwrap();
}

// ---------------------------------------------------------------------------
// Scenario: retry, breaker, DLQ, replay
// ---------------------------------------------------------------------------

const RETRY_CONFIG: &str = r#"
server:
  listen: tcp://127.0.0.1:0
route:
  receiver: flaky
  group_wait: 50ms
  group_interval: 300ms
  repeat_interval: 1h
receivers:
  - name: flaky
    type: webhook
    url: https://flaky.example/hook
queue:
  workers: 2
retry:
  base: 20ms
  cap: 100ms
  jitter: 0.0
  max_attempts: 2
breaker:
  fail_threshold: 2
  success_threshold: 1
  cooldown: 300ms
"#;

#[tokio::test]
async fn exhausted_retries_dead_letter_then_replay_respects_breaker() {
    let (relay, deliverer) = start_relay(RETRY_CONFIG).await;
    let handles = relay.handles().clone();

    deliverer.script(
        "flaky",
        vec![
            DeliveryOutcome::Transient("HTTP 503".into()),
            DeliveryOutcome::Transient("HTTP 503".into()),
        ],
    );

    send_frames(
        relay.listen_addr(),
        &[batch(vec![alert(&[("alertname", "Doomed")])])],
    )
    .await;

    // Two transient failures exhaust max_attempts=2 and trip the breaker.
    wait_until(Duration::from_secs(3), "dead-letter", || {
        handles.metrics.dead_lettered() == 1
    })
    .await;
    let rows = handles.dlq.list(&DlqFilter::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, DlqStatus::Dead);
    assert_eq!(rows[0].attempt_count, 2);
    assert_eq!(rows[0].last_error, "HTTP 503");
    assert_eq!(handles.breakers.get("flaky").state(), BreakerState::Open);

    // Replay at high priority. The breaker is still open, so the first
    // attempt defers until the cooldown admits a half-open probe, which the
    // (now recovered) target answers.
    let replayed = replay_dlq(
        &handles.queue,
        handles.dlq.as_ref(),
        &handles.targets,
        &[rows[0].job_id],
        Some(Priority::High),
    )
    .await
    .unwrap();
    assert_eq!(replayed, 1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let rows = handles.dlq.list(&DlqFilter::default()).await.unwrap();
        if rows
            .first()
            .is_some_and(|r| r.status == DlqStatus::ReplayedSucceeded)
        {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for replay success");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(handles.metrics.breaker_denied() >= 1, "replay hit the open breaker");
    assert_eq!(handles.breakers.get("flaky").state(), BreakerState::Closed);
    assert_eq!(deliverer.deliveries_for("flaky").len(), 1);

    relay.shutdown();
    relay.wait().await.unwrap();
}
