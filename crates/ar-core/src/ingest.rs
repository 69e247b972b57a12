use chrono::Utc;
use serde_json::Value;

use crate::alert::{Alert, AlertStatus};
use crate::error::{CoreReason, CoreResult, core_err};

// ---------------------------------------------------------------------------
// IngestBatch
// ---------------------------------------------------------------------------

/// A decoded ingest payload: zero or more alerts, plus the receiver hint a
/// proxying envelope may carry.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestBatch {
    pub receiver_hint: Option<String>,
    pub alerts: Vec<Alert>,
}

// ---------------------------------------------------------------------------
// Payload detection
// ---------------------------------------------------------------------------

/// Decode an inbound JSON body by shape inspection:
///
/// - Alertmanager webhook / generic envelope: an object with `alerts`
///   (a `receiver` field, when present, becomes the hint);
/// - Prometheus v2 push: a bare array of alerts;
/// - a single alert object (has `labels`).
///
/// Anything else is a validation error with a reason — the transport layer
/// turns that into its 400. Errors carry the offending field path.
pub fn decode_payload(bytes: &[u8]) -> CoreResult<IngestBatch> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| core_err(CoreReason::Parse, format!("invalid JSON: {e}")))?;

    match value {
        Value::Object(ref obj) if obj.contains_key("alerts") => {
            let receiver_hint = obj
                .get("receiver")
                .and_then(Value::as_str)
                .map(str::to_string);
            let alerts = obj
                .get("alerts")
                .and_then(Value::as_array)
                .ok_or_else(|| core_err(CoreReason::Validation, "alerts: must be an array"))?;
            Ok(IngestBatch {
                receiver_hint,
                alerts: decode_alerts(alerts)?,
            })
        }
        Value::Array(ref alerts) => Ok(IngestBatch {
            receiver_hint: None,
            alerts: decode_alerts(alerts)?,
        }),
        Value::Object(ref obj) if obj.contains_key("labels") => Ok(IngestBatch {
            receiver_hint: None,
            alerts: vec![decode_alert(&value, "")?],
        }),
        _ => Err(core_err(
            CoreReason::Validation,
            "unsupported payload shape: expected {alerts: [...]}, [...] or a single alert",
        )),
    }
}

fn decode_alerts(values: &[Value]) -> CoreResult<Vec<Alert>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| decode_alert(v, &format!("alerts[{i}].")))
        .collect()
}

/// Decode one alert with the lenient producer rules: `startsAt` defaults to
/// now, `status` is inferred from `endsAt` when absent, a supplied
/// fingerprint must be 16 hex chars.
fn decode_alert(value: &Value, path: &str) -> CoreResult<Alert> {
    let obj = value
        .as_object()
        .ok_or_else(|| core_err(CoreReason::Validation, format!("{path}: not an object")))?;

    let labels = match obj.get("labels") {
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            core_err(CoreReason::Validation, format!("{path}labels: {e}"))
        })?,
        None => {
            return Err(core_err(
                CoreReason::Validation,
                format!("{path}labels: required"),
            ));
        }
    };
    let annotations = match obj.get("annotations") {
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            core_err(CoreReason::Validation, format!("{path}annotations: {e}"))
        })?,
        None => Default::default(),
    };
    let starts_at = match obj.get("startsAt") {
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            core_err(CoreReason::Validation, format!("{path}startsAt: {e}"))
        })?,
        None => Utc::now(),
    };
    let ends_at = match obj.get("endsAt") {
        None | Some(Value::Null) => None,
        Some(v) => Some(serde_json::from_value(v.clone()).map_err(|e| {
            core_err(CoreReason::Validation, format!("{path}endsAt: {e}"))
        })?),
    };
    let status = match obj.get("status") {
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
            core_err(CoreReason::Validation, format!("{path}status: {e}"))
        })?,
        // No explicit status: an endsAt in the past means resolved.
        None => match ends_at {
            Some(end) if end <= Utc::now() => AlertStatus::Resolved,
            _ => AlertStatus::Firing,
        },
    };
    let fingerprint = match obj.get("fingerprint") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => {
            if s.len() != 16 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(core_err(
                    CoreReason::Validation,
                    format!("{path}fingerprint: expected 16 hex chars, got {s:?}"),
                ));
            }
            s.to_ascii_lowercase()
        }
        Some(_) => {
            return Err(core_err(
                CoreReason::Validation,
                format!("{path}fingerprint: must be a string"),
            ));
        }
    };
    let generator_url = obj
        .get("generatorURL")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut alert = Alert {
        fingerprint,
        labels,
        annotations,
        status,
        starts_at,
        ends_at,
        generator_url,
    };
    alert.ensure_fingerprint();
    alert
        .validate()
        .map_err(|e| e.with_detail(format!("{path}invalid alert")))?;
    Ok(alert)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
