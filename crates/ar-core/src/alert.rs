use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreReason, CoreResult, core_err};
use crate::fingerprint;

/// Label and annotation mapping. A `BTreeMap` keeps iteration order sorted
/// by name, which the fingerprint and group-key derivations rely on.
pub type LabelSet = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// AlertStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Firing => f.write_str("firing"),
            AlertStatus::Resolved => f.write_str("resolved"),
        }
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firing" => Ok(AlertStatus::Firing),
            "resolved" => Ok(AlertStatus::Resolved),
            other => Err(format!("unknown alert status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Alert
// ---------------------------------------------------------------------------

/// A single alert as it flows through the pipeline.
///
/// Identity is the `fingerprint`: a pure function of `labels` (see
/// [`fingerprint::of_labels`]). Two alerts with identical labels are the
/// same alert at different points in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default)]
    pub fingerprint: String,
    pub labels: LabelSet,
    #[serde(default)]
    pub annotations: LabelSet,
    pub status: AlertStatus,
    #[serde(rename = "startsAt")]
    pub starts_at: DateTime<Utc>,
    #[serde(rename = "endsAt", default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(
        rename = "generatorURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub generator_url: Option<String>,
}

impl Alert {
    /// Build a firing alert from labels alone; fingerprint is computed.
    pub fn firing(labels: LabelSet, starts_at: DateTime<Utc>) -> Self {
        let fingerprint = fingerprint::of_labels(&labels);
        Self {
            fingerprint,
            labels,
            annotations: LabelSet::new(),
            status: AlertStatus::Firing,
            starts_at,
            ends_at: None,
            generator_url: None,
        }
    }

    pub fn is_firing(&self) -> bool {
        self.status == AlertStatus::Firing
    }

    pub fn is_resolved(&self) -> bool {
        self.status == AlertStatus::Resolved
    }

    /// Compute the fingerprint from labels when the producer did not supply
    /// one. A supplied fingerprint is trusted as-is (proxied payloads carry
    /// upstream identities).
    pub fn ensure_fingerprint(&mut self) {
        if self.fingerprint.is_empty() {
            self.fingerprint = fingerprint::of_labels(&self.labels);
        }
    }

    /// Structural validation: label names well-formed, resolved alerts carry
    /// an end timestamp no earlier than their start.
    pub fn validate(&self) -> CoreResult<()> {
        if self.labels.is_empty() {
            return Err(core_err(CoreReason::Validation, "alert has no labels"));
        }
        for name in self.labels.keys().chain(self.annotations.keys()) {
            if !valid_label_name(name) {
                return Err(core_err(
                    CoreReason::Validation,
                    format!("invalid label name {name:?}"),
                ));
            }
        }
        if self.is_resolved() {
            match self.ends_at {
                None => {
                    return Err(core_err(
                        CoreReason::Validation,
                        "resolved alert requires endsAt",
                    ));
                }
                Some(end) if end < self.starts_at => {
                    return Err(core_err(
                        CoreReason::Validation,
                        "endsAt precedes startsAt",
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Prometheus label-name shape: `^[a-zA-Z_][a-zA-Z0-9_]*$`.
pub fn valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Convenience constructor for label sets in tests and adapters.
pub fn labels(pairs: &[(&str, &str)]) -> LabelSet {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
