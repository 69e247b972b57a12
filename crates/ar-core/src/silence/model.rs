use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreReason, CoreResult, core_err};
use crate::matcher::Matcher;

// ---------------------------------------------------------------------------
// SilenceStatus
// ---------------------------------------------------------------------------

/// Persisted status column. Advisory only: the effective status is always
/// derived from the time window, never trusted from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceStatus {
    Pending,
    Active,
    Expired,
}

impl fmt::Display for SilenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SilenceStatus::Pending => f.write_str("pending"),
            SilenceStatus::Active => f.write_str("active"),
            SilenceStatus::Expired => f.write_str("expired"),
        }
    }
}

// ---------------------------------------------------------------------------
// Silence
// ---------------------------------------------------------------------------

/// A time-bounded suppression rule. Any alert fully matching `matchers`
/// while the silence is active is withheld from publishing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Silence {
    pub id: Uuid,
    pub created_by: String,
    pub comment: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Stored JSONB-shaped in the backing table.
    pub matchers: Vec<Matcher>,
    /// Advisory; see [`Silence::status_at`].
    pub status: SilenceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Silence {
    pub fn new(
        created_by: impl Into<String>,
        comment: impl Into<String>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        matchers: Vec<Matcher>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_by: created_by.into(),
            comment: comment.into(),
            starts_at,
            ends_at,
            matchers,
            status: SilenceStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Derive the effective status from the window. `starts_at == now` is
    /// already active; `ends_at == now` is already expired.
    pub fn status_at(&self, now: DateTime<Utc>) -> SilenceStatus {
        if now < self.starts_at {
            SilenceStatus::Pending
        } else if now < self.ends_at {
            SilenceStatus::Active
        } else {
            SilenceStatus::Expired
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == SilenceStatus::Active
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.matchers.is_empty() {
            return Err(core_err(
                CoreReason::Validation,
                "silence requires at least one matcher",
            ));
        }
        if self.ends_at <= self.starts_at {
            return Err(core_err(
                CoreReason::Validation,
                "silence endsAt must be after startsAt",
            ));
        }
        if self.created_by.is_empty() {
            return Err(core_err(CoreReason::Validation, "silence creator required"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
