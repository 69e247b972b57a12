use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::{Silence, SilenceStatus};
use crate::error::CoreResult;

/// Hard cap on `limit` for list queries; larger values are clamped.
pub const MAX_LIST_LIMIT: usize = 1000;

/// Default page size when the caller leaves `limit` at zero.
const DEFAULT_LIST_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// SilenceFilter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SilenceOrder {
    #[default]
    CreatedAt,
    StartsAt,
    EndsAt,
    UpdatedAt,
}

/// List-query filter. All predicates are conjunctive; unset fields do not
/// constrain. The matcher name/value pair filters on the stored matcher
/// list (JSONB containment in the SQL implementation).
#[derive(Debug, Clone, Default)]
pub struct SilenceFilter {
    pub statuses: Vec<SilenceStatus>,
    pub created_by: Option<String>,
    pub matcher_name: Option<String>,
    pub matcher_value: Option<String>,
    pub starts_after: Option<DateTime<Utc>>,
    pub starts_before: Option<DateTime<Utc>>,
    pub ends_after: Option<DateTime<Utc>>,
    pub ends_before: Option<DateTime<Utc>>,
    /// 0 means the default page size; values above [`MAX_LIST_LIMIT`] clamp.
    pub limit: usize,
    pub offset: usize,
    pub order_by: SilenceOrder,
    pub descending: bool,
}

impl SilenceFilter {
    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            self.limit.min(MAX_LIST_LIMIT)
        }
    }

    /// Status predicates compare against the *derived* status at `now`.
    pub fn accepts(&self, silence: &Silence, now: DateTime<Utc>) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&silence.status_at(now)) {
            return false;
        }
        if let Some(ref creator) = self.created_by
            && silence.created_by != *creator
        {
            return false;
        }
        if let Some(ref name) = self.matcher_name
            && !silence.matchers.iter().any(|m| m.name == *name)
        {
            return false;
        }
        if let Some(ref value) = self.matcher_value
            && !silence.matchers.iter().any(|m| m.value == *value)
        {
            return false;
        }
        if let Some(t) = self.starts_after
            && silence.starts_at < t
        {
            return false;
        }
        if let Some(t) = self.starts_before
            && silence.starts_at >= t
        {
            return false;
        }
        if let Some(t) = self.ends_after
            && silence.ends_at < t
        {
            return false;
        }
        if let Some(t) = self.ends_before
            && silence.ends_at >= t
        {
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// SilenceStore
// ---------------------------------------------------------------------------

/// Silence repository contract.
///
/// The production backing store is PostgreSQL (one row per rule, matchers as
/// JSONB); the core depends only on this trait. [`super::MemorySilenceStore`]
/// implements the identical semantics in memory and backs tests and
/// single-node runs.
#[async_trait]
pub trait SilenceStore: Send + Sync {
    /// Insert a new rule. A nil id is replaced with a fresh UUID; a duplicate
    /// id is a conflict. Returns the stored rule with timestamps populated.
    async fn create_silence(&self, silence: Silence) -> CoreResult<Silence>;

    /// Fetch by id; `NotFound` when absent.
    async fn get_silence_by_id(&self, id: Uuid) -> CoreResult<Silence>;

    /// Filtered, ordered, paginated listing.
    async fn list_silences(&self, filter: &SilenceFilter) -> CoreResult<Vec<Silence>>;

    /// Count of rules matching the filter, ignoring pagination.
    async fn count_silences(&self, filter: &SilenceFilter) -> CoreResult<usize>;

    /// Optimistic-lock update: succeeds iff the stored `updated_at` equals
    /// `expected_updated_at`; mismatch is a conflict. Expired rules are
    /// immutable.
    async fn update_silence(
        &self,
        silence: Silence,
        expected_updated_at: DateTime<Utc>,
    ) -> CoreResult<Silence>;

    /// Hard delete by id; `NotFound` when absent.
    async fn delete_silence(&self, id: Uuid) -> CoreResult<()>;

    /// Mark (or, with `delete_permanent`, remove) rules whose `ends_at` is
    /// before `before`. At most 1000 rules are touched per call; the return
    /// value is the number affected.
    async fn expire_silences(&self, before: DateTime<Utc>, delete_permanent: bool)
        -> CoreResult<usize>;

    /// Set the advisory status on many rules in one transaction.
    async fn bulk_update_status(&self, ids: &[Uuid], status: SilenceStatus) -> CoreResult<usize>;

    /// All rules whose derived status at `now` is active, for the oracle
    /// snapshot.
    async fn active_silences(&self, now: DateTime<Utc>) -> CoreResult<Vec<Silence>>;
}
