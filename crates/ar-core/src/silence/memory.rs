use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::{Silence, SilenceStatus};
use super::store::{SilenceFilter, SilenceOrder, SilenceStore};
use crate::error::{CoreReason, CoreResult, core_err};

/// Cap on rules touched by a single `expire_silences` call.
const EXPIRE_BATCH_CAP: usize = 1000;

// ---------------------------------------------------------------------------
// MemorySilenceStore
// ---------------------------------------------------------------------------

/// In-memory [`SilenceStore`] with the full repository semantics: optimistic
/// locking, derived-status filtering, pagination and batch expiry. Backs
/// tests and single-node deployments.
#[derive(Default)]
pub struct MemorySilenceStore {
    inner: RwLock<HashMap<Uuid, Silence>>,
}

impl MemorySilenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("silence store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SilenceStore for MemorySilenceStore {
    async fn create_silence(&self, mut silence: Silence) -> CoreResult<Silence> {
        if silence.id.is_nil() {
            silence.id = Uuid::new_v4();
        }
        silence.validate()?;
        let now = Utc::now();
        silence.created_at = now;
        silence.updated_at = now;
        silence.status = silence.status_at(now);

        let mut inner = self.inner.write().expect("silence store lock poisoned");
        if inner.contains_key(&silence.id) {
            return Err(core_err(
                CoreReason::Conflict,
                format!("silence {} already exists", silence.id),
            ));
        }
        inner.insert(silence.id, silence.clone());
        Ok(silence)
    }

    async fn get_silence_by_id(&self, id: Uuid) -> CoreResult<Silence> {
        self.inner
            .read()
            .expect("silence store lock poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| core_err(CoreReason::NotFound, format!("silence {id}")))
    }

    async fn list_silences(&self, filter: &SilenceFilter) -> CoreResult<Vec<Silence>> {
        let now = Utc::now();
        let inner = self.inner.read().expect("silence store lock poisoned");
        let mut rows: Vec<Silence> = inner
            .values()
            .filter(|s| filter.accepts(s, now))
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            let ord = match filter.order_by {
                SilenceOrder::CreatedAt => a.created_at.cmp(&b.created_at),
                SilenceOrder::StartsAt => a.starts_at.cmp(&b.starts_at),
                SilenceOrder::EndsAt => a.ends_at.cmp(&b.ends_at),
                SilenceOrder::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            };
            // Stable tiebreak keeps pagination deterministic.
            let ord = ord.then_with(|| a.id.cmp(&b.id));
            if filter.descending { ord.reverse() } else { ord }
        });

        Ok(rows
            .into_iter()
            .skip(filter.offset)
            .take(filter.effective_limit())
            .collect())
    }

    async fn count_silences(&self, filter: &SilenceFilter) -> CoreResult<usize> {
        let now = Utc::now();
        let inner = self.inner.read().expect("silence store lock poisoned");
        Ok(inner.values().filter(|s| filter.accepts(s, now)).count())
    }

    async fn update_silence(
        &self,
        mut silence: Silence,
        expected_updated_at: DateTime<Utc>,
    ) -> CoreResult<Silence> {
        silence.validate()?;
        let now = Utc::now();
        let mut inner = self.inner.write().expect("silence store lock poisoned");
        let stored = inner
            .get_mut(&silence.id)
            .ok_or_else(|| core_err(CoreReason::NotFound, format!("silence {}", silence.id)))?;
        if stored.updated_at != expected_updated_at {
            return Err(core_err(
                CoreReason::Conflict,
                format!(
                    "silence {} updated_at mismatch: stored {}, expected {}",
                    silence.id, stored.updated_at, expected_updated_at
                ),
            ));
        }
        if stored.status_at(now) == SilenceStatus::Expired {
            return Err(core_err(
                CoreReason::Validation,
                format!("silence {} is expired and immutable", silence.id),
            ));
        }
        silence.created_at = stored.created_at;
        silence.created_by = stored.created_by.clone();
        silence.updated_at = now;
        silence.status = silence.status_at(now);
        *stored = silence.clone();
        Ok(silence)
    }

    async fn delete_silence(&self, id: Uuid) -> CoreResult<()> {
        let mut inner = self.inner.write().expect("silence store lock poisoned");
        inner
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| core_err(CoreReason::NotFound, format!("silence {id}")))
    }

    async fn expire_silences(
        &self,
        before: DateTime<Utc>,
        delete_permanent: bool,
    ) -> CoreResult<usize> {
        let mut inner = self.inner.write().expect("silence store lock poisoned");
        let victims: Vec<Uuid> = inner
            .values()
            .filter(|s| s.ends_at < before)
            .map(|s| s.id)
            .take(EXPIRE_BATCH_CAP)
            .collect();
        for id in &victims {
            if delete_permanent {
                inner.remove(id);
            } else if let Some(s) = inner.get_mut(id) {
                s.status = SilenceStatus::Expired;
            }
        }
        Ok(victims.len())
    }

    async fn bulk_update_status(&self, ids: &[Uuid], status: SilenceStatus) -> CoreResult<usize> {
        let mut inner = self.inner.write().expect("silence store lock poisoned");
        let mut updated = 0;
        for id in ids {
            if let Some(s) = inner.get_mut(id) {
                s.status = status;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn active_silences(&self, now: DateTime<Utc>) -> CoreResult<Vec<Silence>> {
        let inner = self.inner.read().expect("silence store lock poisoned");
        Ok(inner.values().filter(|s| s.is_active(now)).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;
    use chrono::Duration;

    fn silence(creator: &str, offset_min: i64, len_min: i64) -> Silence {
        let now = Utc::now();
        Silence::new(
            creator,
            "test",
            now + Duration::minutes(offset_min),
            now + Duration::minutes(offset_min + len_min),
            vec![Matcher::parse("alertname = Flapping").unwrap()],
        )
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemorySilenceStore::new();
        let created = store.create_silence(silence("ops", -5, 60)).await.unwrap();
        let fetched = store.get_silence_by_id(created.id).await.unwrap();
        assert_eq!(created, fetched);
        assert_eq!(fetched.status, SilenceStatus::Active);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = MemorySilenceStore::new();
        let created = store.create_silence(silence("ops", 0, 60)).await.unwrap();
        let dup = created.clone();
        let err = store.create_silence(dup).await.unwrap_err();
        assert!(err.to_string().contains("conflict"), "{err}");
    }

    #[tokio::test]
    async fn create_fills_nil_id() {
        let store = MemorySilenceStore::new();
        let mut s = silence("ops", 0, 60);
        s.id = Uuid::nil();
        let created = store.create_silence(s).await.unwrap();
        assert!(!created.id.is_nil());
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemorySilenceStore::new();
        let err = store.get_silence_by_id(Uuid::new_v4()).await.unwrap_err();
        assert!(err.to_string().contains("not found"), "{err}");
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let store = MemorySilenceStore::new();
        let created = store.create_silence(silence("ops", -5, 60)).await.unwrap();

        let mut edit = created.clone();
        edit.comment = "extended".into();
        let updated = store
            .update_silence(edit.clone(), created.updated_at)
            .await
            .unwrap();
        assert_eq!(updated.comment, "extended");

        // Same expected version again: stale.
        edit.comment = "second edit".into();
        let err = store
            .update_silence(edit, created.updated_at)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("conflict"), "{err}");

        let fetched = store.get_silence_by_id(created.id).await.unwrap();
        assert_eq!(fetched.comment, "extended");
    }

    #[tokio::test]
    async fn update_expired_rejected() {
        let store = MemorySilenceStore::new();
        let created = store.create_silence(silence("ops", -120, 60)).await.unwrap();
        let err = store
            .update_silence(created.clone(), created.updated_at)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("immutable"), "{err}");
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let store = MemorySilenceStore::new();
        let created = store.create_silence(silence("ops", 0, 60)).await.unwrap();
        store.delete_silence(created.id).await.unwrap();
        assert!(store.get_silence_by_id(created.id).await.is_err());
        assert!(store.delete_silence(created.id).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_by_creator_and_status() {
        let store = MemorySilenceStore::new();
        store.create_silence(silence("alice", -5, 60)).await.unwrap();
        store.create_silence(silence("bob", -5, 60)).await.unwrap();
        store.create_silence(silence("alice", 30, 60)).await.unwrap();

        let by_alice = SilenceFilter {
            created_by: Some("alice".into()),
            ..Default::default()
        };
        assert_eq!(store.list_silences(&by_alice).await.unwrap().len(), 2);
        assert_eq!(store.count_silences(&by_alice).await.unwrap(), 2);

        let active_alice = SilenceFilter {
            created_by: Some("alice".into()),
            statuses: vec![SilenceStatus::Active],
            ..Default::default()
        };
        assert_eq!(store.list_silences(&active_alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_filters_by_matcher_name() {
        let store = MemorySilenceStore::new();
        store.create_silence(silence("ops", 0, 60)).await.unwrap();
        let mut other = silence("ops", 0, 60);
        other.matchers = vec![Matcher::parse("cluster = a").unwrap()];
        store.create_silence(other).await.unwrap();

        let filter = SilenceFilter {
            matcher_name: Some("cluster".into()),
            ..Default::default()
        };
        let rows = store.list_silences(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].matchers[0].name, "cluster");
    }

    #[tokio::test]
    async fn list_paginates_deterministically() {
        let store = MemorySilenceStore::new();
        for _ in 0..5 {
            store.create_silence(silence("ops", 0, 60)).await.unwrap();
        }
        let page1 = SilenceFilter {
            limit: 2,
            ..Default::default()
        };
        let page2 = SilenceFilter {
            limit: 2,
            offset: 2,
            ..Default::default()
        };
        let p1 = store.list_silences(&page1).await.unwrap();
        let p2 = store.list_silences(&page2).await.unwrap();
        assert_eq!(p1.len(), 2);
        assert_eq!(p2.len(), 2);
        assert!(p1.iter().all(|s| p2.iter().all(|t| t.id != s.id)));
    }

    #[tokio::test]
    async fn expire_marks_or_deletes() {
        let store = MemorySilenceStore::new();
        let old = store.create_silence(silence("ops", -240, 60)).await.unwrap();
        store.create_silence(silence("ops", -5, 60)).await.unwrap();

        let now = Utc::now();
        let marked = store.expire_silences(now, false).await.unwrap();
        assert_eq!(marked, 1);
        let fetched = store.get_silence_by_id(old.id).await.unwrap();
        assert_eq!(fetched.status, SilenceStatus::Expired);

        let deleted = store.expire_silences(now, true).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_silence_by_id(old.id).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn bulk_update_status_counts_hits() {
        let store = MemorySilenceStore::new();
        let a = store.create_silence(silence("ops", 0, 60)).await.unwrap();
        let b = store.create_silence(silence("ops", 0, 60)).await.unwrap();
        let n = store
            .bulk_update_status(&[a.id, b.id, Uuid::new_v4()], SilenceStatus::Expired)
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn active_silences_uses_derived_status() {
        let store = MemorySilenceStore::new();
        store.create_silence(silence("ops", -5, 60)).await.unwrap();
        store.create_silence(silence("ops", 30, 60)).await.unwrap();
        store.create_silence(silence("ops", -120, 30)).await.unwrap();
        let active = store.active_silences(Utc::now()).await.unwrap();
        assert_eq!(active.len(), 1);
    }
}
