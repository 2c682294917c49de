//! Per-user filter stores.
//!
//! Each user gets one [`FilterStore`], created on first use and restored from
//! the preference store when persistence is enabled. Restoring happens
//! outside the registry lock.

use chrono::Duration;
use domain::services::{FilterStore, PreferenceStore, SharedClock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::FiltersConfig;

pub type SharedFilterStore = Arc<Mutex<FilterStore>>;

struct Session {
    store: SharedFilterStore,
    /// Unix milliseconds of the last `get`.
    last_seen: AtomicI64,
}

impl Session {
    fn touch(&self, now_millis: i64) {
        self.last_seen.fetch_max(now_millis, Ordering::Relaxed);
    }

    fn in_use(&self) -> bool {
        Arc::strong_count(&self.store) > 1
    }
}

/// Registry of live filter stores keyed by user.
pub struct FilterSessions {
    sessions: RwLock<HashMap<Uuid, Session>>,
    preferences: Arc<dyn PreferenceStore>,
    clock: SharedClock,
    config: FiltersConfig,
}

impl FilterSessions {
    pub fn new(
        preferences: Arc<dyn PreferenceStore>,
        clock: SharedClock,
        config: FiltersConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            preferences,
            clock,
            config,
        }
    }

    /// Returns the user's store, creating and restoring it on first access.
    ///
    /// Two concurrent first accesses may both restore; the first one inserted wins.
    pub async fn get(&self, user_id: Uuid) -> SharedFilterStore {
        let now = self.clock.now().timestamp_millis();
        if let Some(session) = self.sessions.read().await.get(&user_id) {
            session.touch(now);
            return session.store.clone();
        }

        let opened = self.open(user_id).await;

        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(user_id).or_insert_with(|| Session {
            store: opened,
            last_seen: AtomicI64::new(now),
        });
        session.touch(now);
        session.store.clone()
    }

    async fn open(&self, user_id: Uuid) -> SharedFilterStore {
        let mut store =
            FilterStore::new(self.clock.clone()).with_history_limit(self.config.history_limit);
        if self.config.enable_persistence {
            store = store.with_persistence(
                self.preferences.clone(),
                &self.config.persistence_key,
                &user_id.to_string(),
            );
            let restored = store.load().await;
            debug!(user_id = %user_id, restored = restored, "Filter session opened");
        }
        Arc::new(Mutex::new(store))
    }

    /// Persists the store, logging instead of failing the request.
    pub async fn persist(&self, user_id: Uuid, store: &FilterStore) {
        if let Err(e) = store.save().await {
            warn!(user_id = %user_id, error = %e, "Failed to persist filter state");
        }
    }

    /// Drops sessions unused for `max_idle` that no request currently holds.
    ///
    /// Without persistence the in-memory store is the only copy of a user's
    /// filters, so nothing is evicted.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        if !self.config.enable_persistence {
            return 0;
        }

        let cutoff = (self.clock.now() - max_idle).timestamp_millis();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| {
            session.in_use() || session.last_seen.load(Ordering::Relaxed) > cutoff
        });

        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted = evicted, remaining = sessions.len(), "Idle filter sessions evicted");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::models::{CompanyFilter, FilterPatch};
    use domain::services::{InMemoryPreferenceStore, ManualClock, SystemClock};
    use domain::StoreError;
    use serde_json::Value;
    use tokio::sync::Semaphore;

    fn config(enable: bool) -> FiltersConfig {
        FiltersConfig {
            enable_persistence: enable,
            persistence_key: "dashboard-filters".into(),
            history_limit: 5,
            session_idle_secs: 3600,
        }
    }

    fn sessions(preferences: Arc<InMemoryPreferenceStore>, enable: bool) -> FilterSessions {
        FilterSessions::new(preferences, Arc::new(SystemClock), config(enable))
    }

    fn companies(ids: &[i64]) -> FilterPatch {
        FilterPatch {
            companies: Some(CompanyFilter {
                selected_companies: ids.iter().copied().collect(),
            }),
            ..Default::default()
        }
    }

    /// Preference store whose reads wait for a permit.
    struct SlowPreferences {
        gate: Semaphore,
    }

    #[async_trait]
    impl PreferenceStore for SlowPreferences {
        async fn load(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(None)
        }

        async fn save(&self, _key: &str, _value: &Value) -> Result<(), StoreError> {
            Ok(())
        }

        async fn remove(&self, _key: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_same_user_shares_store() {
        let registry = sessions(Arc::new(InMemoryPreferenceStore::new()), false);
        let user = Uuid::new_v4();

        let a = registry.get(user).await;
        let b = registry.get(user).await;
        assert!(Arc::ptr_eq(&a, &b));

        registry.get(Uuid::new_v4()).await;
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_slow_restore_does_not_block_other_users() {
        let preferences = Arc::new(SlowPreferences {
            gate: Semaphore::new(0),
        });
        let registry = Arc::new(FilterSessions::new(
            preferences.clone(),
            Arc::new(SystemClock),
            config(true),
        ));
        let slow_user = Uuid::new_v4();

        let r = registry.clone();
        let pending = tokio::spawn(async move { r.get(slow_user).await });
        tokio::task::yield_now().await;

        // Another user's session is reachable while the first restore is parked.
        let other = Uuid::new_v4();
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            registry.sessions.write().await.insert(
                other,
                Session {
                    store: Arc::new(Mutex::new(FilterStore::new(Arc::new(SystemClock)))),
                    last_seen: AtomicI64::new(0),
                },
            );
            registry.get(other).await
        })
        .await
        .expect("registry not locked during restore");

        preferences.gate.add_permits(1);
        pending.await.unwrap();
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_persisted_filters_survive_new_registry() {
        let preferences = Arc::new(InMemoryPreferenceStore::new());
        let user = Uuid::new_v4();

        let first = sessions(preferences.clone(), true);
        {
            let store = first.get(user).await;
            let mut store = store.lock().await;
            store.update(companies(&[4, 2]));
            first.persist(user, &store).await;
        }

        let second = sessions(preferences, true);
        let store = second.get(user).await;
        let store = store.lock().await;
        assert_eq!(store.active_filter_count(), 1);
        assert_eq!(
            store.persistence_key(),
            Some(format!("dashboard-filters:{}", user).as_str())
        );
    }

    #[tokio::test]
    async fn test_disabled_persistence_starts_blank() {
        let preferences = Arc::new(InMemoryPreferenceStore::new());
        let user = Uuid::new_v4();

        let enabled = sessions(preferences.clone(), true);
        {
            let store = enabled.get(user).await;
            let mut store = store.lock().await;
            store.update(companies(&[1]));
            enabled.persist(user, &store).await;
        }

        let disabled = sessions(preferences, false);
        let store = disabled.get(user).await;
        assert_eq!(store.lock().await.active_filter_count(), 0);
    }

    #[tokio::test]
    async fn test_evict_idle_keeps_recent_and_held_sessions() {
        let clock = Arc::new(ManualClock::default());
        let preferences = Arc::new(InMemoryPreferenceStore::new());
        let registry = FilterSessions::new(preferences, clock.clone(), config(true));

        let idle = Uuid::new_v4();
        let held = Uuid::new_v4();
        let recent = Uuid::new_v4();
        {
            let store = registry.get(idle).await;
            let mut store = store.lock().await;
            store.update(companies(&[8]));
            registry.persist(idle, &store).await;
        }
        let held_store = registry.get(held).await;

        clock.advance(Duration::minutes(90));
        registry.get(recent).await;

        assert_eq!(registry.evict_idle(Duration::hours(1)).await, 1);
        assert_eq!(registry.len().await, 2);
        drop(held_store);

        // An evicted user's filters come back from the preference store.
        let restored = registry.get(idle).await;
        assert_eq!(restored.lock().await.active_filter_count(), 1);
    }

    #[tokio::test]
    async fn test_evict_idle_is_noop_without_persistence() {
        let clock = Arc::new(ManualClock::default());
        let registry = FilterSessions::new(
            Arc::new(InMemoryPreferenceStore::new()),
            clock.clone(),
            config(false),
        );
        registry.get(Uuid::new_v4()).await;

        clock.advance(Duration::days(1));
        assert_eq!(registry.evict_idle(Duration::hours(1)).await, 0);
        assert_eq!(registry.len().await, 1);
    }
}
