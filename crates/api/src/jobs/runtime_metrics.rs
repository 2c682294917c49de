//! Background job publishing dashboard runtime gauges.

use domain::services::FetchCoordinator;
use metrics::gauge;
use sqlx::PgPool;
use std::sync::Arc;

use super::scheduler::{Job, JobFrequency};
use crate::app::AppState;
use crate::services::FilterSessions;

/// Point-in-time sizes of the in-process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSnapshot {
    pub cache_entries: usize,
    pub cache_bytes: usize,
    pub tracked_queries: usize,
    pub filter_sessions: usize,
}

/// Samples chart cache, fetch coordinator and filter session sizes, plus
/// database pool usage when a pool is configured.
pub struct RuntimeMetricsJob {
    pool: Option<PgPool>,
    coordinator: FetchCoordinator,
    sessions: Arc<FilterSessions>,
}

impl RuntimeMetricsJob {
    pub fn new(state: &AppState) -> Self {
        Self {
            pool: state.pool.clone(),
            coordinator: state.coordinator.clone(),
            sessions: state.filters.clone(),
        }
    }

    pub async fn snapshot(&self) -> RuntimeSnapshot {
        let cache = self.coordinator.cache();
        RuntimeSnapshot {
            cache_entries: cache.len(),
            cache_bytes: cache.size_bytes(),
            tracked_queries: self.coordinator.tracked_queries(),
            filter_sessions: self.sessions.len().await,
        }
    }
}

#[async_trait::async_trait]
impl Job for RuntimeMetricsJob {
    fn name(&self) -> &'static str {
        "runtime_metrics"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(10)
    }

    async fn execute(&self) -> Result<(), String> {
        let snapshot = self.snapshot().await;
        gauge!("chart_cache_entries").set(snapshot.cache_entries as f64);
        gauge!("chart_cache_size_bytes").set(snapshot.cache_bytes as f64);
        gauge!("chart_queries_tracked").set(snapshot.tracked_queries as f64);
        gauge!("filter_sessions_active").set(snapshot.filter_sessions as f64);

        if let Some(pool) = &self.pool {
            persistence::metrics::record_pool_metrics(pool);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Backends;
    use crate::config::Config;
    use domain::models::{ChartKind, FilterState};
    use domain::services::{
        ChartSource, FetchError, FetchMode, InMemoryExportStore, InMemoryPreferenceStore,
        ManualClock,
    };
    use serde_json::{json, Value};
    use uuid::Uuid;

    struct FixedSource;

    #[async_trait::async_trait]
    impl ChartSource for FixedSource {
        async fn fetch(&self, _kind: ChartKind, _filters: &FilterState) -> Result<Value, FetchError> {
            Ok(json!({"total_revenue": 42}))
        }
    }

    fn state() -> AppState {
        let config = Config::load_for_test(&[("filters.enable_persistence", "false")])
            .expect("test config");
        AppState::new(
            config,
            Backends {
                exports: Arc::new(InMemoryExportStore::new()),
                preferences: Arc::new(InMemoryPreferenceStore::new()),
                source: Arc::new(FixedSource),
                clock: Arc::new(ManualClock::default()),
                pool: None,
            },
        )
    }

    #[tokio::test]
    async fn test_snapshot_reflects_cache_and_sessions() {
        let state = state();
        let job = RuntimeMetricsJob::new(&state);
        assert_eq!(
            job.snapshot().await,
            RuntimeSnapshot {
                cache_entries: 0,
                cache_bytes: 0,
                tracked_queries: 0,
                filter_sessions: 0,
            }
        );

        state
            .coordinator
            .request(ChartKind::Summary, &FilterState::default(), FetchMode::Cached)
            .await
            .unwrap();
        state.filters.get(Uuid::new_v4()).await;

        let snapshot = job.snapshot().await;
        assert_eq!(snapshot.cache_entries, 1);
        assert!(snapshot.cache_bytes > 0);
        assert_eq!(snapshot.tracked_queries, 0);
        assert_eq!(snapshot.filter_sessions, 1);

        assert!(job.execute().await.is_ok());
        assert_eq!(job.frequency(), JobFrequency::Seconds(10));
    }
}
