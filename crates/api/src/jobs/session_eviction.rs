//! Background job dropping idle filter sessions from memory.

use chrono::Duration;
use std::sync::Arc;

use super::scheduler::{Job, JobFrequency};
use crate::services::FilterSessions;

/// Evicts filter sessions idle longer than `max_idle`. Their state is
/// restored from the preference store on the next request.
pub struct FilterSessionEvictionJob {
    sessions: Arc<FilterSessions>,
    max_idle: Duration,
}

impl FilterSessionEvictionJob {
    pub fn new(sessions: Arc<FilterSessions>, max_idle: Duration) -> Self {
        Self { sessions, max_idle }
    }
}

#[async_trait::async_trait]
impl Job for FilterSessionEvictionJob {
    fn name(&self) -> &'static str {
        "filter_session_eviction"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(5)
    }

    async fn execute(&self) -> Result<(), String> {
        self.sessions.evict_idle(self.max_idle).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FiltersConfig;
    use domain::services::{InMemoryPreferenceStore, ManualClock};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_evicts_sessions_past_configured_idle_time() {
        let clock = Arc::new(ManualClock::default());
        let sessions = Arc::new(FilterSessions::new(
            Arc::new(InMemoryPreferenceStore::new()),
            clock.clone(),
            FiltersConfig::default(),
        ));
        sessions.get(Uuid::new_v4()).await;

        let job = FilterSessionEvictionJob::new(sessions.clone(), Duration::minutes(10));
        job.execute().await.unwrap();
        assert_eq!(sessions.len().await, 1);

        clock.advance(Duration::minutes(11));
        job.execute().await.unwrap();
        assert_eq!(sessions.len().await, 0);
        assert_eq!(job.frequency(), JobFrequency::Minutes(5));
    }
}
