//! Background job evicting expired chart cache entries.

use domain::services::DataCache;
use std::sync::Arc;
use tracing::debug;

use super::scheduler::{Job, JobFrequency};

/// Drops expired entries so stale payloads stop counting against the size cap.
pub struct CacheSweepJob {
    cache: Arc<DataCache>,
    interval_secs: u64,
}

impl CacheSweepJob {
    pub fn new(cache: Arc<DataCache>, interval_secs: u64) -> Self {
        Self {
            cache,
            interval_secs,
        }
    }
}

#[async_trait::async_trait]
impl Job for CacheSweepJob {
    fn name(&self) -> &'static str {
        "cache_sweep"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(self.interval_secs)
    }

    async fn execute(&self) -> Result<(), String> {
        let removed = self.cache.sweep_expired();
        if removed > 0 {
            debug!(removed = removed, remaining = self.cache.len(), "Expired chart entries swept");
        }
        Ok(())
    }
}
