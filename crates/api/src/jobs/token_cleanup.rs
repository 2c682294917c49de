//! Background job deleting expired download tokens.

use std::sync::Arc;

use super::scheduler::{Job, JobFrequency};
use crate::services::ExportLedger;

/// Removes expired token rows. Export artifacts are left in place.
pub struct DownloadTokenCleanupJob {
    ledger: Arc<ExportLedger>,
}

impl DownloadTokenCleanupJob {
    pub fn new(ledger: Arc<ExportLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait::async_trait]
impl Job for DownloadTokenCleanupJob {
    fn name(&self) -> &'static str {
        "download_token_cleanup"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(15)
    }

    async fn execute(&self) -> Result<(), String> {
        self.ledger
            .sweep_expired()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
