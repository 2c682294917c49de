//! Chart export writer.
//!
//! Renders a chart payload from the fetch coordinator into a JSON artifact
//! under the export root and records the outcome in the ledger.

use chrono::{DateTime, Utc};
use domain::models::{ChartKind, ExportFormat, ExportRecord, FilterState};
use domain::services::{FetchCoordinator, FetchMode, SharedClock};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::export_ledger::{resolve_export_path, ExportLedger, LedgerError};

#[derive(Serialize)]
struct ChartExportDocument<'a> {
    kind: ChartKind,
    filters: &'a FilterState,
    generated_at: DateTime<Utc>,
    data_fetched_at: DateTime<Utc>,
    data: &'a Value,
}

/// Produces export artifacts for chart data.
#[derive(Clone)]
pub struct ChartExportWriter {
    coordinator: FetchCoordinator,
    ledger: Arc<ExportLedger>,
    clock: SharedClock,
}

impl ChartExportWriter {
    pub fn new(coordinator: FetchCoordinator, ledger: Arc<ExportLedger>, clock: SharedClock) -> Self {
        Self {
            coordinator,
            ledger,
            clock,
        }
    }

    /// Exports one chart for `user_id`.
    ///
    /// Invalid filters and unsupported formats are rejected before anything is
    /// recorded. Once registered, any failure marks a still-processing export
    /// failed and removes whatever was written for it.
    pub async fn export(
        &self,
        user_id: Uuid,
        kind: ChartKind,
        filters: &FilterState,
        format: ExportFormat,
    ) -> Result<ExportRecord, LedgerError> {
        if format != ExportFormat::Json {
            return Err(LedgerError::UnsupportedFormat(format));
        }
        if let Err(problems) = filters.validate_at(self.clock.now()) {
            return Err(domain::services::FetchError::Validation(problems).into());
        }

        let record = self.ledger.register_export(user_id, format).await?;
        let relative = format!("{}/{}-{}.{}", user_id, kind, record.id, format.extension());

        if let Err(e) = self.write(kind, filters, &relative).await {
            if matches!(e, LedgerError::Io(_)) {
                self.ledger.discard_artifact(record.id, &relative).await;
            }
            self.mark_failed(record.id, &e).await;
            return Err(e);
        }

        // The export may have been deleted while its data was being fetched.
        match self.ledger.complete_export(record.id, &relative).await {
            Ok(completed) => Ok(completed),
            Err(e) => {
                self.ledger.discard_artifact(record.id, &relative).await;
                self.mark_failed(record.id, &e).await;
                Err(e)
            }
        }
    }

    /// Records a failure unless the export already left `processing`.
    async fn mark_failed(&self, export_id: Uuid, error: &LedgerError) {
        match self.ledger.fail_export(export_id, &error.to_string()).await {
            Ok(_) => {}
            Err(LedgerError::NotAvailable) => {
                debug!(export_id = %export_id, "Export no longer processing, failure not recorded");
            }
            Err(e) => warn!(export_id = %export_id, error = %e, "Failed to record export failure"),
        }
    }

    async fn write(
        &self,
        kind: ChartKind,
        filters: &FilterState,
        relative: &str,
    ) -> Result<(), LedgerError> {
        let outcome = self
            .coordinator
            .request(kind, filters, FetchMode::Cached)
            .await?;

        let document = ChartExportDocument {
            kind,
            filters,
            generated_at: self.clock.now(),
            data_fetched_at: outcome.fetched_at,
            data: &outcome.payload,
        };
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| LedgerError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let path = resolve_export_path(&self.ledger.config().export_root, relative)?;
        write_file(&path, &bytes).await?;

        info!(
            kind = %kind,
            path = %relative,
            bytes = bytes.len(),
            cache_hit = outcome.cache_hit,
            "Chart export written"
        );
        Ok(())
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::LedgerConfig;
    use chrono::NaiveDate;
    use domain::models::{DateRange, ExportStatus};
    use domain::services::{
        ChartSource, DataCache, ExportStore, FetchConfig, FetchError, InMemoryExportStore,
        ManualClock,
    };
    use serde_json::json;
    use tokio::sync::Semaphore;

    struct StaticSource;

    #[async_trait::async_trait]
    impl ChartSource for StaticSource {
        async fn fetch(&self, kind: ChartKind, _filters: &FilterState) -> Result<Value, FetchError> {
            match kind {
                ChartKind::Summary => Ok(json!({"total_revenue": 1250.5})),
                _ => Err(FetchError::Source("warehouse offline".into())),
            }
        }
    }

    /// Holds every fetch until a permit is added.
    struct GatedSource {
        gate: Semaphore,
    }

    #[async_trait::async_trait]
    impl ChartSource for GatedSource {
        async fn fetch(&self, _kind: ChartKind, _filters: &FilterState) -> Result<Value, FetchError> {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| FetchError::Source(e.to_string()))?;
            Ok(json!({"total_revenue": 10.0}))
        }
    }

    struct Fixture {
        writer: ChartExportWriter,
        ledger: Arc<ExportLedger>,
        store: Arc<InMemoryExportStore>,
        root: std::path::PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(StaticSource))
    }

    fn fixture_with(source: Arc<dyn ChartSource>) -> Fixture {
        let root = std::env::temp_dir().join(format!("chart-export-{}", Uuid::new_v4()));
        let clock: SharedClock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryExportStore::new());
        let cache = Arc::new(DataCache::new(Default::default(), clock.clone()));
        let coordinator = FetchCoordinator::new(source, cache, clock.clone(), FetchConfig::default());
        let ledger = Arc::new(ExportLedger::new(
            store.clone(),
            clock.clone(),
            LedgerConfig {
                export_root: root.clone(),
                retention: chrono::Duration::hours(24),
                max_downloads_per_user: 5,
            },
        ));
        Fixture {
            writer: ChartExportWriter::new(coordinator, ledger.clone(), clock),
            ledger,
            store,
            root,
        }
    }

    fn files_under(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_export_writes_json_artifact() {
        let fx = fixture();
        let user = Uuid::new_v4();

        let record = fx
            .writer
            .export(user, ChartKind::Summary, &FilterState::default(), ExportFormat::Json)
            .await
            .unwrap();

        assert_eq!(record.status, ExportStatus::Completed);
        let path = fx.root.join(record.file_path.as_deref().unwrap());
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(record.file_size, Some(bytes.len() as i64));

        let written: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(written["kind"], "summary");
        assert_eq!(written["data"]["total_revenue"], 1250.5);
    }

    #[tokio::test]
    async fn test_source_failure_marks_export_failed() {
        let fx = fixture();
        let user = Uuid::new_v4();

        let result = fx
            .writer
            .export(user, ChartKind::RevenueTrend, &FilterState::default(), ExportFormat::Json)
            .await;
        assert!(matches!(result, Err(LedgerError::Chart(FetchError::Source(_)))));

        let listed = fx.store.list_exports(user, None, 10, None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, ExportStatus::Failed);
        assert!(listed[0].error_message.as_deref().unwrap().contains("warehouse offline"));
    }

    #[tokio::test]
    async fn test_rejected_requests_leave_no_record() {
        let fx = fixture();
        let user = Uuid::new_v4();

        let result = fx
            .writer
            .export(user, ChartKind::Summary, &FilterState::default(), ExportFormat::Pdf)
            .await;
        assert!(matches!(result, Err(LedgerError::UnsupportedFormat(ExportFormat::Pdf))));

        let backwards = FilterState {
            date_range: DateRange::custom(
                NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            ),
            ..Default::default()
        };
        let result = fx
            .writer
            .export(user, ChartKind::Summary, &backwards, ExportFormat::Json)
            .await;
        assert!(matches!(result, Err(LedgerError::Chart(FetchError::Validation(_)))));

        assert!(fx.store.list_exports(user, None, 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_deleted_during_fetch_leaves_no_artifact() {
        let source = Arc::new(GatedSource {
            gate: Semaphore::new(0),
        });
        let fx = fixture_with(source.clone());
        let user = Uuid::new_v4();

        let writer = fx.writer.clone();
        let pending = tokio::spawn(async move {
            writer
                .export(user, ChartKind::Summary, &FilterState::default(), ExportFormat::Json)
                .await
        });

        let mut export_id = None;
        for _ in 0..1_000 {
            let listed = fx.store.list_exports(user, None, 10, None).await.unwrap();
            if let Some(record) = listed.first() {
                export_id = Some(record.id);
                break;
            }
            tokio::task::yield_now().await;
        }
        let export_id = export_id.expect("export registered");

        assert_eq!(fx.ledger.bulk_delete(user, &[export_id]).await.unwrap(), 1);
        source.gate.add_permits(1);

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(LedgerError::NotAvailable)));

        let record = fx.store.find_export(export_id).await.unwrap().unwrap();
        assert_eq!(record.status, ExportStatus::Deleted);
        assert!(record.error_message.is_none());
        assert_eq!(files_under(&fx.root.join(user.to_string())), 0);
    }
}
