//! PostgreSQL implementations of the domain store traits.

use chrono::{DateTime, Utc};
use domain::models::{DownloadToken, ExportRecord, ExportStatus, NewExport};
use domain::services::{ExportCursor, ExportStore};
use domain::StoreError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repositories::{DownloadTokenRepository, ExportRecordRepository};

/// Export ledger storage backed by the `exports` and `download_tokens` tables.
#[derive(Clone)]
pub struct PgExportStore {
    exports: ExportRecordRepository,
    tokens: DownloadTokenRepository,
}

impl PgExportStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            exports: ExportRecordRepository::new(pool.clone()),
            tokens: DownloadTokenRepository::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl ExportStore for PgExportStore {
    async fn insert_export(
        &self,
        export: NewExport,
        now: DateTime<Utc>,
    ) -> Result<ExportRecord, StoreError> {
        Ok(self.exports.create(&export, now).await?)
    }

    async fn find_export(&self, id: Uuid) -> Result<Option<ExportRecord>, StoreError> {
        Ok(self.exports.find_by_id(id).await?)
    }

    async fn list_exports(
        &self,
        user_id: Uuid,
        status: Option<ExportStatus>,
        limit: i64,
        after: Option<ExportCursor>,
    ) -> Result<Vec<ExportRecord>, StoreError> {
        Ok(self
            .exports
            .list_for_user(user_id, status, limit, after)
            .await?)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        user_id: Uuid,
        from: &[ExportStatus],
        to: ExportStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .exports
            .transition_status(id, user_id, from, to, now)
            .await?)
    }

    async fn complete_export(
        &self,
        id: Uuid,
        file_path: &str,
        file_size: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ExportRecord>, StoreError> {
        Ok(self
            .exports
            .mark_completed(id, file_path, file_size, now)
            .await?)
    }

    async fn fail_export(
        &self,
        id: Uuid,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExportRecord>, StoreError> {
        Ok(self.exports.mark_failed(id, error_message, now).await?)
    }

    async fn insert_token(&self, token: DownloadToken) -> Result<(), StoreError> {
        Ok(self.tokens.create(&token).await?)
    }

    async fn find_active_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DownloadToken>, StoreError> {
        Ok(self.tokens.find_active_by_hash(token_hash, now).await?)
    }

    async fn count_active_tokens(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        Ok(self.tokens.count_active_for_user(user_id, now).await?)
    }

    async fn record_download(
        &self,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<DownloadToken>, StoreError> {
        Ok(self.tokens.record_download(token_id, now).await?)
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(self.tokens.delete_expired(now).await?)
    }

    async fn delete_tokens_for_export(&self, export_id: Uuid) -> Result<u64, StoreError> {
        Ok(self.tokens.delete_for_export(export_id).await?)
    }
}
