//! Storage contract for export records and download tokens.
//!
//! Timestamps are always supplied by the caller so expiry decisions follow
//! one clock regardless of backend.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{DownloadToken, ExportRecord, ExportStatus, NewExport};

/// Position after which the next page of exports starts.
pub type ExportCursor = (DateTime<Utc>, Uuid);

/// Durable storage for the export ledger.
#[async_trait::async_trait]
pub trait ExportStore: Send + Sync {
    /// Records a new export in `processing` status.
    async fn insert_export(
        &self,
        export: NewExport,
        now: DateTime<Utc>,
    ) -> Result<ExportRecord, StoreError>;

    async fn find_export(&self, id: Uuid) -> Result<Option<ExportRecord>, StoreError>;

    /// Lists a user's exports newest first. Deleted exports are never listed.
    async fn list_exports(
        &self,
        user_id: Uuid,
        status: Option<ExportStatus>,
        limit: i64,
        after: Option<ExportCursor>,
    ) -> Result<Vec<ExportRecord>, StoreError>;

    /// Moves a user's export to `to` if its current status is one of `from`.
    async fn transition_status(
        &self,
        id: Uuid,
        user_id: Uuid,
        from: &[ExportStatus],
        to: ExportStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Marks a processing export completed with its artifact location.
    async fn complete_export(
        &self,
        id: Uuid,
        file_path: &str,
        file_size: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ExportRecord>, StoreError>;

    /// Marks a processing export failed.
    async fn fail_export(
        &self,
        id: Uuid,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExportRecord>, StoreError>;

    async fn insert_token(&self, token: DownloadToken) -> Result<(), StoreError>;

    /// Finds a token by hash that has not expired at `now`.
    async fn find_active_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DownloadToken>, StoreError>;

    async fn count_active_tokens(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Increments the download count, stamping first and last use.
    async fn record_download(
        &self,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<DownloadToken>, StoreError>;

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn delete_tokens_for_export(&self, export_id: Uuid) -> Result<u64, StoreError>;
}

#[derive(Debug, Default)]
struct Ledger {
    exports: HashMap<Uuid, ExportRecord>,
    tokens: HashMap<Uuid, DownloadToken>,
}

/// Process-local export store for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryExportStore {
    ledger: RwLock<Ledger>,
}

impl InMemoryExportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn token_count(&self) -> usize {
        self.ledger.read().await.tokens.len()
    }
}

#[async_trait::async_trait]
impl ExportStore for InMemoryExportStore {
    async fn insert_export(
        &self,
        export: NewExport,
        now: DateTime<Utc>,
    ) -> Result<ExportRecord, StoreError> {
        let record = ExportRecord {
            id: Uuid::new_v4(),
            user_id: export.user_id,
            format: export.format,
            status: ExportStatus::Processing,
            file_path: None,
            file_size: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.ledger
            .write()
            .await
            .exports
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_export(&self, id: Uuid) -> Result<Option<ExportRecord>, StoreError> {
        Ok(self.ledger.read().await.exports.get(&id).cloned())
    }

    async fn list_exports(
        &self,
        user_id: Uuid,
        status: Option<ExportStatus>,
        limit: i64,
        after: Option<ExportCursor>,
    ) -> Result<Vec<ExportRecord>, StoreError> {
        let ledger = self.ledger.read().await;
        let mut records: Vec<ExportRecord> = ledger
            .exports
            .values()
            .filter(|r| r.user_id == user_id && r.status != ExportStatus::Deleted)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .filter(|r| after.map_or(true, |cursor| (r.created_at, r.id) < cursor))
            .cloned()
            .collect();
        records.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        user_id: Uuid,
        from: &[ExportStatus],
        to: ExportStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut ledger = self.ledger.write().await;
        match ledger.exports.get_mut(&id) {
            Some(record) if record.user_id == user_id && from.contains(&record.status) => {
                record.status = to;
                record.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_export(
        &self,
        id: Uuid,
        file_path: &str,
        file_size: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ExportRecord>, StoreError> {
        let mut ledger = self.ledger.write().await;
        match ledger.exports.get_mut(&id) {
            Some(record) if record.status == ExportStatus::Processing => {
                record.status = ExportStatus::Completed;
                record.file_path = Some(file_path.to_string());
                record.file_size = Some(file_size);
                record.updated_at = now;
                record.completed_at = Some(now);
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn fail_export(
        &self,
        id: Uuid,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExportRecord>, StoreError> {
        let mut ledger = self.ledger.write().await;
        match ledger.exports.get_mut(&id) {
            Some(record) if record.status == ExportStatus::Processing => {
                record.status = ExportStatus::Failed;
                record.error_message = Some(error_message.to_string());
                record.updated_at = now;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_token(&self, token: DownloadToken) -> Result<(), StoreError> {
        self.ledger.write().await.tokens.insert(token.id, token);
        Ok(())
    }

    async fn find_active_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DownloadToken>, StoreError> {
        Ok(self
            .ledger
            .read()
            .await
            .tokens
            .values()
            .find(|t| t.token_hash == token_hash && !t.is_expired(now))
            .cloned())
    }

    async fn count_active_tokens(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        Ok(self
            .ledger
            .read()
            .await
            .tokens
            .values()
            .filter(|t| t.user_id == user_id && !t.is_expired(now))
            .count() as i64)
    }

    async fn record_download(
        &self,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<DownloadToken>, StoreError> {
        let mut ledger = self.ledger.write().await;
        Ok(ledger.tokens.get_mut(&token_id).map(|token| {
            token.download_count += 1;
            token.first_downloaded_at.get_or_insert(now);
            token.last_downloaded_at = Some(now);
            token.clone()
        }))
    }

    async fn delete_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut ledger = self.ledger.write().await;
        let before = ledger.tokens.len();
        ledger.tokens.retain(|_, t| !t.is_expired(now));
        Ok((before - ledger.tokens.len()) as u64)
    }

    async fn delete_tokens_for_export(&self, export_id: Uuid) -> Result<u64, StoreError> {
        let mut ledger = self.ledger.write().await;
        let before = ledger.tokens.len();
        ledger.tokens.retain(|_, t| t.export_id != export_id);
        Ok((before - ledger.tokens.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExportFormat;
    use chrono::Duration;

    fn token(export_id: Uuid, user_id: Uuid, expires_at: DateTime<Utc>) -> DownloadToken {
        DownloadToken {
            id: Uuid::new_v4(),
            export_id,
            user_id,
            token_hash: Uuid::new_v4().simple().to_string(),
            expires_at,
            download_count: 0,
            first_downloaded_at: None,
            last_downloaded_at: None,
            created_at: expires_at - Duration::hours(24),
        }
    }

    #[tokio::test]
    async fn test_export_lifecycle() {
        let store = InMemoryExportStore::new();
        let user = Uuid::new_v4();
        let now = Utc::now();

        let record = store
            .insert_export(
                NewExport {
                    user_id: user,
                    format: ExportFormat::Csv,
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(record.status, ExportStatus::Processing);

        let done = store
            .complete_export(record.id, "u/report.csv", 12, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, ExportStatus::Completed);
        assert_eq!(done.completed_at, Some(now));

        // Completing twice is refused
        assert!(store
            .complete_export(record.id, "u/other.csv", 1, now)
            .await
            .unwrap()
            .is_none());

        let other_user = Uuid::new_v4();
        assert!(!store
            .transition_status(record.id, other_user, &ExportStatus::ARCHIVABLE, ExportStatus::Archived, now)
            .await
            .unwrap());
        assert!(store
            .transition_status(record.id, user, &ExportStatus::ARCHIVABLE, ExportStatus::Archived, now)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_list_excludes_deleted_and_pages_newest_first() {
        let store = InMemoryExportStore::new();
        let user = Uuid::new_v4();
        let base = Utc::now();

        let mut ids = Vec::new();
        for i in 0..4 {
            let r = store
                .insert_export(
                    NewExport {
                        user_id: user,
                        format: ExportFormat::Json,
                    },
                    base + Duration::minutes(i),
                )
                .await
                .unwrap();
            ids.push(r.id);
        }
        store
            .transition_status(ids[3], user, &ExportStatus::DELETABLE, ExportStatus::Deleted, base)
            .await
            .unwrap();

        let first_page = store.list_exports(user, None, 2, None).await.unwrap();
        assert_eq!(first_page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);

        let last = first_page.last().unwrap();
        let second_page = store
            .list_exports(user, None, 2, Some((last.created_at, last.id)))
            .await
            .unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].id, ids[0]);

        let deleted = store
            .list_exports(user, Some(ExportStatus::Deleted), 10, None)
            .await
            .unwrap();
        assert!(deleted.is_empty());
    }

    #[tokio::test]
    async fn test_token_queries_respect_expiry() {
        let store = InMemoryExportStore::new();
        let user = Uuid::new_v4();
        let export_id = Uuid::new_v4();
        let now = Utc::now();

        let live = token(export_id, user, now + Duration::hours(1));
        let stale = token(export_id, user, now - Duration::seconds(1));
        store.insert_token(live.clone()).await.unwrap();
        store.insert_token(stale.clone()).await.unwrap();

        assert!(store.find_active_token(&live.token_hash, now).await.unwrap().is_some());
        assert!(store.find_active_token(&stale.token_hash, now).await.unwrap().is_none());
        assert_eq!(store.count_active_tokens(user, now).await.unwrap(), 1);

        let used = store.record_download(live.id, now).await.unwrap().unwrap();
        let later = now + Duration::minutes(5);
        let used_again = store.record_download(live.id, later).await.unwrap().unwrap();
        assert_eq!(used.download_count, 1);
        assert_eq!(used_again.download_count, 2);
        assert_eq!(used_again.first_downloaded_at, Some(now));
        assert_eq!(used_again.last_downloaded_at, Some(later));

        assert_eq!(tokio_test::assert_ok!(store.delete_expired_tokens(now).await), 1);
        assert_eq!(tokio_test::assert_ok!(store.delete_tokens_for_export(export_id).await), 1);
        assert_eq!(store.token_count().await, 0);
    }
}
