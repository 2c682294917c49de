//! Export ledger: export history, download tokens and artifact files.
//!
//! Raw download tokens are returned exactly once, at issuance; only their
//! SHA-256 hash is stored. Unknown, expired, foreign and unusable exports all
//! surface as [`LedgerError::NotAvailable`] so callers cannot tell them apart.

use chrono::Duration;
use domain::models::{
    DownloadToken, ExportFormat, ExportRecord, ExportResponse, ExportStatus, IssuedDownload,
    ListExportsQuery, NewExport,
};
use domain::services::{ExportStore, FetchError, SharedClock};
use domain::StoreError;
use metrics::counter;
use serde::Serialize;
use shared::crypto::{generate_download_token, is_well_formed_download_token, sha256_hex};
use shared::pagination::{clamp_page_size, decode_cursor, encode_cursor};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ledger failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Export not available")]
    NotAvailable,

    #[error("Download limit of {0} active links reached")]
    LimitReached(u32),

    #[error("Export path escapes the storage root: {0}")]
    InvalidPath(String),

    #[error("Invalid pagination cursor")]
    InvalidCursor,

    #[error("Unsupported export format: {}", .0.as_str())]
    UnsupportedFormat(ExportFormat),

    #[error("Chart data error: {0}")]
    Chart(#[from] FetchError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ledger settings.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub export_root: PathBuf,
    pub retention: Duration,
    pub max_downloads_per_user: u32,
}

/// A token that resolved to a downloadable artifact.
#[derive(Debug, Clone)]
pub struct ResolvedDownload {
    pub token: DownloadToken,
    pub export: ExportRecord,
    pub path: PathBuf,
}

/// One page of a user's export history.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPage {
    pub items: Vec<ExportResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Resolves `relative` under `root`, rejecting absolute paths and any path
/// whose lexical normalization climbs above `root`.
pub fn resolve_export_path(root: &Path, relative: &str) -> Result<PathBuf, LedgerError> {
    let invalid = || LedgerError::InvalidPath(relative.to_string());

    if relative.trim().is_empty() || relative.starts_with('\\') {
        return Err(invalid());
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(invalid());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(invalid()),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(invalid());
    }

    Ok(root.join(normalized))
}

/// Export history and download token service.
pub struct ExportLedger {
    store: Arc<dyn ExportStore>,
    clock: SharedClock,
    config: LedgerConfig,
}

impl ExportLedger {
    pub fn new(store: Arc<dyn ExportStore>, clock: SharedClock, config: LedgerConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Records a new export in `processing` status.
    pub async fn register_export(
        &self,
        user_id: Uuid,
        format: ExportFormat,
    ) -> Result<ExportRecord, LedgerError> {
        let record = self
            .store
            .insert_export(NewExport { user_id, format }, self.clock.now())
            .await?;
        info!(export_id = %record.id, user_id = %user_id, format = %format.as_str(), "Export registered");
        Ok(record)
    }

    /// Marks a processing export completed. The artifact must already exist
    /// at `relative_path` under the export root; its size is read from disk.
    pub async fn complete_export(
        &self,
        export_id: Uuid,
        relative_path: &str,
    ) -> Result<ExportRecord, LedgerError> {
        let path = resolve_export_path(&self.config.export_root, relative_path)?;
        let size = tokio::fs::metadata(&path).await?.len() as i64;

        let record = self
            .store
            .complete_export(export_id, relative_path, size, self.clock.now())
            .await?
            .ok_or(LedgerError::NotAvailable)?;

        counter!("exports_completed_total", "format" => record.format.as_str()).increment(1);
        info!(export_id = %export_id, file_size = size, "Export completed");
        Ok(record)
    }

    /// Marks a processing export failed.
    pub async fn fail_export(
        &self,
        export_id: Uuid,
        message: &str,
    ) -> Result<ExportRecord, LedgerError> {
        let record = self
            .store
            .fail_export(export_id, message, self.clock.now())
            .await?
            .ok_or(LedgerError::NotAvailable)?;

        counter!("exports_failed_total").increment(1);
        warn!(export_id = %export_id, error = %message, "Export failed");
        Ok(record)
    }

    /// Lists a user's exports newest first.
    pub async fn list_exports(
        &self,
        user_id: Uuid,
        query: &ListExportsQuery,
    ) -> Result<ExportPage, LedgerError> {
        let limit = clamp_page_size(query.limit);
        let after = query
            .cursor
            .as_deref()
            .map(decode_cursor)
            .transpose()
            .map_err(|_| LedgerError::InvalidCursor)?;

        let mut records = self
            .store
            .list_exports(user_id, query.status, limit + 1, after)
            .await?;

        let next_cursor = if records.len() as i64 > limit {
            records.truncate(limit as usize);
            records.last().map(|r| encode_cursor(r.created_at, r.id))
        } else {
            None
        };

        Ok(ExportPage {
            items: records.into_iter().map(ExportResponse::from).collect(),
            next_cursor,
        })
    }

    /// Issues a download token for a user's completed export whose file still exists.
    pub async fn create_download(
        &self,
        user_id: Uuid,
        export_id: Uuid,
    ) -> Result<IssuedDownload, LedgerError> {
        let export = self
            .store
            .find_export(export_id)
            .await?
            .filter(|e| e.user_id == user_id && e.status == ExportStatus::Completed)
            .ok_or(LedgerError::NotAvailable)?;

        let path = self.artifact_path(&export)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!(export_id = %export_id, path = %path.display(), "Export file is missing");
            return Err(LedgerError::NotAvailable);
        }

        let now = self.clock.now();
        let active = self.store.count_active_tokens(user_id, now).await?;
        if active >= i64::from(self.config.max_downloads_per_user) {
            return Err(LedgerError::LimitReached(self.config.max_downloads_per_user));
        }

        let raw = generate_download_token();
        let token = DownloadToken {
            id: Uuid::new_v4(),
            export_id,
            user_id,
            token_hash: sha256_hex(&raw),
            expires_at: now + self.config.retention,
            download_count: 0,
            first_downloaded_at: None,
            last_downloaded_at: None,
            created_at: now,
        };
        let issued = IssuedDownload {
            download_id: token.id,
            token: raw,
            expires_at: token.expires_at,
        };
        self.store.insert_token(token).await?;

        counter!("download_tokens_issued_total").increment(1);
        info!(
            export_id = %export_id,
            download_id = %issued.download_id,
            expires_at = %issued.expires_at,
            "Download token issued"
        );
        Ok(issued)
    }

    /// Looks up a valid token and the artifact it grants access to.
    pub async fn resolve_token(&self, raw: &str) -> Result<ResolvedDownload, LedgerError> {
        if !is_well_formed_download_token(raw) {
            return Err(LedgerError::NotAvailable);
        }

        let token = self
            .store
            .find_active_token(&sha256_hex(raw), self.clock.now())
            .await?
            .ok_or(LedgerError::NotAvailable)?;

        let export = self
            .store
            .find_export(token.export_id)
            .await?
            .filter(|e| matches!(e.status, ExportStatus::Completed | ExportStatus::Archived))
            .ok_or(LedgerError::NotAvailable)?;

        let path = self.artifact_path(&export)?;
        Ok(ResolvedDownload {
            token,
            export,
            path,
        })
    }

    /// Counts a download against the token. Tokens stay valid until expiry.
    pub async fn mark_downloaded(&self, download_id: Uuid) -> Result<DownloadToken, LedgerError> {
        let token = self
            .store
            .record_download(download_id, self.clock.now())
            .await?
            .ok_or(LedgerError::NotAvailable)?;

        counter!("export_downloads_total").increment(1);
        debug!(
            download_id = %download_id,
            download_count = token.download_count,
            "Download recorded"
        );
        Ok(token)
    }

    /// Removes expired token records. Export files are untouched.
    pub async fn sweep_expired(&self) -> Result<u64, LedgerError> {
        let removed = self.store.delete_expired_tokens(self.clock.now()).await?;
        if removed > 0 {
            counter!("download_tokens_expired_total").increment(removed);
            info!(removed = removed, "Expired download tokens removed");
        }
        Ok(removed)
    }

    /// Soft-deletes a user's exports, revokes their tokens and removes their files.
    ///
    /// File removal failures are logged and never undo the status change.
    pub async fn bulk_delete(&self, user_id: Uuid, ids: &[Uuid]) -> Result<usize, LedgerError> {
        let mut deleted = 0;
        for &id in ids {
            let Some(export) = self.store.find_export(id).await? else {
                continue;
            };
            let moved = self
                .store
                .transition_status(
                    id,
                    user_id,
                    &ExportStatus::DELETABLE,
                    ExportStatus::Deleted,
                    self.clock.now(),
                )
                .await?;
            if !moved {
                continue;
            }
            deleted += 1;

            let revoked = self.store.delete_tokens_for_export(id).await?;
            debug!(export_id = %id, revoked = revoked, "Download tokens revoked");

            if export.file_path.is_some() {
                self.remove_artifact(&export).await;
            }
        }

        info!(user_id = %user_id, requested = ids.len(), deleted = deleted, "Bulk delete finished");
        Ok(deleted)
    }

    /// Archives a user's completed or failed exports.
    pub async fn bulk_archive(&self, user_id: Uuid, ids: &[Uuid]) -> Result<usize, LedgerError> {
        let mut archived = 0;
        for &id in ids {
            let moved = self
                .store
                .transition_status(
                    id,
                    user_id,
                    &ExportStatus::ARCHIVABLE,
                    ExportStatus::Archived,
                    self.clock.now(),
                )
                .await?;
            if moved {
                archived += 1;
            }
        }

        info!(user_id = %user_id, requested = ids.len(), archived = archived, "Bulk archive finished");
        Ok(archived)
    }

    fn artifact_path(&self, export: &ExportRecord) -> Result<PathBuf, LedgerError> {
        let relative = export
            .file_path
            .as_deref()
            .ok_or(LedgerError::NotAvailable)?;
        resolve_export_path(&self.config.export_root, relative)
    }

    async fn remove_artifact(&self, export: &ExportRecord) {
        match self.artifact_path(export) {
            Ok(path) => remove_file_logged(export.id, &path).await,
            Err(e) => warn!(export_id = %export.id, error = %e, "Skipping file removal"),
        }
    }

    /// Removes an artifact written for an export that never completed.
    ///
    /// Removal failures are logged, never returned.
    pub async fn discard_artifact(&self, export_id: Uuid, relative_path: &str) {
        match resolve_export_path(&self.config.export_root, relative_path) {
            Ok(path) => remove_file_logged(export_id, &path).await,
            Err(e) => warn!(export_id = %export_id, error = %e, "Skipping file removal"),
        }
    }
}

async fn remove_file_logged(export_id: Uuid, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(export_id = %export_id, "Export file removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(export_id = %export_id, path = %path.display(), "Export file already missing");
        }
        Err(e) => {
            counter!("export_file_removal_failures_total").increment(1);
            warn!(
                export_id = %export_id,
                path = %path.display(),
                error = %e,
                "Failed to remove export file"
            );
        }
    }
}
