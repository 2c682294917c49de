//! Download token entity.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row for a download token. The raw token is never stored.
#[derive(Debug, Clone, FromRow)]
pub struct DownloadTokenEntity {
    pub id: Uuid,
    pub export_id: Uuid,
    pub user_id: Uuid,
    /// SHA-256 hex of the issued token.
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub download_count: i32,
    pub first_downloaded_at: Option<DateTime<Utc>>,
    pub last_downloaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
