//! Export record entity.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row for an export artifact.
#[derive(Debug, Clone, FromRow)]
pub struct ExportRecordEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Export format (json, csv, excel, pdf).
    pub format: String,
    /// Lifecycle status.
    pub status: String,
    /// Path relative to the export storage root.
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
