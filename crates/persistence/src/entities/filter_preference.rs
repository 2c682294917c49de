//! Filter preference entity.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Database row for a persisted filter document.
#[derive(Debug, Clone, FromRow)]
pub struct FilterPreferenceEntity {
    pub key: String,
    pub document: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}
