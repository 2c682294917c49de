//! Download token repository for database operations.

use chrono::{DateTime, Utc};
use domain::models::DownloadToken;
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::DownloadTokenEntity;
use crate::metrics::QueryTimer;

/// Repository for download token database operations.
#[derive(Clone)]
pub struct DownloadTokenRepository {
    pool: PgPool,
}

impl DownloadTokenRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a newly issued token.
    pub async fn create(&self, token: &DownloadToken) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("create_download_token");
        let result = sqlx::query(
            r#"
            INSERT INTO download_tokens (id, export_id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(token.id)
        .bind(token.export_id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await;
        timer.record();
        result.map(|_| ())
    }

    /// Find a token by hash that is still valid at `now`.
    pub async fn find_active_by_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DownloadToken>, sqlx::Error> {
        let timer = QueryTimer::new("find_download_token_by_hash");
        let result = sqlx::query_as::<_, DownloadTokenEntity>(
            r#"
            SELECT id, export_id, user_id, token_hash, expires_at, download_count,
                   first_downloaded_at, last_downloaded_at, created_at
            FROM download_tokens
            WHERE token_hash = $1 AND expires_at > $2
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?.map(DownloadToken::from))
    }

    /// Count a user's tokens that are still valid at `now`.
    pub async fn count_active_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let timer = QueryTimer::new("count_active_download_tokens");
        let result: Result<(i64,), sqlx::Error> = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM download_tokens
            WHERE user_id = $1 AND expires_at > $2
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        Ok(result?.0)
    }

    /// Increment the download counter, stamping first and last use.
    pub async fn record_download(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<DownloadToken>, sqlx::Error> {
        let timer = QueryTimer::new("record_download");
        let result = sqlx::query_as::<_, DownloadTokenEntity>(
            r#"
            UPDATE download_tokens
            SET download_count = download_count + 1,
                first_downloaded_at = COALESCE(first_downloaded_at, $2),
                last_downloaded_at = $2
            WHERE id = $1
            RETURNING id, export_id, user_id, token_hash, expires_at, download_count,
                      first_downloaded_at, last_downloaded_at, created_at
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?.map(DownloadToken::from))
    }

    /// Delete tokens that expired at or before `now`.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("delete_expired_download_tokens");
        let result = sqlx::query(
            r#"
            DELETE FROM download_tokens
            WHERE expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected())
    }

    /// Revoke every token for an export.
    pub async fn delete_for_export(&self, export_id: Uuid) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("delete_download_tokens_for_export");
        let result = sqlx::query(
            r#"
            DELETE FROM download_tokens
            WHERE export_id = $1
            "#,
        )
        .bind(export_id)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected())
    }
}

impl From<DownloadTokenEntity> for DownloadToken {
    fn from(entity: DownloadTokenEntity) -> Self {
        Self {
            id: entity.id,
            export_id: entity.export_id,
            user_id: entity.user_id,
            token_hash: entity.token_hash,
            expires_at: entity.expires_at,
            download_count: entity.download_count,
            first_downloaded_at: entity.first_downloaded_at,
            last_downloaded_at: entity.last_downloaded_at,
            created_at: entity.created_at,
        }
    }
}
