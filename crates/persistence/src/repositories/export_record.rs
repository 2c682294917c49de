//! Export record repository for database operations.

use chrono::{DateTime, Utc};
use domain::models::{ExportFormat, ExportRecord, ExportStatus, NewExport};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::ExportRecordEntity;
use crate::metrics::QueryTimer;

const EXPORT_COLUMNS: &str = "id, user_id, format, status, file_path, file_size, error_message, \
                              created_at, updated_at, completed_at";

/// Repository for export record database operations.
#[derive(Clone)]
pub struct ExportRecordRepository {
    pool: PgPool,
}

impl ExportRecordRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new export in processing status.
    pub async fn create(
        &self,
        export: &NewExport,
        now: DateTime<Utc>,
    ) -> Result<ExportRecord, sqlx::Error> {
        let timer = QueryTimer::new("create_export");
        let result = sqlx::query_as::<_, ExportRecordEntity>(&format!(
            r#"
            INSERT INTO exports (id, user_id, format, status, created_at, updated_at)
            VALUES ($1, $2, $3, 'processing', $4, $4)
            RETURNING {EXPORT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(export.user_id)
        .bind(export.format.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        Ok(entity_to_domain(result?))
    }

    /// Find an export by id.
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<ExportRecord>, sqlx::Error> {
        let timer = QueryTimer::new("find_export_by_id");
        let result = sqlx::query_as::<_, ExportRecordEntity>(&format!(
            r#"
            SELECT {EXPORT_COLUMNS}
            FROM exports
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?.map(entity_to_domain))
    }

    /// List a user's exports newest first, keyset-paginated on (created_at, id).
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        status: Option<ExportStatus>,
        limit: i64,
        after: Option<(DateTime<Utc>, Uuid)>,
    ) -> Result<Vec<ExportRecord>, sqlx::Error> {
        let timer = QueryTimer::new("list_exports_for_user");
        let (after_created, after_id) = after.unzip();
        let result = sqlx::query_as::<_, ExportRecordEntity>(&format!(
            r#"
            SELECT {EXPORT_COLUMNS}
            FROM exports
            WHERE user_id = $1
              AND status <> 'deleted'
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR (created_at, id) < ($3, $4))
            ORDER BY created_at DESC, id DESC
            LIMIT $5
            "#
        ))
        .bind(user_id)
        .bind(status.map(|s| s.as_str()))
        .bind(after_created)
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        Ok(result?.into_iter().map(entity_to_domain).collect())
    }

    /// Move a user's export to `to` when its status is one of `from`.
    pub async fn transition_status(
        &self,
        id: Uuid,
        user_id: Uuid,
        from: &[ExportStatus],
        to: ExportStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let timer = QueryTimer::new("transition_export_status");
        let result = sqlx::query(
            r#"
            UPDATE exports
            SET status = $3, updated_at = $4
            WHERE id = $1 AND user_id = $2 AND status = ANY($5)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(to.as_str())
        .bind(now)
        .bind(&from)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected() > 0)
    }

    /// Mark a processing export completed.
    pub async fn mark_completed(
        &self,
        id: Uuid,
        file_path: &str,
        file_size: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ExportRecord>, sqlx::Error> {
        let timer = QueryTimer::new("mark_export_completed");
        let result = sqlx::query_as::<_, ExportRecordEntity>(&format!(
            r#"
            UPDATE exports
            SET status = 'completed', file_path = $2, file_size = $3,
                updated_at = $4, completed_at = $4
            WHERE id = $1 AND status = 'processing'
            RETURNING {EXPORT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(file_path)
        .bind(file_size)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?.map(entity_to_domain))
    }

    /// Mark a processing export failed.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ExportRecord>, sqlx::Error> {
        let timer = QueryTimer::new("mark_export_failed");
        let result = sqlx::query_as::<_, ExportRecordEntity>(&format!(
            r#"
            UPDATE exports
            SET status = 'failed', error_message = $2, updated_at = $3
            WHERE id = $1 AND status = 'processing'
            RETURNING {EXPORT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(error_message)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        Ok(result?.map(entity_to_domain))
    }
}

fn entity_to_domain(entity: ExportRecordEntity) -> ExportRecord {
    let status = entity.status.parse().unwrap_or_else(|_| {
        tracing::warn!(export_id = %entity.id, status = %entity.status, "Unknown export status");
        ExportStatus::Failed
    });
    let format = entity.format.parse().unwrap_or(ExportFormat::Json);

    ExportRecord {
        id: entity.id,
        user_id: entity.user_id,
        format,
        status,
        file_path: entity.file_path,
        file_size: entity.file_size,
        error_message: entity.error_message,
        created_at: entity.created_at,
        updated_at: entity.updated_at,
        completed_at: entity.completed_at,
    }
}
