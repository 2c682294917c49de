//! Filter preference repository for database operations.

use domain::services::PreferenceStore;
use domain::StoreError;
use serde_json::Value;
use sqlx::PgPool;

use crate::entities::FilterPreferenceEntity;
use crate::metrics::QueryTimer;

/// Repository for persisted filter documents.
#[derive(Clone)]
pub struct FilterPreferenceRepository {
    pool: PgPool,
}

impl FilterPreferenceRepository {
    /// Create a new repository instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a document by key.
    pub async fn find(&self, key: &str) -> Result<Option<FilterPreferenceEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_filter_preference");
        let result = sqlx::query_as::<_, FilterPreferenceEntity>(
            r#"
            SELECT key, document, updated_at
            FROM filter_preferences
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Insert or replace a document.
    pub async fn upsert(&self, key: &str, document: &Value) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("upsert_filter_preference");
        let result = sqlx::query(
            r#"
            INSERT INTO filter_preferences (key, document, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE
            SET document = EXCLUDED.document, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(document)
        .execute(&self.pool)
        .await;
        timer.record();
        result.map(|_| ())
    }

    /// Delete a document. Returns whether a row was removed.
    pub async fn delete(&self, key: &str) -> Result<bool, sqlx::Error> {
        let timer = QueryTimer::new("delete_filter_preference");
        let result = sqlx::query(
            r#"
            DELETE FROM filter_preferences
            WHERE key = $1
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await;
        timer.record();
        Ok(result?.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl PreferenceStore for FilterPreferenceRepository {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.find(key).await?.map(|entity| entity.document))
    }

    async fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        Ok(self.upsert(key, value).await?)
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.delete(key).await?)
    }
}
