//! PostgreSQL call log sink writing to the `call_log` table.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::core::budget::ResourceId;
use crate::core::call_log::{CallLogEntry, CallLogSink};
use crate::core::error::StoreError;

/// Appends failed calls to `call_log`.
#[derive(Clone)]
pub struct PostgresCallLogSink {
    pool: PgPool,
}

impl PostgresCallLogSink {
    /// Use an existing pool; the schema comes from
    /// [`run_migrations`](crate::infra::store::postgres::run_migrations).
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Number of entries recorded for `resource_id`.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn count_for(&self, resource_id: ResourceId) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM call_log WHERE resource_id = $1")
            .bind(resource_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

#[async_trait]
impl CallLogSink for PostgresCallLogSink {
    async fn append(&self, entry: CallLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r"
INSERT INTO call_log (id, resource_id, endpoint, http_status, error_code, error_subcode, message, called_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.id)
        .bind(entry.resource_id)
        .bind(&entry.endpoint)
        .bind(entry.http_status.map(i32::from))
        .bind(entry.error_code)
        .bind(entry.error_subcode)
        .bind(&entry.message)
        .bind(entry.called_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
