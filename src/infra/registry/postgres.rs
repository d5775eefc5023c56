//! Credential registry over the `resource_credential` table.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::core::budget::ResourceId;
use crate::core::error::StoreError;
use crate::core::executor::{Credential, CredentialRegistry};

/// Reads access tokens from `resource_credential`.
#[derive(Clone)]
pub struct PostgresCredentialRegistry {
    pool: PgPool,
}

impl PostgresCredentialRegistry {
    /// Use an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store or replace a resource's token.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn upsert(&self, resource_id: ResourceId, token: &str) -> Result<(), StoreError> {
        sqlx::query(
            r"
INSERT INTO resource_credential (resource_id, access_token, updated_at) VALUES ($1, $2, NOW())
ON CONFLICT (resource_id) DO UPDATE SET access_token = EXCLUDED.access_token, updated_at = NOW()",
        )
        .bind(resource_id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every resource with a non-empty token.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn resource_ids(&self) -> Result<Vec<ResourceId>, StoreError> {
        let rows: Vec<(ResourceId,)> = sqlx::query_as(
            "SELECT resource_id FROM resource_credential \
             WHERE access_token IS NOT NULL AND access_token <> '' ORDER BY resource_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl CredentialRegistry for PostgresCredentialRegistry {
    async fn credentials(
        &self,
        resource_ids: &[ResourceId],
    ) -> Result<HashMap<ResourceId, Credential>, StoreError> {
        if resource_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            r"
SELECT resource_id, access_token FROM resource_credential
WHERE resource_id = ANY($1) AND access_token IS NOT NULL AND access_token <> ''",
        )
        .bind(resource_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut found = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: ResourceId = row.try_get("resource_id")?;
            let token: String = row.try_get("access_token")?;
            found.insert(id, Credential::new(token));
        }
        Ok(found)
    }
}
