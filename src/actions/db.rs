use super::{FavoriteStore, PartStore};
use crate::{error::PartdeskError, live::PartPatch};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Write side for the part actions.
#[derive(Debug, Clone)]
pub struct ActionDb {
    pool: sqlx::PgPool,
}

impl ActionDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FavoriteStore for ActionDb {
    async fn favorites(&self, org: Uuid, user: Uuid) -> Result<HashSet<Uuid>, PartdeskError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT part_id FROM part_favorites WHERE organization_id = $1 AND user_id = $2",
        )
        .bind(org)
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }

    async fn insert_favorites(
        &self,
        org: Uuid,
        user: Uuid,
        parts: &[Uuid],
    ) -> Result<(), PartdeskError> {
        // Only parts of the organization can be marked.
        let result = sqlx::query(
            r#"
            INSERT INTO part_favorites(user_id, part_id, organization_id)
            SELECT $1, id, organization_id FROM parts
            WHERE organization_id = $2 AND id = ANY($3)
            ON CONFLICT (user_id, part_id) DO NOTHING
            "#,
        )
        .bind(user)
        .bind(org)
        .bind(parts)
        .execute(&self.pool)
        .await;

        let inserted = crate::db::ignore_unique_violation(result)?;
        debug!("Inserted {inserted} favorites for {user}");
        Ok(())
    }

    async fn delete_favorites(
        &self,
        org: Uuid,
        user: Uuid,
        parts: &[Uuid],
    ) -> Result<(), PartdeskError> {
        let result = sqlx::query(
            "DELETE FROM part_favorites WHERE organization_id = $1 AND user_id = $2 AND part_id = ANY($3)",
        )
        .bind(org)
        .bind(user)
        .bind(parts)
        .execute(&self.pool)
        .await?;

        debug!("Deleted {} favorites for {user}", result.rows_affected());
        Ok(())
    }
}

#[async_trait]
impl PartStore for ActionDb {
    async fn update_parts(
        &self,
        org: Uuid,
        parts: &[Uuid],
        patch: &PartPatch,
    ) -> Result<u64, PartdeskError> {
        let result = sqlx::query(
            r#"
            UPDATE parts SET
                workflow_status = COALESCE($1, workflow_status),
                priority = COALESCE($2, priority),
                last_updated = NOW()
            WHERE organization_id = $3 AND id = ANY($4)
            "#,
        )
        .bind(patch.workflow_status.map(|s| s.as_str()))
        .bind(patch.priority.map(|p| p.as_str()))
        .bind(org)
        .bind(parts)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_parts(&self, org: Uuid, parts: &[Uuid]) -> Result<u64, PartdeskError> {
        let result = sqlx::query("DELETE FROM parts WHERE organization_id = $1 AND id = ANY($2)")
            .bind(org)
            .bind(parts)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
