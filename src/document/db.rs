use super::models::{
    Document, DocumentRow, DocumentStatus, Part, PartComment, PartRow, PartTag,
};
use crate::{error::PartdeskError, live::PartSource};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

/// Selects a part joined with its parent document through `document_parts`.
/// Expects the aliases `dp`, `p` and `d`.
pub(crate) const PART_COLUMNS: &str = r#"
    p.id, p.organization_id, d.id AS document_id, d.file_name AS document_file_name,
    p.name, p.class, p.material, p.complexity, p.fit_level, p.company,
    p.workflow_status, p.priority, p.created_at, p.last_updated
"#;

pub(crate) const PART_JOIN: &str = r#"
    FROM document_parts dp
    INNER JOIN parts p ON p.id = dp.part_id
    INNER JOIN documents d ON d.id = dp.document_id
"#;

#[derive(Debug, Clone)]
pub struct DocumentDb {
    pool: sqlx::PgPool,
}

impl DocumentDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_documents(&self, org: Uuid) -> Result<Vec<Document>, PartdeskError> {
        sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE organization_id = $1 ORDER BY created_at DESC",
        )
        .bind(org)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Document::try_from)
        .collect()
    }

    pub async fn get_document(&self, org: Uuid, id: Uuid) -> Result<Document, PartdeskError> {
        sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE id = $1 AND organization_id = $2",
        )
        .bind(id)
        .bind(org)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PartdeskError::NotFound(format!("document {id}")))?
        .try_into()
    }

    /// Register an uploaded document. The pipeline picks it up from the `queued` state.
    pub async fn insert_document(
        &self,
        org: Uuid,
        file_name: &str,
        bucket: &str,
        storage_key: &str,
    ) -> Result<Document, PartdeskError> {
        sqlx::query_as::<_, DocumentRow>(
            r#"
            INSERT INTO documents(organization_id, file_name, bucket, storage_key, status)
            VALUES($1, $2, $3, $4, 'queued')
            RETURNING *
            "#,
        )
        .bind(org)
        .bind(file_name)
        .bind(bucket)
        .bind(storage_key)
        .fetch_one(&self.pool)
        .await?
        .try_into()
    }

    /// Removes the document together with its links and parts.
    pub async fn delete_document(&self, org: Uuid, id: Uuid) -> Result<(), PartdeskError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(org)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PartdeskError::NotFound(format!("document {id}")));
        }

        debug!("Deleted document {id}");
        Ok(())
    }

    pub async fn get_part(&self, org: Uuid, id: Uuid) -> Result<Part, PartdeskError> {
        let query = format!("SELECT {PART_COLUMNS} {PART_JOIN} WHERE p.id = $1 AND dp.organization_id = $2");
        sqlx::query_as::<_, PartRow>(&query)
            .bind(id)
            .bind(org)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PartdeskError::NotFound(format!("part {id}")))?
            .try_into()
    }

    pub async fn list_tags(&self, org: Uuid, part: Uuid) -> Result<Vec<PartTag>, PartdeskError> {
        Ok(sqlx::query_as::<_, PartTag>(
            "SELECT part_id, tag FROM part_tags WHERE part_id = $1 AND organization_id = $2 ORDER BY tag",
        )
        .bind(part)
        .bind(org)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn add_tag(&self, org: Uuid, part: Uuid, tag: &str) -> Result<(), PartdeskError> {
        sqlx::query(
            "INSERT INTO part_tags(part_id, organization_id, tag) VALUES($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(part)
        .bind(org)
        .bind(tag)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_tag(&self, org: Uuid, part: Uuid, tag: &str) -> Result<(), PartdeskError> {
        sqlx::query("DELETE FROM part_tags WHERE part_id = $1 AND organization_id = $2 AND tag = $3")
            .bind(part)
            .bind(org)
            .bind(tag)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_comments(
        &self,
        org: Uuid,
        part: Uuid,
    ) -> Result<Vec<PartComment>, PartdeskError> {
        Ok(sqlx::query_as::<_, PartComment>(
            r#"
            SELECT id, part_id, user_id, body, created_at FROM part_comments
            WHERE part_id = $1 AND organization_id = $2
            ORDER BY created_at
            "#,
        )
        .bind(part)
        .bind(org)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn add_comment(
        &self,
        org: Uuid,
        user: Uuid,
        part: Uuid,
        body: &str,
    ) -> Result<PartComment, PartdeskError> {
        Ok(sqlx::query_as::<_, PartComment>(
            r#"
            INSERT INTO part_comments(part_id, organization_id, user_id, body)
            VALUES($1, $2, $3, $4)
            RETURNING id, part_id, user_id, body, created_at
            "#,
        )
        .bind(part)
        .bind(org)
        .bind(user)
        .bind(body)
        .fetch_one(&self.pool)
        .await?)
    }
}

#[async_trait]
impl PartSource for DocumentDb {
    async fn part_page(
        &self,
        org: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Part>, PartdeskError> {
        let query = format!(
            "SELECT {PART_COLUMNS} {PART_JOIN}
             WHERE dp.organization_id = $1
             ORDER BY p.last_updated DESC, p.id
             OFFSET $2 LIMIT $3"
        );

        sqlx::query_as::<_, PartRow>(&query)
            .bind(org)
            .bind(offset)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Part::try_from)
            .collect()
    }

    async fn pending_documents(&self, org: Uuid) -> Result<Vec<Document>, PartdeskError> {
        let statuses = DocumentStatus::PENDING
            .iter()
            .map(|s| s.as_str().to_string())
            .collect::<Vec<_>>();

        sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE organization_id = $1 AND status = ANY($2)",
        )
        .bind(org)
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Document::try_from)
        .collect()
    }

    async fn document_parts(&self, org: Uuid, document: Uuid) -> Result<Vec<Part>, PartdeskError> {
        let query = format!(
            "SELECT {PART_COLUMNS} {PART_JOIN}
             WHERE dp.document_id = $1 AND dp.organization_id = $2"
        );

        sqlx::query_as::<_, PartRow>(&query)
            .bind(document)
            .bind(org)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Part::try_from)
            .collect()
    }
}
