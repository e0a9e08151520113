use super::models::{Project, ProjectSummary};
use crate::{
    db::ignore_unique_violation,
    document::{
        db::{PART_COLUMNS, PART_JOIN},
        models::{Part, PartRow},
    },
    error::PartdeskError,
};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ProjectDb {
    pool: sqlx::PgPool,
}

impl ProjectDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_projects(&self, org: Uuid) -> Result<Vec<ProjectSummary>, PartdeskError> {
        Ok(sqlx::query_as::<_, ProjectSummary>(
            r#"
            SELECT p.id, p.name, p.description, p.created_at, COUNT(pp.part_id) AS part_count
            FROM projects p
            LEFT JOIN project_parts pp ON pp.project_id = p.id
            WHERE p.organization_id = $1
            GROUP BY p.id
            ORDER BY p.created_at DESC
            "#,
        )
        .bind(org)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn get_project(&self, org: Uuid, id: Uuid) -> Result<Project, PartdeskError> {
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(org)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PartdeskError::NotFound(format!("project {id}")))
    }

    pub async fn insert_project(
        &self,
        org: Uuid,
        user: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project, PartdeskError> {
        Ok(sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects(organization_id, name, description, created_by)
            VALUES($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(org)
        .bind(name)
        .bind(description)
        .bind(user)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn update_project(
        &self,
        org: Uuid,
        id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project, PartdeskError> {
        sqlx::query_as::<_, Project>(
            r#"
            UPDATE projects SET name = $1, description = $2
            WHERE id = $3 AND organization_id = $4
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(id)
        .bind(org)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PartdeskError::NotFound(format!("project {id}")))
    }

    pub async fn delete_project(&self, org: Uuid, id: Uuid) -> Result<(), PartdeskError> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(org)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PartdeskError::NotFound(format!("project {id}")));
        }
        Ok(())
    }

    /// Parts already in the project are left untouched. Returns the amount of parts
    /// added.
    pub async fn add_parts(
        &self,
        org: Uuid,
        user: Uuid,
        project: Uuid,
        parts: &[Uuid],
    ) -> Result<u64, PartdeskError> {
        // Scope check, both project and parts must belong to the organization.
        self.get_project(org, project).await?;

        let mut added = 0;
        for part in parts {
            let result = sqlx::query(
                r#"
                INSERT INTO project_parts(project_id, part_id, added_by)
                SELECT $1, id, $2 FROM parts WHERE id = $3 AND organization_id = $4
                "#,
            )
            .bind(project)
            .bind(user)
            .bind(part)
            .bind(org)
            .execute(&self.pool)
            .await;

            added += ignore_unique_violation(result)?;
        }

        debug!("Added {added} parts to project {project}");
        Ok(added)
    }

    pub async fn remove_parts(
        &self,
        org: Uuid,
        project: Uuid,
        parts: &[Uuid],
    ) -> Result<u64, PartdeskError> {
        let result = sqlx::query(
            r#"
            DELETE FROM project_parts pp
            USING projects p
            WHERE pp.project_id = p.id AND p.id = $1 AND p.organization_id = $2
              AND pp.part_id = ANY($3)
            "#,
        )
        .bind(project)
        .bind(org)
        .bind(parts)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn list_parts(&self, org: Uuid, project: Uuid) -> Result<Vec<Part>, PartdeskError> {
        let query = format!(
            "SELECT {PART_COLUMNS} {PART_JOIN}
             INNER JOIN project_parts pp ON pp.part_id = p.id
             WHERE pp.project_id = $1 AND dp.organization_id = $2
             ORDER BY pp.added_at DESC"
        );

        sqlx::query_as::<_, PartRow>(&query)
            .bind(project)
            .bind(org)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Part::try_from)
            .collect()
    }
}
