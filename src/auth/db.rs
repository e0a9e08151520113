use super::models::Session;
use crate::error::PartdeskError;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AuthDb {
    pool: sqlx::PgPool,
}

impl AuthDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the session only if it has not expired yet.
    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, PartdeskError> {
        Ok(sqlx::query_as::<_, Session>(
            "SELECT id, user_id, expires FROM sessions WHERE id = $1 AND expires > NOW()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?)
    }
}
