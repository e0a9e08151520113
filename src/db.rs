use crate::error::PartdeskError;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Postgres error code for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

pub async fn create_pool(url: &str) -> Result<PgPool, PartdeskError> {
    Ok(PgPoolOptions::new().max_connections(16).connect(url).await?)
}

pub async fn migrate(pool: &PgPool) -> Result<(), PartdeskError> {
    sqlx::migrate!().run(pool).await?;
    Ok(())
}

/// Whether the error is a uniqueness constraint violation. Used to treat repeated
/// idempotent inserts as successful.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(e) => e.code().is_some_and(|code| code == UNIQUE_VIOLATION),
        _ => false,
    }
}

/// Swallow uniqueness violations, propagate everything else.
pub fn ignore_unique_violation(
    result: Result<sqlx::postgres::PgQueryResult, sqlx::Error>,
) -> Result<u64, PartdeskError> {
    match result {
        Ok(res) => Ok(res.rows_affected()),
        Err(e) if is_unique_violation(&e) => Ok(0),
        Err(e) => Err(e.into()),
    }
}
