use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Session model
#[derive(Debug, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expires: DateTime<Utc>,
}

/// The caller of an authenticated request. Inserted into the request extensions
/// by the session check.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,

    /// The raw bearer token, forwarded to the billing functions.
    pub token: String,
}
