use self::{db::AuthDb, models::AuthUser};
use crate::error::PartdeskError;
use tracing::debug;
use uuid::Uuid;

pub mod db;
pub mod models;

/// Resolves bearer tokens issued by the external identity provider to users.
/// Tokens are session ids in the `sessions` table.
#[derive(Debug, Clone)]
pub struct Auth {
    db: AuthDb,
}

impl Auth {
    pub fn new(db: AuthDb) -> Self {
        Self { db }
    }

    pub async fn authenticate(&self, token: &str) -> Result<AuthUser, PartdeskError> {
        let Some(session_id) = parse_token(token) else {
            debug!("Rejecting malformed bearer token");
            return Err(PartdeskError::Unauthorized);
        };

        let session = self
            .db
            .get_session(session_id)
            .await?
            .ok_or(PartdeskError::Unauthorized)?;

        Ok(AuthUser {
            user_id: session.user_id,
            token: token.to_string(),
        })
    }
}

fn parse_token(token: &str) -> Option<Uuid> {
    Uuid::parse_str(token.trim()).ok()
}
