use crate::document::models::text_enum;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

text_enum!(Role {
    Owner => "owner",
    Admin => "admin",
    Member => "member",
});

impl Role {
    pub fn can_manage(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    pub user_id: Uuid,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Database model
#[derive(Debug, sqlx::FromRow)]
pub struct MemberRow {
    pub user_id: Uuid,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invite {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub role: Role,
    /// Only handed out once, to the inviter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub invited_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Invite {
    /// Accepting an invite a second time must not touch the membership again.
    pub fn is_pending(&self) -> bool {
        self.accepted_at.is_none()
    }
}

/// Database model
#[derive(Debug, sqlx::FromRow)]
pub struct InviteRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub role: String,
    pub token: String,
    pub invited_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrgProfile {
    pub id: Uuid,
    pub name: String,
    pub company: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An organization as listed for one of its members.
#[derive(Debug, Clone, Serialize)]
pub struct Membership {
    pub organization_id: Uuid,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, sqlx::FromRow)]
pub struct MembershipRow {
    pub organization_id: Uuid,
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, Serialize, sqlx::FromRow)]
pub struct Usage {
    pub documents_count: i64,
    pub parts_count: i64,
    pub period_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BillingStatus {
    pub plan: String,
    pub status: String,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl Default for BillingStatus {
    fn default() -> Self {
        Self {
            plan: "free".to_string(),
            status: "inactive".to_string(),
            current_period_end: None,
        }
    }
}

impl TryFrom<MemberRow> for Member {
    type Error = crate::error::PartdeskError;

    fn try_from(value: MemberRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: value.user_id,
            role: value.role.parse()?,
            created_at: value.created_at,
        })
    }
}

impl TryFrom<MembershipRow> for Membership {
    type Error = crate::error::PartdeskError;

    fn try_from(value: MembershipRow) -> Result<Self, Self::Error> {
        Ok(Self {
            organization_id: value.organization_id,
            name: value.name,
            role: value.role.parse()?,
        })
    }
}

impl TryFrom<InviteRow> for Invite {
    type Error = crate::error::PartdeskError;

    fn try_from(value: InviteRow) -> Result<Self, Self::Error> {
        let InviteRow {
            id,
            organization_id,
            email,
            role,
            token: _,
            invited_by,
            created_at,
            accepted_at,
        } = value;

        Ok(Self {
            id,
            organization_id,
            email,
            role: role.parse()?,
            token: None,
            invited_by,
            created_at,
            accepted_at,
        })
    }
}
