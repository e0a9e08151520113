use self::{
    db::OrgDb,
    models::{Invite, Member, OrgProfile, Role},
};
use crate::{auth::models::AuthUser, error::PartdeskError, state::AppState};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

pub mod db;
pub mod models;

const INVITE_TOKEN_LEN: usize = 32;

/// The organization a request operates on, together with the caller's role in it.
///
/// Only obtainable through the extractor, which verifies membership, so holding one
/// means the caller may read the organization's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrgContext {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
}

impl OrgContext {
    pub fn require_admin(&self) -> Result<(), PartdeskError> {
        if self.role.can_manage() {
            Ok(())
        } else {
            Err(PartdeskError::Forbidden)
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrgPath {
    org_id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for OrgContext {
    type Rejection = PartdeskError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(PartdeskError::Unauthorized)?;

        let Path(OrgPath { org_id }) = Path::<OrgPath>::from_request_parts(parts, state)
            .await
            .map_err(|e| PartdeskError::Validation(e.body_text()))?;

        let Some(role) = state.orgs.member_role(org_id, user.user_id).await? else {
            debug!("{} is not a member of {org_id}", user.user_id);
            return Err(PartdeskError::Forbidden);
        };

        Ok(Self {
            organization_id: org_id,
            user_id: user.user_id,
            role,
        })
    }
}

/// Fails if applying `new_role` to `target` (`None` meaning removal) would leave the
/// organization without an owner.
pub fn ensure_owner_remains(
    members: &[Member],
    target: Uuid,
    new_role: Option<Role>,
) -> Result<(), PartdeskError> {
    let Some(member) = members.iter().find(|m| m.user_id == target) else {
        return Err(PartdeskError::NotFound(format!("member {target}")));
    };

    if member.role != Role::Owner || new_role == Some(Role::Owner) {
        return Ok(());
    }

    let owners = members.iter().filter(|m| m.role == Role::Owner).count();
    if owners <= 1 {
        return Err(PartdeskError::Conflict(
            "an organization needs at least one owner".to_string(),
        ));
    }

    Ok(())
}

pub fn generate_invite_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INVITE_TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub fn validate_email(email: &str) -> Result<(), PartdeskError> {
    let invalid = || PartdeskError::Validation(format!("invalid email address: '{email}'"));

    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;

    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }

    Ok(())
}

pub async fn change_role(
    ctx: &OrgContext,
    db: &OrgDb,
    user: Uuid,
    role: Role,
) -> Result<(), PartdeskError> {
    ctx.require_admin()?;

    // Admins cannot hand out ownership.
    if role == Role::Owner && ctx.role != Role::Owner {
        return Err(PartdeskError::Forbidden);
    }

    let members = db.list_members(ctx.organization_id).await?;
    ensure_owner_remains(&members, user, Some(role))?;

    db.update_member_role(ctx.organization_id, user, role).await?;
    info!(
        "{} changed role of {user} in {} to {}",
        ctx.user_id,
        ctx.organization_id,
        role.as_str()
    );
    Ok(())
}

/// Owners and admins may remove anyone, members only themselves.
pub async fn remove_member(ctx: &OrgContext, db: &OrgDb, user: Uuid) -> Result<(), PartdeskError> {
    if user != ctx.user_id {
        ctx.require_admin()?;
    }

    let members = db.list_members(ctx.organization_id).await?;
    ensure_owner_remains(&members, user, None)?;

    db.delete_member(ctx.organization_id, user).await?;
    info!("{} removed {user} from {}", ctx.user_id, ctx.organization_id);
    Ok(())
}

pub async fn create_invite(
    ctx: &OrgContext,
    db: &OrgDb,
    email: &str,
    role: Role,
) -> Result<Invite, PartdeskError> {
    ctx.require_admin()?;
    validate_email(email)?;

    if role == Role::Owner && ctx.role != Role::Owner {
        return Err(PartdeskError::Forbidden);
    }

    let token = generate_invite_token();
    let invite = db
        .insert_invite(ctx.organization_id, email, role, &token, ctx.user_id)
        .await?;

    info!("Created invite {} for {}", invite.id, ctx.organization_id);
    Ok(invite)
}

/// Returns the organization joined. Accepting an already accepted invite changes
/// nothing.
pub async fn accept_invite(db: &OrgDb, user: Uuid, token: &str) -> Result<Uuid, PartdeskError> {
    let invite = db
        .get_invite_by_token(token)
        .await?
        .ok_or_else(|| PartdeskError::NotFound("invite".to_string()))?;

    if invite.is_pending() {
        db.accept_invite(&invite, user).await?;
    } else {
        debug!("Invite {} already accepted", invite.id);
    }

    Ok(invite.organization_id)
}

pub async fn revoke_invite(ctx: &OrgContext, db: &OrgDb, id: Uuid) -> Result<(), PartdeskError> {
    ctx.require_admin()?;
    db.delete_invite(ctx.organization_id, id).await
}

pub async fn update_profile(
    ctx: &OrgContext,
    db: &OrgDb,
    name: &str,
    company: Option<&str>,
) -> Result<OrgProfile, PartdeskError> {
    ctx.require_admin()?;

    let name = name.trim();
    if name.is_empty() {
        return Err(PartdeskError::Validation(
            "organization name cannot be empty".to_string(),
        ));
    }

    let company = company.map(str::trim).filter(|c| !c.is_empty());
    db.update_profile(ctx.organization_id, name, company).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn member(role: Role) -> Member {
        Member {
            user_id: Uuid::new_v4(),
            role,
            created_at: Utc::now(),
        }
    }

    fn ctx(role: Role) -> OrgContext {
        OrgContext {
            organization_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn admin_operations_need_owner_or_admin() {
        assert!(ctx(Role::Owner).require_admin().is_ok());
        assert!(ctx(Role::Admin).require_admin().is_ok());
        assert!(matches!(
            ctx(Role::Member).require_admin(),
            Err(PartdeskError::Forbidden)
        ));
    }

    #[test]
    fn last_owner_cannot_leave_or_be_demoted() {
        let owner = member(Role::Owner);
        let admin = member(Role::Admin);
        let members = vec![owner.clone(), admin.clone()];

        assert!(matches!(
            ensure_owner_remains(&members, owner.user_id, None),
            Err(PartdeskError::Conflict(_))
        ));
        assert!(matches!(
            ensure_owner_remains(&members, owner.user_id, Some(Role::Member)),
            Err(PartdeskError::Conflict(_))
        ));

        assert!(ensure_owner_remains(&members, owner.user_id, Some(Role::Owner)).is_ok());
        assert!(ensure_owner_remains(&members, admin.user_id, None).is_ok());
    }

    #[test]
    fn one_of_several_owners_can_leave() {
        let a = member(Role::Owner);
        let b = member(Role::Owner);
        let members = vec![a.clone(), b];

        assert!(ensure_owner_remains(&members, a.user_id, None).is_ok());
    }

    #[test]
    fn unknown_member_is_not_found() {
        let members = vec![member(Role::Owner)];
        assert!(matches!(
            ensure_owner_remains(&members, Uuid::new_v4(), None),
            Err(PartdeskError::NotFound(_))
        ));
    }

    #[test]
    fn invite_tokens_are_random_alphanumerics() {
        let a = generate_invite_token();
        let b = generate_invite_token();

        assert_eq!(a.len(), INVITE_TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn email_validation() {
        for ok in ["jane@example.com", "a.b+c@sub.example.org"] {
            assert!(validate_email(ok).is_ok(), "{ok}");
        }

        for bad in [
            "",
            "jane",
            "@example.com",
            "jane@",
            "jane@example",
            "jane@@example.com",
            "jane doe@example.com",
            "jane@.com",
            "jane@example.",
        ] {
            assert!(validate_email(bad).is_err(), "{bad}");
        }
    }
}
