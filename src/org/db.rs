use super::models::{
    BillingStatus, Invite, InviteRow, Member, MemberRow, Membership, MembershipRow, OrgProfile,
    Role, Usage,
};
use crate::error::PartdeskError;
use chrono::Utc;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrgDb {
    pool: sqlx::PgPool,
}

impl OrgDb {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn member_role(&self, org: Uuid, user: Uuid) -> Result<Option<Role>, PartdeskError> {
        sqlx::query_scalar::<_, String>(
            "SELECT role FROM organization_members WHERE organization_id = $1 AND user_id = $2",
        )
        .bind(org)
        .bind(user)
        .fetch_optional(&self.pool)
        .await?
        .map(|role| role.parse())
        .transpose()
    }

    pub async fn list_organizations(&self, user: Uuid) -> Result<Vec<Membership>, PartdeskError> {
        sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT m.organization_id, p.name, m.role
            FROM organization_members m
            INNER JOIN organization_profiles p ON p.id = m.organization_id
            WHERE m.user_id = $1
            ORDER BY p.name
            "#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Membership::try_from)
        .collect()
    }

    pub async fn list_members(&self, org: Uuid) -> Result<Vec<Member>, PartdeskError> {
        sqlx::query_as::<_, MemberRow>(
            "SELECT user_id, role, created_at FROM organization_members WHERE organization_id = $1 ORDER BY created_at",
        )
        .bind(org)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Member::try_from)
        .collect()
    }

    /// Adds the membership unless the user already is a member.
    pub async fn insert_member(&self, org: Uuid, user: Uuid, role: Role) -> Result<(), PartdeskError> {
        sqlx::query(
            r#"
            INSERT INTO organization_members(organization_id, user_id, role)
            VALUES($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(org)
        .bind(user)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_member_role(
        &self,
        org: Uuid,
        user: Uuid,
        role: Role,
    ) -> Result<(), PartdeskError> {
        sqlx::query(
            "UPDATE organization_members SET role = $1 WHERE organization_id = $2 AND user_id = $3",
        )
        .bind(role.as_str())
        .bind(org)
        .bind(user)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_member(&self, org: Uuid, user: Uuid) -> Result<(), PartdeskError> {
        sqlx::query("DELETE FROM organization_members WHERE organization_id = $1 AND user_id = $2")
            .bind(org)
            .bind(user)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_invite(
        &self,
        org: Uuid,
        email: &str,
        role: Role,
        token: &str,
        invited_by: Uuid,
    ) -> Result<Invite, PartdeskError> {
        let row = sqlx::query_as::<_, InviteRow>(
            r#"
            INSERT INTO organization_invites(organization_id, email, role, token, invited_by)
            VALUES($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(org)
        .bind(email)
        .bind(role.as_str())
        .bind(token)
        .bind(invited_by)
        .fetch_one(&self.pool)
        .await?;

        let token = row.token.clone();
        let mut invite = Invite::try_from(row)?;
        invite.token = Some(token);
        Ok(invite)
    }

    pub async fn list_pending_invites(&self, org: Uuid) -> Result<Vec<Invite>, PartdeskError> {
        sqlx::query_as::<_, InviteRow>(
            r#"
            SELECT * FROM organization_invites
            WHERE organization_id = $1 AND accepted_at IS NULL
            ORDER BY created_at DESC
            "#,
        )
        .bind(org)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Invite::try_from)
        .collect()
    }

    pub async fn get_invite_by_token(&self, token: &str) -> Result<Option<Invite>, PartdeskError> {
        sqlx::query_as::<_, InviteRow>("SELECT * FROM organization_invites WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .map(Invite::try_from)
            .transpose()
    }

    /// Mark the invite accepted and add the membership in one transaction.
    pub async fn accept_invite(&self, invite: &Invite, user: Uuid) -> Result<(), PartdeskError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO organization_members(organization_id, user_id, role)
            VALUES($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(invite.organization_id)
        .bind(user)
        .bind(invite.role.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE organization_invites SET accepted_at = $1 WHERE id = $2 AND accepted_at IS NULL",
        )
        .bind(Utc::now())
        .bind(invite.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Invite {} accepted by {user}", invite.id);
        Ok(())
    }

    pub async fn delete_invite(&self, org: Uuid, id: Uuid) -> Result<(), PartdeskError> {
        let result =
            sqlx::query("DELETE FROM organization_invites WHERE id = $1 AND organization_id = $2")
                .bind(id)
                .bind(org)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(PartdeskError::NotFound(format!("invite {id}")));
        }
        Ok(())
    }

    pub async fn get_profile(&self, org: Uuid) -> Result<OrgProfile, PartdeskError> {
        sqlx::query_as::<_, OrgProfile>("SELECT * FROM organization_profiles WHERE id = $1")
            .bind(org)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PartdeskError::NotFound(format!("organization {org}")))
    }

    pub async fn update_profile(
        &self,
        org: Uuid,
        name: &str,
        company: Option<&str>,
    ) -> Result<OrgProfile, PartdeskError> {
        Ok(sqlx::query_as::<_, OrgProfile>(
            r#"
            UPDATE organization_profiles SET name = $1, company = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(company)
        .bind(org)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn usage(&self, org: Uuid) -> Result<Usage, PartdeskError> {
        Ok(sqlx::query_as::<_, Usage>(
            r#"
            SELECT documents_count, parts_count, period_start
            FROM organization_usage WHERE organization_id = $1
            "#,
        )
        .bind(org)
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or_default())
    }

    pub async fn billing(&self, org: Uuid) -> Result<BillingStatus, PartdeskError> {
        Ok(sqlx::query_as::<_, BillingStatus>(
            r#"
            SELECT plan, status, current_period_end
            FROM organization_billing WHERE organization_id = $1
            "#,
        )
        .bind(org)
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or_default())
    }
}
