use super::org_route;
use crate::{
    auth::models::AuthUser,
    billing::SessionUrl,
    error::PartdeskError,
    org::{
        self,
        models::{BillingStatus, Invite, Member, OrgProfile, Role, Usage},
        OrgContext,
    },
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route(&org_route("members"), get(list_members))
        .route(
            &org_route("members/:user_id"),
            put(change_role).delete(remove_member),
        )
        .route(&org_route("invites"), get(list_invites).post(create_invite))
        .route(&org_route("invites/:invite_id"), delete(revoke_invite))
        .route(&org_route("profile"), get(get_profile).put(update_profile))
        .route(&org_route("usage"), get(usage))
        .route(&org_route("billing"), get(billing))
        .route(&org_route("billing/checkout"), post(checkout))
        .route(&org_route("billing/portal"), post(portal))
}

#[derive(Debug, Deserialize)]
struct MemberPath {
    user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct InvitePath {
    invite_id: Uuid,
}

async fn list_members(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> Result<Json<Vec<Member>>, PartdeskError> {
    Ok(Json(state.orgs.list_members(ctx.organization_id).await?))
}

#[derive(Debug, Deserialize)]
struct RoleBody {
    role: Role,
}

async fn change_role(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(MemberPath { user_id }): Path<MemberPath>,
    Json(RoleBody { role }): Json<RoleBody>,
) -> Result<StatusCode, PartdeskError> {
    org::change_role(&ctx, &state.orgs, user_id, role).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_member(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(MemberPath { user_id }): Path<MemberPath>,
) -> Result<StatusCode, PartdeskError> {
    org::remove_member(&ctx, &state.orgs, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_invites(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> Result<Json<Vec<Invite>>, PartdeskError> {
    ctx.require_admin()?;
    Ok(Json(
        state.orgs.list_pending_invites(ctx.organization_id).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct InviteBody {
    email: String,
    role: Role,
}

async fn create_invite(
    State(state): State<AppState>,
    ctx: OrgContext,
    Json(InviteBody { email, role }): Json<InviteBody>,
) -> Result<(StatusCode, Json<Invite>), PartdeskError> {
    let invite = org::create_invite(&ctx, &state.orgs, email.trim(), role).await?;
    Ok((StatusCode::CREATED, Json(invite)))
}

async fn revoke_invite(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(InvitePath { invite_id }): Path<InvitePath>,
) -> Result<StatusCode, PartdeskError> {
    org::revoke_invite(&ctx, &state.orgs, invite_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_profile(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> Result<Json<OrgProfile>, PartdeskError> {
    Ok(Json(state.orgs.get_profile(ctx.organization_id).await?))
}

#[derive(Debug, Deserialize)]
struct ProfileBody {
    name: String,
    company: Option<String>,
}

async fn update_profile(
    State(state): State<AppState>,
    ctx: OrgContext,
    Json(body): Json<ProfileBody>,
) -> Result<Json<OrgProfile>, PartdeskError> {
    Ok(Json(
        org::update_profile(&ctx, &state.orgs, &body.name, body.company.as_deref()).await?,
    ))
}

async fn usage(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> Result<Json<Usage>, PartdeskError> {
    Ok(Json(state.orgs.usage(ctx.organization_id).await?))
}

async fn billing(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> Result<Json<BillingStatus>, PartdeskError> {
    Ok(Json(state.orgs.billing(ctx.organization_id).await?))
}

/// Membership is verified by the context extractor before the functions are called.
async fn checkout(
    State(state): State<AppState>,
    ctx: OrgContext,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SessionUrl>, PartdeskError> {
    Ok(Json(
        state
            .billing
            .checkout_session(ctx.organization_id, &user.token)
            .await?,
    ))
}

async fn portal(
    State(state): State<AppState>,
    ctx: OrgContext,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SessionUrl>, PartdeskError> {
    Ok(Json(
        state
            .billing
            .portal_session(ctx.organization_id, &user.token)
            .await?,
    ))
}
