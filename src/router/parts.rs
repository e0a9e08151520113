use super::{org_route, Ids};
use crate::{
    actions::{self, BulkFavorite, Favorites},
    document::models::{Document, Part, PartComment, PartTag, Priority, WorkflowStatus},
    error::PartdeskError,
    org::OrgContext,
    parts::{PartsQuery, Selection},
    state::AppState,
};
use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use axum_macros::debug_handler;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route(&org_route("parts"), get(list_parts))
        .route(&org_route("parts/bulk/favorite"), post(bulk_favorite))
        .route(&org_route("parts/bulk/workflow"), post(bulk_workflow))
        .route(&org_route("parts/bulk/delete"), post(bulk_delete))
        .route(&org_route("parts/:part_id"), get(part_detail))
        .route(&org_route("parts/:part_id/favorite"), post(toggle_favorite))
        .route(&org_route("parts/:part_id/workflow"), put(set_workflow_status))
        .route(&org_route("parts/:part_id/priority"), put(set_priority))
        .route(&org_route("parts/:part_id/tags"), post(add_tag))
        .route(&org_route("parts/:part_id/tags/:tag"), delete(remove_tag))
        .route(&org_route("parts/:part_id/comments"), post(add_comment))
}

#[derive(Debug, Deserialize)]
struct PartPath {
    part_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct TagPath {
    part_id: Uuid,
    tag: String,
}

#[derive(Debug, Serialize)]
struct PartsListing {
    /// The normalized query, to be written back to the address bar.
    query: String,
    placeholders: Vec<Document>,
    parts: Vec<Part>,
    loading: bool,
    has_more: bool,
    error: Option<String>,
    selected: Vec<Uuid>,
    /// Selected parts the filter currently hides.
    hidden_selected: Vec<Uuid>,
}

/// The live view filtered and sorted by the query string. Placeholders are not
/// subject to the filter.
#[debug_handler]
async fn list_parts(
    State(state): State<AppState>,
    ctx: OrgContext,
    RawQuery(query): RawQuery,
) -> Result<Json<PartsListing>, PartdeskError> {
    let query = query.unwrap_or_default();
    let parts_query = PartsQuery::from_query(&query)?;
    let selection = Selection::from_query(&query)?;

    let session = state.live.session(ctx.organization_id);
    let snapshot = session.loaded().await?;

    let favorites = if parts_query.favorites_only {
        Favorites::load(&state.actions, &ctx).await?
    } else {
        Favorites::default()
    };

    let view = parts_query.apply(snapshot.parts(), favorites.as_set(), Utc::now());

    Ok(Json(PartsListing {
        query: parts_query.to_query(),
        placeholders: snapshot.placeholders().cloned().collect(),
        selected: selection.visible(&view),
        hidden_selected: selection.hidden(&view),
        parts: view.into_iter().cloned().collect(),
        loading: snapshot.loading,
        has_more: snapshot.has_more,
        error: snapshot.error.clone(),
    }))
}

#[derive(Debug, Serialize)]
struct PartDetail {
    part: Part,
    favorite: bool,
    tags: Vec<PartTag>,
    comments: Vec<PartComment>,
}

async fn part_detail(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(PartPath { part_id }): Path<PartPath>,
) -> Result<Json<PartDetail>, PartdeskError> {
    let org = ctx.organization_id;
    let part = state.documents.get_part(org, part_id).await?;
    let favorites = Favorites::load(&state.actions, &ctx).await?;

    Ok(Json(PartDetail {
        favorite: favorites.contains(&part.id),
        tags: state.documents.list_tags(org, part_id).await?,
        comments: state.documents.list_comments(org, part_id).await?,
        part,
    }))
}

async fn toggle_favorite(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(PartPath { part_id }): Path<PartPath>,
) -> Result<Json<Value>, PartdeskError> {
    let mut favorites = Favorites::load(&state.actions, &ctx).await?;
    let favorite = actions::toggle_favorite(&state.actions, &ctx, &mut favorites, part_id).await?;
    Ok(Json(json!({ "favorite": favorite })))
}

#[derive(Debug, Deserialize)]
struct WorkflowBody {
    workflow_status: WorkflowStatus,
}

async fn set_workflow_status(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(PartPath { part_id }): Path<PartPath>,
    Json(WorkflowBody { workflow_status }): Json<WorkflowBody>,
) -> Result<StatusCode, PartdeskError> {
    let view = state.live.existing(ctx.organization_id);
    actions::set_workflow_status(&view, &state.actions, &ctx, part_id, workflow_status).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct PriorityBody {
    priority: Priority,
}

async fn set_priority(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(PartPath { part_id }): Path<PartPath>,
    Json(PriorityBody { priority }): Json<PriorityBody>,
) -> Result<StatusCode, PartdeskError> {
    let view = state.live.existing(ctx.organization_id);
    actions::set_priority(&view, &state.actions, &ctx, part_id, priority).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct BulkFavoriteBody {
    ids: Vec<Uuid>,
    favorite: bool,
}

async fn bulk_favorite(
    State(state): State<AppState>,
    ctx: OrgContext,
    Json(body): Json<BulkFavoriteBody>,
) -> Result<Json<BulkFavorite>, PartdeskError> {
    let mut favorites = Favorites::load(&state.actions, &ctx).await?;
    let outcome = actions::bulk_favorite(
        &state.actions,
        &ctx,
        &mut favorites,
        &body.ids,
        body.favorite,
    )
    .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct BulkWorkflowBody {
    ids: Vec<Uuid>,
    workflow_status: WorkflowStatus,
}

async fn bulk_workflow(
    State(state): State<AppState>,
    ctx: OrgContext,
    Json(body): Json<BulkWorkflowBody>,
) -> Result<StatusCode, PartdeskError> {
    let view = state.live.existing(ctx.organization_id);
    actions::bulk_set_workflow_status(&view, &state.actions, &ctx, body.ids, body.workflow_status)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn bulk_delete(
    State(state): State<AppState>,
    ctx: OrgContext,
    Json(Ids { ids }): Json<Ids>,
) -> Result<Json<Value>, PartdeskError> {
    let view = state.live.existing(ctx.organization_id);
    let deleted = actions::bulk_delete_parts(&view, &state.actions, &ctx, ids).await?;
    info!("{} deleted {deleted} parts", ctx.user_id);
    Ok(Json(json!({ "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
struct TagBody {
    tag: String,
}

async fn add_tag(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(PartPath { part_id }): Path<PartPath>,
    Json(TagBody { tag }): Json<TagBody>,
) -> Result<StatusCode, PartdeskError> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(PartdeskError::Validation("tag cannot be empty".to_string()));
    }

    // Scope check, the part has to belong to the organization.
    state.documents.get_part(ctx.organization_id, part_id).await?;
    state
        .documents
        .add_tag(ctx.organization_id, part_id, tag)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_tag(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(TagPath { part_id, tag }): Path<TagPath>,
) -> Result<StatusCode, PartdeskError> {
    state
        .documents
        .remove_tag(ctx.organization_id, part_id, &tag)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CommentBody {
    body: String,
}

async fn add_comment(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(PartPath { part_id }): Path<PartPath>,
    Json(CommentBody { body }): Json<CommentBody>,
) -> Result<Json<PartComment>, PartdeskError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(PartdeskError::Validation(
            "comment cannot be empty".to_string(),
        ));
    }

    state.documents.get_part(ctx.organization_id, part_id).await?;
    let comment = state
        .documents
        .add_comment(ctx.organization_id, ctx.user_id, part_id, body)
        .await?;
    Ok(Json(comment))
}
