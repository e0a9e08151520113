use super::{org_route, Ids};
use crate::{
    document::models::Part,
    error::PartdeskError,
    org::OrgContext,
    project::{
        self,
        models::{Project, ProjectSummary},
    },
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            &org_route("projects"),
            get(list_projects).post(create_project),
        )
        .route(
            &org_route("projects/:project_id"),
            get(get_project).put(update_project).delete(delete_project),
        )
        .route(
            &org_route("projects/:project_id/parts"),
            get(list_parts).post(add_parts),
        )
        .route(
            &org_route("projects/:project_id/parts/remove"),
            post(remove_parts),
        )
}

#[derive(Debug, Deserialize)]
struct ProjectPath {
    project_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ProjectBody {
    name: String,
    description: Option<String>,
}

async fn list_projects(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> Result<Json<Vec<ProjectSummary>>, PartdeskError> {
    Ok(Json(state.projects.list_projects(ctx.organization_id).await?))
}

async fn create_project(
    State(state): State<AppState>,
    ctx: OrgContext,
    Json(body): Json<ProjectBody>,
) -> Result<(StatusCode, Json<Project>), PartdeskError> {
    let name = project::validate_name(&body.name)?;
    let description = project::normalize_description(body.description.as_deref());

    let project = state
        .projects
        .insert_project(ctx.organization_id, ctx.user_id, name, description)
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(ProjectPath { project_id }): Path<ProjectPath>,
) -> Result<Json<Project>, PartdeskError> {
    Ok(Json(
        state
            .projects
            .get_project(ctx.organization_id, project_id)
            .await?,
    ))
}

async fn update_project(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(ProjectPath { project_id }): Path<ProjectPath>,
    Json(body): Json<ProjectBody>,
) -> Result<Json<Project>, PartdeskError> {
    let name = project::validate_name(&body.name)?;
    let description = project::normalize_description(body.description.as_deref());

    Ok(Json(
        state
            .projects
            .update_project(ctx.organization_id, project_id, name, description)
            .await?,
    ))
}

async fn delete_project(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(ProjectPath { project_id }): Path<ProjectPath>,
) -> Result<StatusCode, PartdeskError> {
    state
        .projects
        .delete_project(ctx.organization_id, project_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_parts(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(ProjectPath { project_id }): Path<ProjectPath>,
) -> Result<Json<Vec<Part>>, PartdeskError> {
    // Unknown projects are a 404, not an empty list.
    state
        .projects
        .get_project(ctx.organization_id, project_id)
        .await?;

    Ok(Json(
        state
            .projects
            .list_parts(ctx.organization_id, project_id)
            .await?,
    ))
}

async fn add_parts(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(ProjectPath { project_id }): Path<ProjectPath>,
    Json(Ids { ids }): Json<Ids>,
) -> Result<Json<Value>, PartdeskError> {
    let added = state
        .projects
        .add_parts(ctx.organization_id, ctx.user_id, project_id, &ids)
        .await?;
    Ok(Json(json!({ "added": added })))
}

async fn remove_parts(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(ProjectPath { project_id }): Path<ProjectPath>,
    Json(Ids { ids }): Json<Ids>,
) -> Result<Json<Value>, PartdeskError> {
    let removed = state
        .projects
        .remove_parts(ctx.organization_id, project_id, &ids)
        .await?;
    Ok(Json(json!({ "removed": removed })))
}
