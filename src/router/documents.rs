use super::org_route;
use crate::{
    document::{
        self,
        models::{Document, StorageObject},
        DOCUMENTS_BUCKET,
    },
    error::PartdeskError,
    org::OrgContext,
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            &org_route("documents"),
            get(list_documents).post(register_upload),
        )
        .route(
            &org_route("documents/:document_id"),
            get(get_document).delete(delete_document),
        )
}

#[derive(Debug, Deserialize)]
struct DocumentPath {
    document_id: Uuid,
}

async fn list_documents(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> Result<Json<Vec<Document>>, PartdeskError> {
    Ok(Json(state.documents.list_documents(ctx.organization_id).await?))
}

#[derive(Debug, Deserialize)]
struct UploadBody {
    file_name: String,
    size: u64,
}

#[derive(Debug, Serialize)]
struct Upload {
    document: Document,
    /// Where the client puts the bytes.
    upload: StorageObject,
}

/// Registers an upload. The bytes go straight to storage, the pipeline takes over
/// from the `queued` document.
async fn register_upload(
    State(state): State<AppState>,
    ctx: OrgContext,
    Json(UploadBody { file_name, size }): Json<UploadBody>,
) -> Result<(StatusCode, Json<Upload>), PartdeskError> {
    document::validate_upload(&file_name, size, &state.config.upload)?;

    let file_name = file_name.trim();
    let key = document::storage_key(ctx.organization_id, file_name);
    let document = state
        .documents
        .insert_document(ctx.organization_id, file_name, DOCUMENTS_BUCKET, &key)
        .await?;

    info!(
        "{} registered {} in {}",
        ctx.user_id, document.id, ctx.organization_id
    );

    let upload = document::raw_object(&document);
    Ok((StatusCode::CREATED, Json(Upload { document, upload })))
}

#[derive(Debug, Serialize)]
struct DocumentDetail {
    document: Document,
    download: StorageObject,
    thumbnail: Option<StorageObject>,
}

async fn get_document(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(DocumentPath { document_id }): Path<DocumentPath>,
) -> Result<Json<DocumentDetail>, PartdeskError> {
    let document = state
        .documents
        .get_document(ctx.organization_id, document_id)
        .await?;

    Ok(Json(DocumentDetail {
        download: document::raw_object(&document),
        thumbnail: document::thumbnail_object(&document),
        document,
    }))
}

async fn delete_document(
    State(state): State<AppState>,
    ctx: OrgContext,
    Path(DocumentPath { document_id }): Path<DocumentPath>,
) -> Result<StatusCode, PartdeskError> {
    state
        .documents
        .delete_document(ctx.organization_id, document_id)
        .await?;
    info!("{} deleted document {document_id}", ctx.user_id);
    Ok(StatusCode::NO_CONTENT)
}
