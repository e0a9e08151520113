use super::org_route;
use crate::{error::PartdeskError, live::Snapshot, org::OrgContext, state::AppState};
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route(&org_route("live"), get(snapshot))
        .route(&org_route("live/stream"), get(stream))
        .route(&org_route("live/more"), post(load_more))
}

async fn snapshot(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> Result<Json<Arc<Snapshot>>, PartdeskError> {
    let session = state.live.session(ctx.organization_id);
    Ok(Json(session.loaded().await?))
}

/// Every snapshot the session publishes, starting with the current one.
async fn stream(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let session = state.live.session(ctx.organization_id);
    let snapshots = WatchStream::new(session.watch());

    debug!("{} subscribed to {}", ctx.user_id, ctx.organization_id);

    // The stream holds on to the session, it lives as long as somebody watches.
    let events = snapshots.map(move |snapshot| {
        let _session = &session;
        Event::default().event("snapshot").json_data(&*snapshot)
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
struct LoadedMore {
    loaded: usize,
    snapshot: Arc<Snapshot>,
}

async fn load_more(
    State(state): State<AppState>,
    ctx: OrgContext,
) -> Result<Json<LoadedMore>, PartdeskError> {
    let session = state.live.session(ctx.organization_id);
    session.loaded().await?;

    let loaded = session.load_more().await?;
    Ok(Json(LoadedMore {
        loaded,
        snapshot: session.snapshot(),
    }))
}
