use crate::{
    auth::{models::AuthUser, Auth},
    error::PartdeskError,
    i18n,
    org::{self, models::Membership},
    state::AppState,
};
use axum::{
    extract::{Path, Request, State},
    http::Method,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

mod documents;
mod live;
mod orgs;
mod parts;
mod projects;

/// Prefix of every organization scoped route.
const ORG: &str = "/:lang/orgs/:org_id";

fn org_route(path: &str) -> String {
    format!("{ORG}/{path}")
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .merge(authenticated_router(state.clone()))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn authenticated_router(state: AppState) -> Router {
    Router::new()
        .route("/:lang/orgs", get(list_organizations))
        .route("/:lang/invites/:token/accept", post(accept_invite))
        .merge(live::routes())
        .merge(parts::routes())
        .merge(documents::routes())
        .merge(projects::routes())
        .merge(orgs::routes())
        // Outermost runs first, the language is settled before authentication.
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            session_check,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.languages.clone(),
            i18n::language,
        ))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn session_check(
    State(auth): State<Auth>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, PartdeskError> {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return Err(PartdeskError::Unauthorized);
    };

    let user = auth.authenticate(bearer.token()).await?;
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

async fn list_organizations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Membership>>, PartdeskError> {
    Ok(Json(state.orgs.list_organizations(user.user_id).await?))
}

#[derive(Debug, Deserialize)]
struct InvitePath {
    token: String,
}

#[derive(Debug, Serialize)]
struct Joined {
    organization_id: Uuid,
}

async fn accept_invite(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(InvitePath { token }): Path<InvitePath>,
) -> Result<Json<Joined>, PartdeskError> {
    let organization_id = org::accept_invite(&state.orgs, user.user_id, &token).await?;
    Ok(Json(Joined { organization_id }))
}

/// Request body naming a batch of parts.
#[derive(Debug, Deserialize)]
struct Ids {
    ids: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Config, FeedConfig, UploadConfig},
        live::feed::ChangeFeed,
    };
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    fn app() -> Router {
        // Never connects unless a handler reaches the database.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://partdesk@localhost/partdesk")
            .unwrap();

        let config = Config {
            page_size: 50,
            functions_url: "http://localhost:54321/functions/v1".to_string(),
            languages: vec!["en".to_string(), "de".to_string()],
            default_language: "en".to_string(),
            upload: UploadConfig::default(),
            feed: FeedConfig::default(),
            live_idle_secs: 300,
        };

        router(AppState::new(pool, config, ChangeFeed::new()))
    }

    #[tokio::test]
    async fn health_needs_no_session() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn org_routes_require_a_bearer_token() {
        let uri = format!("/en/orgs/{}/live", Uuid::new_v4());
        let response = app()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn malformed_tokens_are_rejected_without_a_lookup() {
        let uri = format!("/en/orgs/{}/parts", Uuid::new_v4());
        let response = app()
            .oneshot(
                Request::get(uri)
                    .header(header::AUTHORIZATION, "Bearer not-a-session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unsupported_language_redirects_to_negotiated_prefix() {
        let org = Uuid::new_v4();
        let response = app()
            .oneshot(
                Request::get(format!("/xx/orgs/{org}/parts?sort=name"))
                    .header(header::ACCEPT_LANGUAGE, "fr, de-CH;q=0.8")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers()[header::LOCATION],
            format!("/de/orgs/{org}/parts?sort=name")
        );
    }

    #[tokio::test]
    async fn language_cookie_beats_the_browser() {
        let response = app()
            .oneshot(
                Request::get("/xx/orgs")
                    .header(header::COOKIE, "lang=de")
                    .header(header::ACCEPT_LANGUAGE, "en")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/de/orgs");
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let response = app()
            .oneshot(Request::get("/nothing/here/at/all/x").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
