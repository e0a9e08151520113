use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum PartdeskError {
    #[error("{0}")]
    IO(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Uuid(#[from] uuid::Error),

    #[error("{0}")]
    Task(#[from] tokio::task::JoinError),

    /// Invalid or missing startup configuration.
    #[error("Configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Remote(String),
}

impl IntoResponse for PartdeskError {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            PartdeskError::Validation(_) | PartdeskError::Uuid(_) | PartdeskError::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            PartdeskError::Unauthorized => StatusCode::UNAUTHORIZED,
            PartdeskError::Forbidden => StatusCode::FORBIDDEN,
            PartdeskError::NotFound(_) => StatusCode::NOT_FOUND,
            PartdeskError::Conflict(_) => StatusCode::CONFLICT,
            PartdeskError::Remote(_) | PartdeskError::Http(_) => StatusCode::BAD_GATEWAY,
            PartdeskError::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            PartdeskError::IO(_)
            | PartdeskError::Database(_)
            | PartdeskError::Migrate(_)
            | PartdeskError::Task(_)
            | PartdeskError::Config(_) => {
                error!("{self}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
