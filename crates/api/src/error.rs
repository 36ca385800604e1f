//! HTTP error mapping. Each handler returns `Result<_, ApiError>`; this maps
//! the typed errors from the lower crates onto a status code and a JSON body,
//! using the stable error-string prefixes the lower crates guarantee in
//! their `Display` impls rather than re-deriving user-facing text.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] engine::EngineError),

    #[error(transparent)]
    Commit(#[from] commit::CommitError),

    #[error(transparent)]
    Db(#[from] db::DbError),

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let status = match &self {
            ApiError::Engine(engine::EngineError::WorkflowNotFound) => StatusCode::NOT_FOUND,
            ApiError::Engine(engine::EngineError::NoOutput) => StatusCode::CONFLICT,
            ApiError::Engine(engine::EngineError::CannotCancel { .. }) => StatusCode::CONFLICT,
            ApiError::Engine(engine::EngineError::NoDriver) => StatusCode::CONFLICT,
            ApiError::Engine(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Commit(commit::CommitError::EmptyCommands) => StatusCode::BAD_REQUEST,
            ApiError::Commit(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Db(db::DbError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
