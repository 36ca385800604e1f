//! `/api/v1/workflows/:id/{start,execute,output,status,cancel,terminate}` —
//! the orchestrator-facing operations.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(30);

/// Spawn the orchestrator and return immediately; the workflow continues
/// running in the background.
pub async fn start(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>, ApiError> {
    let (_pid, _done) = engine::spawn(state.commit.clone(), state.process.clone(), state.nodes.clone(), id)?;
    Ok(Json(json!({ "dataflow_id": id, "status": "running" })))
}

/// Spawn the orchestrator and block until it reaches a terminal status,
/// returning the workflow's output when it succeeded.
pub async fn execute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (_pid, done) = engine::spawn(state.commit.clone(), state.process.clone(), state.nodes.clone(), id)?;
    let status = done
        .await
        .map_err(|_| ApiError::BadRequest("orchestrator exited without reporting a result".to_string()))??;

    let output = if status == db::models::WorkflowStatus::CompletedSuccess {
        engine::output(&state.commit, id).await.ok()
    } else {
        None
    };

    Ok(Json(json!({ "dataflow_id": id, "status": status.as_str(), "output": output })))
}

pub async fn output(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(engine::output(&state.commit, id).await?))
}

pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let workflow = db::repository::workflows::get_workflow(state.commit.db(), id).await?;
    Ok(Json(json!({ "dataflow_id": id, "status": workflow.status().as_str() })))
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>, ApiError> {
    let message = engine::cancel(&state.commit, &state.process, id, DEFAULT_CANCEL_TIMEOUT).await?;
    Ok(Json(json!({ "dataflow_id": id, "message": message })))
}

pub async fn terminate(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    engine::terminate(&state.commit, &state.process, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
