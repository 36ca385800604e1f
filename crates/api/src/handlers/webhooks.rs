//! `/webhook/:path` — an alternate way to trigger a workflow: the request
//! body is the same `CreateWorkflowRequest` shape `workflows::create`
//! accepts, and the workflow is spawned immediately rather than left
//! `pending`. `path` is carried only as the commit's `op_id` for traceability
//! — there is no separate trigger-registration table.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use commit::ExecuteOpts;

use super::workflows::{build_commands, CreateWorkflowRequest};
use crate::error::ApiError;
use crate::AppState;

pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let dataflow_id = Uuid::new_v4();
    let commands = build_commands(dataflow_id, &req);

    tracing::info!(%path, %dataflow_id, "webhook trigger");
    state.commit.execute(dataflow_id, format!("webhook:{path}"), commands, ExecuteOpts::default()).await?;

    let (_pid, _done) = engine::spawn(state.commit.clone(), state.process.clone(), state.nodes.clone(), dataflow_id)?;

    Ok(Json(json!({ "dataflow_id": dataflow_id, "status": "running" })))
}
