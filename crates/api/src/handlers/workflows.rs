//! `/api/v1/workflows` — create, list, fetch, delete.
//!
//! `CreateWorkflowRequest` doubles as the body accepted by the webhook
//! trigger endpoint; [`build_commands`] is shared by both.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use commit::ExecuteOpts;
use db::models::{
    Command, CreateDataPayload, CreateNodePayload, CreateWorkflowPayload, DataType, DeleteWorkflowPayload,
    WorkflowRow,
};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NodeSpec {
    #[serde(default)]
    pub node_id: Option<Uuid>,
    #[serde(default)]
    pub parent_node_id: Option<Uuid>,
    pub node_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct InputSpec {
    pub node_id: Uuid,
    #[serde(default)]
    pub key: Option<String>,
    pub content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub actor_id: String,
    pub workflow_type: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
}

/// `CREATE_WORKFLOW` + one `CREATE_NODE` per declared node + one
/// `CREATE_DATA` (`node_input`) per declared input, in one batch so the
/// workflow's nodes are immediately ready to evaluate.
pub fn build_commands(dataflow_id: Uuid, req: &CreateWorkflowRequest) -> Vec<Command> {
    let mut commands = vec![Command::CreateWorkflow(CreateWorkflowPayload {
        dataflow_id: Some(dataflow_id),
        parent_dataflow_id: None,
        actor_id: req.actor_id.clone(),
        workflow_type: req.workflow_type.clone(),
        metadata: req.metadata.clone(),
        status: None,
    })];

    for node in &req.nodes {
        commands.push(Command::CreateNode(CreateNodePayload {
            node_id: node.node_id,
            parent_node_id: node.parent_node_id,
            node_type: node.node_type.clone(),
            config: node.config.clone(),
            metadata: node.metadata.clone(),
            status: None,
        }));
    }

    for input in &req.inputs {
        commands.push(Command::CreateData(CreateDataPayload {
            data_id: None,
            node_id: Some(input.node_id),
            data_type: DataType::NodeInput,
            discriminator: None,
            key: input.key.clone(),
            content: input.content.clone(),
            content_type: None,
            metadata: serde_json::json!({}),
        }));
    }

    commands
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<WorkflowRow>>, ApiError> {
    Ok(Json(db::repository::workflows::list_workflows(state.commit.db()).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowRow>), ApiError> {
    let dataflow_id = Uuid::new_v4();
    let commands = build_commands(dataflow_id, &req);

    state.commit.execute(dataflow_id, Uuid::new_v4().to_string(), commands, ExecuteOpts::default()).await?;
    let workflow = db::repository::workflows::get_workflow(state.commit.db(), dataflow_id).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<WorkflowRow>, ApiError> {
    Ok(Json(db::repository::workflows::get_workflow(state.commit.db(), id).await?))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    state
        .commit
        .execute(
            id,
            "api:delete-workflow",
            vec![Command::DeleteWorkflow(DeleteWorkflowPayload { dataflow_id: id })],
            ExecuteOpts::default(),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
