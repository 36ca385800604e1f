//! Command engine — applies an ordered batch of [`db::models::Command`]s to
//! a workflow inside an already-open transaction.
//!
//! This crate owns no connection of its own; callers (the `commit` crate)
//! open the transaction, call [`apply_commands`], and commit or roll back.

pub mod error;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

pub use error::OpsError;

use db::models::{
    Command, CreateDataPayload, CreateNodePayload, CreateWorkflowPayload, DataType,
    DeleteDataPayload, DeleteNodePayload, DeleteWorkflowPayload, NodeStatus, UpdateDataPayload,
    UpdateNodePayload, UpdateWorkflowPayload, WorkflowStatus, DEFAULT_CONTENT_TYPE,
};

/// The outcome of a single applied command, carrying enough detail for the
/// `commit` crate to derive its publish-contract events without a second
/// database round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_kind: &'static str,
    pub is_node_op: bool,
    pub is_workflow_op: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_node_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataflow_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CommandResult {
    fn empty(kind: &'static str) -> Self {
        Self {
            command_kind: kind,
            is_node_op: false,
            is_workflow_op: false,
            node_id: None,
            parent_node_id: None,
            node_type: None,
            status: None,
            metadata: None,
            deleted: false,
            dataflow_id: None,
            data_id: None,
            updated_at: None,
        }
    }
}

/// Result of a whole batch: every per-command result, whether any row was
/// actually mutated, and the caller-supplied `op_id` echoed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpBatchResult {
    pub results: Vec<CommandResult>,
    pub changes_made: bool,
    pub op_id: String,
}

/// Infer a content type from a JSON value the way the node runtime SDK does:
/// objects and arrays ("tables") are `application/json`, strings are
/// `text/plain`, everything else falls back to `application/json`.
pub fn infer_content_type(content: &serde_json::Value) -> &'static str {
    match content {
        serde_json::Value::String(_) => "text/plain",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Shallow-merge law: every key present in `new` overwrites the key in
/// `old`; keys only in `old` survive. Nested objects are replaced wholesale,
/// never merged recursively. Falls back to replacing `old` with `new`
/// entirely when either side isn't a JSON object.
pub fn merge_metadata(old: &serde_json::Value, new: &serde_json::Value) -> serde_json::Value {
    match (old, new) {
        (serde_json::Value::Object(old_map), serde_json::Value::Object(new_map)) => {
            let mut merged = old_map.clone();
            for (k, v) in new_map {
                merged.insert(k.clone(), v.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => new.clone(),
    }
}

/// Resolve the metadata value to store given the `Option<Value>` on an
/// update payload and the `merge_metadata` flag. `None` means "leave
/// untouched" (signalled back to the caller as `None` too).
fn resolve_metadata_update(
    existing: &serde_json::Value,
    incoming: &Option<serde_json::Value>,
    merge: bool,
) -> Option<serde_json::Value> {
    match incoming {
        None => None,
        Some(serde_json::Value::Null) => Some(serde_json::Value::Null),
        Some(new_value) if merge => Some(merge_metadata(existing, new_value)),
        Some(new_value) => Some(new_value.clone()),
    }
}

/// Apply an ordered batch of commands to `dataflow_id` inside `tx`.
///
/// `APPLY_COMMIT` commands are expanded in place: the referenced commit's
/// commands are spliced into the execution sequence immediately after the
/// `APPLY_COMMIT` entry, followed by an implicit `UPDATE_WORKFLOW
/// {last_commit_id}`, and the whole expansion continues to consume index
/// numbers from the same counter used for error messages.
pub async fn apply_commands(
    tx: &mut Transaction<'_, Postgres>,
    dataflow_id: Uuid,
    op_id: impl Into<String>,
    commands: Vec<Command>,
) -> Result<OpBatchResult, OpsError> {
    let op_id = op_id.into();
    let mut queue: VecDeque<Command> = commands.into_iter().collect();
    let mut index = 0usize;
    let mut results = Vec::new();
    let mut changes_made = false;
    let mut saw_create_workflow = false;

    while let Some(command) = queue.pop_front() {
        if matches!(command, Command::CreateWorkflow(_)) {
            saw_create_workflow = true;
        }

        if let Command::ApplyCommit(payload) = &command {
            let commit_id = payload.commit_id;
            let commit_row = db::repository::commits::get_commit(&mut **tx, dataflow_id, commit_id)
                .await
                .map_err(|source| OpsError::Database { index, source })?
                .ok_or(OpsError::CommitNotFound { index })?;

            let commit_payload = commit_row
                .payload()
                .map_err(|e| OpsError::InvalidPayload { index, message: e.to_string() })?;

            let mut expansion: Vec<Command> = commit_payload.commands;
            expansion.push(Command::UpdateWorkflow(UpdateWorkflowPayload {
                dataflow_id,
                status: None,
                last_commit_id: Some(commit_id),
                metadata: None,
                merge_metadata: true,
            }));
            for command in expansion.into_iter().rev() {
                queue.push_front(command);
            }

            index += 1;
            continue;
        }

        let (result, changed) = apply_single(tx, dataflow_id, command, index).await?;
        if changed {
            changes_made = true;
        }
        results.push(result);
        index += 1;
    }

    if changes_made && !saw_create_workflow {
        db::repository::workflows::touch_updated_at(&mut **tx, dataflow_id)
            .await
            .map_err(|source| OpsError::Database { index, source })?;
    }

    Ok(OpBatchResult { results, changes_made, op_id })
}

async fn apply_single(
    tx: &mut Transaction<'_, Postgres>,
    dataflow_id: Uuid,
    command: Command,
    index: usize,
) -> Result<(CommandResult, bool), OpsError> {
    match command {
        Command::CreateNode(payload) => create_node(tx, dataflow_id, payload, index).await,
        Command::UpdateNode(payload) => update_node(tx, payload, index).await,
        Command::DeleteNode(payload) => delete_node(tx, payload, index).await,
        Command::CreateData(payload) => create_data(tx, dataflow_id, payload, index).await,
        Command::UpdateData(payload) => update_data(tx, payload, index).await,
        Command::DeleteData(payload) => delete_data(tx, payload, index).await,
        Command::CreateWorkflow(payload) => create_workflow(tx, payload, index).await,
        Command::UpdateWorkflow(payload) => update_workflow(tx, payload, index).await,
        Command::DeleteWorkflow(payload) => delete_workflow(tx, payload, index).await,
        Command::ApplyCommit(_) => unreachable!("ApplyCommit is expanded before reaching apply_single"),
    }
}

async fn create_node(
    tx: &mut Transaction<'_, Postgres>,
    dataflow_id: Uuid,
    payload: CreateNodePayload,
    index: usize,
) -> Result<(CommandResult, bool), OpsError> {
    let node_id = payload.node_id.unwrap_or_else(Uuid::new_v4);
    let status = payload.status.unwrap_or(NodeStatus::Pending);

    let row = db::repository::nodes::insert_node(
        &mut **tx,
        node_id,
        dataflow_id,
        payload.parent_node_id,
        &payload.node_type,
        status.as_str(),
        payload.config,
        payload.metadata,
    )
    .await
    .map_err(|source| OpsError::Database { index, source })?;

    let mut result = CommandResult::empty("CREATE_NODE");
    result.is_node_op = true;
    result.node_id = Some(row.node_id);
    result.parent_node_id = row.parent_node_id;
    result.node_type = Some(row.node_type);
    result.status = Some(row.status);
    result.metadata = Some(row.metadata);
    result.dataflow_id = Some(dataflow_id);
    result.updated_at = Some(row.updated_at);
    Ok((result, true))
}

async fn update_node(
    tx: &mut Transaction<'_, Postgres>,
    payload: UpdateNodePayload,
    index: usize,
) -> Result<(CommandResult, bool), OpsError> {
    let existing = db::repository::nodes::get_node_for_update(&mut **tx, payload.node_id)
        .await
        .map_err(|source| OpsError::Database { index, source })?
        .ok_or(OpsError::NodeNotFound { index })?;

    let metadata = resolve_metadata_update(&existing.metadata, &payload.metadata, payload.merge_metadata);
    let status_str = payload.status.map(|s| s.as_str());

    let affected = db::repository::nodes::update_node(
        &mut **tx,
        payload.node_id,
        status_str,
        payload.config.clone(),
        metadata.clone(),
    )
    .await
    .map_err(|source| OpsError::Database { index, source })?;

    if affected == 0 {
        return Err(OpsError::NodeNotFound { index });
    }

    let row = db::repository::nodes::get_node(&mut **tx, payload.node_id)
        .await
        .map_err(|source| OpsError::Database { index, source })?
        .ok_or(OpsError::NodeNotFound { index })?;

    let mut result = CommandResult::empty("UPDATE_NODE");
    result.is_node_op = true;
    result.node_id = Some(row.node_id);
    result.parent_node_id = row.parent_node_id;
    result.node_type = Some(row.node_type);
    result.status = Some(row.status);
    result.metadata = Some(row.metadata);
    result.dataflow_id = Some(row.dataflow_id);
    result.updated_at = Some(row.updated_at);
    Ok((result, true))
}

async fn delete_node(
    tx: &mut Transaction<'_, Postgres>,
    payload: DeleteNodePayload,
    index: usize,
) -> Result<(CommandResult, bool), OpsError> {
    let existing = db::repository::nodes::get_node(&mut **tx, payload.node_id)
        .await
        .map_err(|source| OpsError::Database { index, source })?;

    let affected = db::repository::nodes::delete_node(&mut **tx, payload.node_id)
        .await
        .map_err(|source| OpsError::Database { index, source })?;

    let mut result = CommandResult::empty("DELETE_NODE");
    result.is_node_op = true;
    result.node_id = Some(payload.node_id);
    result.deleted = affected > 0;
    if let Some(row) = existing {
        result.parent_node_id = row.parent_node_id;
        result.node_type = Some(row.node_type);
        result.dataflow_id = Some(row.dataflow_id);
    }
    Ok((result, affected > 0))
}

async fn create_data(
    tx: &mut Transaction<'_, Postgres>,
    dataflow_id: Uuid,
    payload: CreateDataPayload,
    index: usize,
) -> Result<(CommandResult, bool), OpsError> {
    let data_id = payload.data_id.unwrap_or_else(Uuid::new_v4);
    let content_type = payload.content_type.clone().unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    let row = db::repository::data::insert_data(
        &mut **tx,
        data_id,
        dataflow_id,
        payload.node_id,
        payload.data_type.as_str(),
        payload.discriminator.as_deref(),
        payload.key.as_deref(),
        payload.content,
        &content_type,
        payload.metadata,
    )
    .await
    .map_err(|source| OpsError::Database { index, source })?;

    let mut result = CommandResult::empty("CREATE_DATA");
    result.data_id = Some(row.data_id);
    result.node_id = row.node_id;
    result.dataflow_id = Some(dataflow_id);
    result.updated_at = Some(row.created_at);
    Ok((result, true))
}

async fn update_data(
    tx: &mut Transaction<'_, Postgres>,
    payload: UpdateDataPayload,
    index: usize,
) -> Result<(CommandResult, bool), OpsError> {
    let existing = db::repository::data::get_data(&mut **tx, payload.data_id)
        .await
        .map_err(|source| OpsError::Database { index, source })?
        .ok_or(OpsError::DataNotFound { index })?;

    let metadata = resolve_metadata_update(&existing.metadata, &payload.metadata, payload.merge_metadata);

    let affected = db::repository::data::update_data(&mut **tx, payload.data_id, payload.content, metadata)
        .await
        .map_err(|source| OpsError::Database { index, source })?;

    if affected == 0 {
        return Err(OpsError::DataNotFound { index });
    }

    let mut result = CommandResult::empty("UPDATE_DATA");
    result.data_id = Some(payload.data_id);
    result.node_id = existing.node_id;
    result.dataflow_id = Some(existing.dataflow_id);
    Ok((result, true))
}

async fn delete_data(
    tx: &mut Transaction<'_, Postgres>,
    payload: DeleteDataPayload,
    index: usize,
) -> Result<(CommandResult, bool), OpsError> {
    let existing = db::repository::data::get_data(&mut **tx, payload.data_id)
        .await
        .map_err(|source| OpsError::Database { index, source })?;

    let affected = db::repository::data::delete_data(&mut **tx, payload.data_id)
        .await
        .map_err(|source| OpsError::Database { index, source })?;

    let mut result = CommandResult::empty("DELETE_DATA");
    result.data_id = Some(payload.data_id);
    result.deleted = affected > 0;
    if let Some(row) = existing {
        result.node_id = row.node_id;
        result.dataflow_id = Some(row.dataflow_id);
    }
    Ok((result, affected > 0))
}

async fn create_workflow(
    tx: &mut Transaction<'_, Postgres>,
    payload: CreateWorkflowPayload,
    index: usize,
) -> Result<(CommandResult, bool), OpsError> {
    let dataflow_id = payload.dataflow_id.unwrap_or_else(Uuid::new_v4);
    let status = payload.status.unwrap_or(WorkflowStatus::Pending);

    let row = db::repository::workflows::insert_workflow(
        &mut **tx,
        dataflow_id,
        payload.parent_dataflow_id,
        &payload.actor_id,
        &payload.workflow_type,
        status.as_str(),
        payload.metadata,
    )
    .await
    .map_err(|source| OpsError::Database { index, source })?;

    let mut result = CommandResult::empty("CREATE_WORKFLOW");
    result.is_workflow_op = true;
    result.dataflow_id = Some(row.dataflow_id);
    result.status = Some(row.status);
    result.metadata = Some(row.metadata);
    result.updated_at = Some(row.updated_at);
    Ok((result, true))
}

async fn update_workflow(
    tx: &mut Transaction<'_, Postgres>,
    payload: UpdateWorkflowPayload,
    index: usize,
) -> Result<(CommandResult, bool), OpsError> {
    let existing = db::repository::workflows::get_workflow_for_update(&mut **tx, payload.dataflow_id)
        .await
        .map_err(|source| match source {
            db::DbError::NotFound => OpsError::WorkflowNotFound { index },
            other => OpsError::Database { index, source: other },
        })?;

    if existing.status().is_terminal() {
        if let Some(new_status) = payload.status {
            if new_status != existing.status() {
                return Err(OpsError::WorkflowTerminal { index, status: existing.status.clone() });
            }
        }
    }

    let metadata = resolve_metadata_update(&existing.metadata, &payload.metadata, payload.merge_metadata);
    let status_str = payload.status.map(|s| s.as_str());

    let affected = db::repository::workflows::update_workflow(
        &mut **tx,
        payload.dataflow_id,
        status_str,
        payload.last_commit_id,
        metadata,
    )
    .await
    .map_err(|source| OpsError::Database { index, source })?;

    if affected == 0 {
        return Err(OpsError::WorkflowNotFound { index });
    }

    let row = db::repository::workflows::get_workflow(&mut **tx, payload.dataflow_id)
        .await
        .map_err(|source| match source {
            db::DbError::NotFound => OpsError::WorkflowNotFound { index },
            other => OpsError::Database { index, source: other },
        })?;

    let mut result = CommandResult::empty("UPDATE_WORKFLOW");
    result.is_workflow_op = true;
    result.dataflow_id = Some(row.dataflow_id);
    result.status = Some(row.status);
    result.metadata = Some(row.metadata);
    result.updated_at = Some(row.updated_at);
    Ok((result, true))
}

async fn delete_workflow(
    tx: &mut Transaction<'_, Postgres>,
    payload: DeleteWorkflowPayload,
    index: usize,
) -> Result<(CommandResult, bool), OpsError> {
    db::repository::workflows::delete_workflow(&mut **tx, payload.dataflow_id)
        .await
        .map_err(|source| match source {
            db::DbError::NotFound => OpsError::WorkflowNotFound { index },
            other => OpsError::Database { index, source: other },
        })?;

    let mut result = CommandResult::empty("DELETE_WORKFLOW");
    result.is_workflow_op = true;
    result.dataflow_id = Some(payload.dataflow_id);
    result.deleted = true;
    Ok((result, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrites_only_present_keys() {
        let old = serde_json::json!({"a": 1, "b": 2});
        let new = serde_json::json!({"b": 3, "c": 4});
        let merged = merge_metadata(&old, &new);
        assert_eq!(merged, serde_json::json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn merge_does_not_recurse_into_nested_objects() {
        let old = serde_json::json!({"nested": {"x": 1, "y": 2}});
        let new = serde_json::json!({"nested": {"y": 3}});
        let merged = merge_metadata(&old, &new);
        assert_eq!(merged, serde_json::json!({"nested": {"y": 3}}));
    }

    #[test]
    fn infer_content_type_distinguishes_tables_and_strings() {
        assert_eq!(infer_content_type(&serde_json::json!({"a": 1})), "application/json");
        assert_eq!(infer_content_type(&serde_json::json!("hello")), "text/plain");
        assert_eq!(infer_content_type(&serde_json::json!([1, 2, 3])), "application/json");
    }

    #[test]
    fn resolve_metadata_update_null_clears() {
        let existing = serde_json::json!({"a": 1});
        let resolved = resolve_metadata_update(&existing, &Some(serde_json::Value::Null), true);
        assert_eq!(resolved, Some(serde_json::Value::Null));
    }

    #[test]
    fn resolve_metadata_update_none_leaves_untouched() {
        let existing = serde_json::json!({"a": 1});
        let resolved = resolve_metadata_update(&existing, &None, true);
        assert_eq!(resolved, None);
    }

    #[test]
    fn resolve_metadata_update_replaces_when_merge_disabled() {
        let existing = serde_json::json!({"a": 1});
        let new = serde_json::json!({"b": 2});
        let resolved = resolve_metadata_update(&existing, &Some(new.clone()), false);
        assert_eq!(resolved, Some(new));
    }
}
