//! `NodeHandle` — the runtime SDK surface a [`crate::NodeFn`] runs against.

use std::collections::HashMap;

use commit::CommitLog;
use db::models::{
    Command, CreateDataPayload, CreateNodePayload, DataType, NodeConfig, NodeStatus,
    UpdateNodePayload,
};
use uuid::Uuid;

use crate::NodeError;

/// The default `code` field routed by [`NodeHandle::fail`] when the caller
/// didn't supply one of their own.
pub const DEFAULT_ERROR_CODE: &str = "FUNCTION_EXECUTION_FAILED";

/// Options accepted by [`NodeHandle::data`].
#[derive(Debug, Clone, Default)]
pub struct DataOpts {
    pub key: Option<String>,
    pub discriminator: Option<String>,
    pub content_type: Option<String>,
    pub metadata: serde_json::Value,
}

/// A child node definition passed to [`NodeHandle::with_child_nodes`].
#[derive(Debug, Clone)]
pub struct ChildNodeDef {
    pub node_id: Option<Uuid>,
    pub node_type: String,
    pub config: serde_json::Value,
    pub metadata: serde_json::Value,
}

/// Options accepted by [`NodeHandle::yield_`].
#[derive(Debug, Clone, Default)]
pub struct YieldOpts {
    pub content: serde_json::Value,
    pub discriminator: Option<String>,
}

/// The orchestrator's answer to a yield request: the terminal results of
/// every node in the child subgraph it ran on the node function's behalf.
#[derive(Debug, Clone, Default)]
pub struct YieldResult {
    pub run_node_results: HashMap<Uuid, serde_json::Value>,
}

/// The bundle returned by [`NodeHandle::complete`] / [`NodeHandle::fail`].
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub success: bool,
    pub data_ids: Vec<Uuid>,
    pub error: Option<serde_json::Value>,
}

/// What a node function ultimately did, recorded on the handle so the
/// orchestrator can read it back after `run` returns instead of relying on
/// the function's own return value.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success { data_ids: Vec<Uuid> },
    Failure { data_ids: Vec<Uuid>, error: serde_json::Value },
}

/// Owns everything a node function needs: its identity, its declared
/// routing targets, a local mutable copy of its metadata, a buffer of
/// not-yet-submitted commands, and a lazily-fetched cache of its inputs.
pub struct NodeHandle {
    node_id: Uuid,
    dataflow_id: Uuid,
    #[allow(dead_code)]
    parent_node_id: Option<Uuid>,
    config: NodeConfig,
    metadata: serde_json::Value,
    buffer: Vec<Command>,
    inputs: Option<HashMap<String, serde_json::Value>>,
    commit: CommitLog,
    outcome: Option<Outcome>,
}

impl NodeHandle {
    pub fn new(
        node_id: Uuid,
        dataflow_id: Uuid,
        parent_node_id: Option<Uuid>,
        config: NodeConfig,
        metadata: serde_json::Value,
        commit: CommitLog,
    ) -> Self {
        Self {
            node_id,
            dataflow_id,
            parent_node_id,
            config,
            metadata,
            buffer: Vec::new(),
            inputs: None,
            commit,
            outcome: None,
        }
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn dataflow_id(&self) -> Uuid {
        self.dataflow_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn current_metadata(&self) -> &serde_json::Value {
        &self.metadata
    }

    /// Consume the recorded terminal outcome, if `complete`/`fail` was
    /// called. `None` means the node function returned without routing —
    /// the orchestrator treats this as an implementation defect, not a
    /// semantic failure.
    pub fn take_outcome(&mut self) -> Option<Outcome> {
        self.outcome.take()
    }

    /// Lazily fetch and cache every `node_input` record for this node,
    /// keyed by `key` (the empty string included), with references
    /// resolved and replaced.
    pub async fn inputs(&mut self) -> Result<&HashMap<String, serde_json::Value>, NodeError> {
        if self.inputs.is_none() {
            let map = db::readers::DataReader::new(self.dataflow_id)
                .node_id(self.node_id)
                .data_type(DataType::NodeInput.as_str())
                .resolve_references(true)
                .replace_references(true)
                .input_map(self.commit.db())
                .await
                .map_err(|e| NodeError::Commit(e.to_string()))?;
            self.inputs = Some(map);
        }
        Ok(self.inputs.as_ref().expect("just populated"))
    }

    /// Convenience accessor over [`NodeHandle::inputs`]; errors when `key`
    /// isn't present.
    pub async fn input(&mut self, key: &str) -> Result<serde_json::Value, NodeError> {
        let inputs = self.inputs().await?;
        inputs.get(key).cloned().ok_or_else(|| NodeError::MissingInput(key.to_string()))
    }

    /// Buffer a `CREATE_DATA` command for this node. Chainable.
    pub fn data(&mut self, data_type: DataType, content: serde_json::Value, opts: DataOpts) -> &mut Self {
        let content_type = opts.content_type.unwrap_or_else(|| ops::infer_content_type(&content).to_string());
        self.buffer.push(Command::CreateData(CreateDataPayload {
            data_id: None,
            node_id: Some(self.node_id),
            data_type,
            discriminator: opts.discriminator,
            key: opts.key,
            content,
            content_type: Some(content_type),
            metadata: opts.metadata,
        }));
        self
    }

    /// Merge `patch` into the node's local metadata copy and buffer a
    /// single `UPDATE_NODE` replacing the stored metadata with the merged
    /// result. A no-op when `patch` is empty and nothing is already
    /// buffered.
    pub fn metadata(&mut self, patch: serde_json::Value) -> &mut Self {
        let patch_is_empty = matches!(&patch, serde_json::Value::Object(m) if m.is_empty());
        let has_buffered_update =
            self.buffer.iter().any(|c| matches!(c, Command::UpdateNode(u) if u.node_id == self.node_id));

        if patch_is_empty && !has_buffered_update {
            return self;
        }

        self.metadata = ops::merge_metadata(&self.metadata, &patch);
        self.buffer.retain(|c| !matches!(c, Command::UpdateNode(u) if u.node_id == self.node_id));
        self.buffer.push(Command::UpdateNode(UpdateNodePayload {
            node_id: self.node_id,
            status: None,
            config: None,
            metadata: Some(self.metadata.clone()),
            merge_metadata: false,
        }));
        self
    }

    /// Buffer one `CREATE_NODE` per definition, parented to this node by
    /// default, in `pending` status.
    pub fn with_child_nodes(&mut self, defs: Vec<ChildNodeDef>) -> &mut Self {
        for def in defs {
            self.buffer.push(Command::CreateNode(CreateNodePayload {
                node_id: def.node_id,
                parent_node_id: Some(self.node_id),
                node_type: def.node_type,
                config: def.config,
                metadata: def.metadata,
                status: Some(NodeStatus::Pending),
            }));
        }
        self
    }

    /// Flush the buffer as a single deferred-submit commit. The buffer is
    /// cleared on success and left untouched on failure so a caller can
    /// retry. An empty buffer is a no-op.
    pub async fn submit(&mut self) -> Result<Uuid, NodeError> {
        if self.buffer.is_empty() {
            return Ok(Uuid::nil());
        }

        let commands = self.buffer.clone();
        let commit_id = self
            .commit
            .submit(self.dataflow_id, Uuid::new_v4().to_string(), commands)
            .await
            .map_err(|e| NodeError::Commit(e.to_string()))?;

        self.buffer.clear();
        Ok(commit_id)
    }

    /// Produce a `node_yield` record, flush the buffer, then block on a
    /// reply from the orchestrator once it has run the requested child
    /// subgraph to completion.
    pub async fn yield_(&mut self, opts: YieldOpts) -> Result<YieldResult, NodeError> {
        self.buffer.push(Command::CreateData(CreateDataPayload {
            data_id: None,
            node_id: Some(self.node_id),
            data_type: DataType::NodeYield,
            discriminator: opts.discriminator,
            key: None,
            content: opts.content,
            content_type: None,
            metadata: serde_json::json!({}),
        }));
        self.submit().await?;

        let reply_topic = process::yield_reply_topic(self.node_id);
        let receiver = self.commit.process().listen_for_reply(&reply_topic);

        let sent = self.commit.process().send(
            &process::dataflow_mailbox(self.dataflow_id),
            "yield_request",
            serde_json::json!({ "node_id": self.node_id, "reply_topic": reply_topic }),
        );
        if !sent {
            return Err(NodeError::Commit("no driver listening on the workflow mailbox".to_string()));
        }

        let reply = receiver.wait().await.ok_or(NodeError::YieldReplyLost)?;
        let run_node_results = reply
            .get("run_node_results")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        Ok(YieldResult { run_node_results })
    }

    /// Route `output` via every `data_targets[]` descriptor (plus this
    /// node's own `node_result` record), flush the buffer, and record the
    /// success outcome.
    pub async fn complete(
        &mut self,
        output: serde_json::Value,
        message: Option<String>,
        meta: Option<serde_json::Value>,
    ) -> Result<NodeResult, NodeError> {
        if let Some(message) = &message {
            tracing::debug!(node_id = %self.node_id, message, "node completed");
        }

        let mut data_ids = Vec::new();
        let result_id = Uuid::new_v4();
        self.buffer.push(Command::CreateData(CreateDataPayload {
            data_id: Some(result_id),
            node_id: Some(self.node_id),
            data_type: DataType::NodeResult,
            discriminator: Some("result.success".to_string()),
            key: None,
            content: output.clone(),
            content_type: None,
            metadata: meta.unwrap_or_else(|| serde_json::json!({})),
        }));
        data_ids.push(result_id);

        for target in self.config.data_targets.clone() {
            let id = Uuid::new_v4();
            self.buffer.push(Command::CreateData(CreateDataPayload {
                data_id: Some(id),
                node_id: target.node_id,
                data_type: target.data_type,
                discriminator: target.discriminator,
                key: target.key,
                content: output.clone(),
                content_type: target.content_type,
                metadata: target.metadata.unwrap_or_else(|| serde_json::json!({})),
            }));
            data_ids.push(id);
        }

        self.submit().await?;
        self.outcome = Some(Outcome::Success { data_ids: data_ids.clone() });
        Ok(NodeResult { success: true, data_ids, error: None })
    }

    /// Route the error via every `error_targets[]` descriptor (plus this
    /// node's own `node_result` record), flush the buffer, and record the
    /// failure outcome.
    pub async fn fail(
        &mut self,
        error_details: serde_json::Value,
        message: Option<String>,
        meta: Option<serde_json::Value>,
    ) -> Result<NodeResult, NodeError> {
        let code = error_details
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_ERROR_CODE)
            .to_string();
        let error_obj = serde_json::json!({
            "code": code,
            "message": message.clone().unwrap_or_default(),
            "details": error_details,
        });

        if let Some(message) = &message {
            tracing::debug!(node_id = %self.node_id, message, "node failed");
        }

        let mut data_ids = Vec::new();
        let result_id = Uuid::new_v4();
        self.buffer.push(Command::CreateData(CreateDataPayload {
            data_id: Some(result_id),
            node_id: Some(self.node_id),
            data_type: DataType::NodeResult,
            discriminator: Some("result.error".to_string()),
            key: None,
            content: error_obj.clone(),
            content_type: None,
            metadata: meta.unwrap_or_else(|| serde_json::json!({})),
        }));
        data_ids.push(result_id);

        for target in self.config.error_targets.clone() {
            let id = Uuid::new_v4();
            self.buffer.push(Command::CreateData(CreateDataPayload {
                data_id: Some(id),
                node_id: target.node_id,
                data_type: target.data_type,
                discriminator: target.discriminator,
                key: target.key,
                content: error_obj.clone(),
                content_type: target.content_type,
                metadata: target.metadata.unwrap_or_else(|| serde_json::json!({})),
            }));
            data_ids.push(id);
        }

        self.submit().await?;
        self.outcome = Some(Outcome::Failure { data_ids: data_ids.clone(), error: error_obj.clone() });
        Ok(NodeResult { success: false, data_ids, error: Some(error_obj) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(config: NodeConfig) -> NodeHandle {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://invalid/invalid")
            .expect("lazy connect never touches the network");
        let commit_log = commit::CommitLog::new(pool, process::Registry::new());
        NodeHandle::new(Uuid::new_v4(), Uuid::new_v4(), None, config, serde_json::json!({}), commit_log)
    }

    #[test]
    fn metadata_patch_is_noop_when_empty_and_unbuffered() {
        let mut h = handle(NodeConfig::default());
        h.metadata(serde_json::json!({}));
        assert!(h.buffer.is_empty());
    }

    #[test]
    fn metadata_patch_merges_and_dedupes_buffered_update() {
        let mut h = handle(NodeConfig::default());
        h.metadata = serde_json::json!({"a": 1});
        h.metadata(serde_json::json!({"b": 2}));
        h.metadata(serde_json::json!({"b": 3}));
        assert_eq!(h.buffer.len(), 1);
        assert_eq!(h.current_metadata(), &serde_json::json!({"a": 1, "b": 3}));
    }
}
