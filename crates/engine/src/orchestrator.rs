//! The per-workflow orchestrator: drains commits, evaluates the ready set,
//! dispatches node workers concurrently, routes their completion back into
//! the commit log, answers yield rendezvous, and drives the workflow to a
//! terminal status.
//!
//! Exactly one orchestrator may run per workflow at a time; uniqueness is
//! enforced by [`process::Registry::spawn`] rejecting a second registration
//! under the same `dataflow.<id>` name.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use commit::{CommitLog, ExecuteOpts};
use db::models::{
    ApplyCommitPayload, Command, DataType, NodeConfig, NodeRow, NodeStatus, UpdateNodePayload,
    UpdateWorkflowPayload, WorkflowStatus,
};
use db::readers::{DataReader, NodeReader};
use nodes::{NodeHandle, Outcome};
use process::{Envelope, Mailbox, Pid, Registry};

use crate::registry::NodeRegistry;
use crate::EngineError;

const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(30);

/// Spawn an orchestrator for `dataflow_id`. Fails if one is already running.
///
/// Returns the process handle plus a one-shot that resolves with the
/// workflow's terminal status once the driver loop exits — callers that
/// don't care (the production `api`/`cli` entry points) can drop the
/// receiver; tests use it to synchronise on completion.
pub fn spawn(
    commit: CommitLog,
    process: Registry,
    nodes: Arc<NodeRegistry>,
    dataflow_id: Uuid,
) -> Result<(Pid, oneshot::Receiver<Result<WorkflowStatus, EngineError>>), EngineError> {
    let (done_tx, done_rx) = oneshot::channel();
    let orchestrator = Orchestrator { commit, process: process.clone(), nodes, dataflow_id };
    let name = process::dataflow_mailbox(dataflow_id);

    let pid = process.spawn(name, move |mailbox| async move {
        let result = orchestrator.drive(mailbox).await;
        if let Err(e) = &result {
            warn!(dataflow_id = %orchestrator.dataflow_id, error = %e, "orchestrator exited with an error");
        }
        let _ = done_tx.send(result);
    })?;

    Ok((pid, done_rx))
}

/// Request cooperative cancellation of a running workflow's driver. Only
/// valid from `pending`/`running`; any other status is rejected with
/// [`EngineError::CannotCancel`] naming the current status, matching the
/// error-string contract callers match on.
pub async fn cancel(
    commit: &CommitLog,
    process: &Registry,
    dataflow_id: Uuid,
    timeout: Duration,
) -> Result<String, EngineError> {
    let workflow = db::repository::workflows::get_workflow(commit.db(), dataflow_id)
        .await
        .map_err(|_| EngineError::WorkflowNotFound)?;

    let status = workflow.status();
    if !matches!(status, WorkflowStatus::Pending | WorkflowStatus::Running) {
        return Err(EngineError::CannotCancel { status: status.as_str().to_string() });
    }

    let mailbox = process::dataflow_mailbox(dataflow_id);
    let sent = process.send(
        &mailbox,
        "cancel",
        serde_json::json!({ "timeout_ms": timeout.as_millis() as u64 }),
    );
    if !sent {
        return Err(EngineError::NoDriver);
    }

    Ok("Cancel signal sent".to_string())
}

/// Hard-kill the orchestrator process (if any is running) and write the
/// workflow's terminal status directly — non-cooperative, unlike `cancel`.
pub async fn terminate(commit: &CommitLog, process: &Registry, dataflow_id: Uuid) -> Result<(), EngineError> {
    let mailbox = process::dataflow_mailbox(dataflow_id);
    if let Some(pid) = process.lookup(&mailbox) {
        process.terminate(&pid);
    }

    commit
        .execute(
            dataflow_id,
            "orchestrator:terminate",
            vec![Command::UpdateWorkflow(UpdateWorkflowPayload {
                dataflow_id,
                status: Some(WorkflowStatus::Terminated),
                last_commit_id: None,
                metadata: None,
                merge_metadata: true,
            })],
            ExecuteOpts::default(),
        )
        .await?;

    Ok(())
}

/// Fetch a workflow's output records, collapsing the common single-output
/// case. Multiple outputs are returned as a `key -> content` map with the
/// root output (empty-string key) under `""`; a lone output — root or
/// keyed — is returned directly rather than wrapped.
pub async fn output(commit: &CommitLog, dataflow_id: Uuid) -> Result<serde_json::Value, EngineError> {
    let rows = DataReader::new(dataflow_id)
        .data_type(DataType::WorkflowOutput.as_str())
        .resolve_references(true)
        .replace_references(true)
        .all(commit.db())
        .await?;

    if rows.is_empty() {
        return Err(EngineError::NoOutput);
    }

    if rows.len() == 1 {
        return Ok(rows.into_iter().next().expect("len checked").content);
    }

    let mut map = serde_json::Map::new();
    for row in rows {
        map.insert(row.key.unwrap_or_default(), row.content);
    }
    Ok(serde_json::Value::Object(map))
}

/// The per-workflow driver state. Cheap to clone — every field is already
/// `Arc`-backed or a pool handle — so the yield-handling inner loop can
/// recurse without extra indirection.
#[derive(Clone)]
struct Orchestrator {
    commit: CommitLog,
    process: Registry,
    nodes: Arc<NodeRegistry>,
    dataflow_id: Uuid,
}

impl Orchestrator {
    /// The control loop described in §4.4: drain commits, compute the ready
    /// set, dispatch, handle mailbox messages, repeat until terminal.
    #[instrument(skip(self, mailbox), fields(dataflow_id = %self.dataflow_id))]
    async fn drive(&self, mut mailbox: Mailbox) -> Result<WorkflowStatus, EngineError> {
        self.set_running_if_pending().await?;

        let mut active: HashMap<Uuid, JoinHandle<()>> = HashMap::new();

        loop {
            self.drain_pending_commits().await?;
            self.dispatch_ready(None, &mut active).await?;

            if self.is_workflow_terminal(&active).await? {
                break;
            }

            match mailbox.recv().await {
                None => {
                    warn!("mailbox closed before the workflow reached a terminal state");
                    break;
                }
                Some(envelope) => match envelope.topic.as_str() {
                    "commit" => {}
                    "worker_done" => self.handle_worker_done(envelope, &mut active).await?,
                    "yield_request" => self.handle_yield(envelope, &mut mailbox).await?,
                    "cancel" => {
                        self.handle_cancel(envelope, active).await?;
                        return Ok(WorkflowStatus::Cancelled);
                    }
                    other => debug!(topic = other, "ignoring unrecognised mailbox topic"),
                },
            }
        }

        let (status, message) = self.finalize_outcome().await?;
        self.set_workflow_status(status, message).await?;
        info!(status = %status, "workflow reached a terminal state");
        Ok(status)
    }

    async fn set_running_if_pending(&self) -> Result<(), EngineError> {
        let workflow = db::repository::workflows::get_workflow(self.commit.db(), self.dataflow_id).await?;
        if workflow.status() == WorkflowStatus::Pending {
            self.commit
                .execute(
                    self.dataflow_id,
                    "orchestrator:start",
                    vec![Command::UpdateWorkflow(UpdateWorkflowPayload {
                        dataflow_id: self.dataflow_id,
                        status: Some(WorkflowStatus::Running),
                        last_commit_id: None,
                        metadata: None,
                        merge_metadata: true,
                    })],
                    ExecuteOpts::default(),
                )
                .await?;
        }
        Ok(())
    }

    async fn drain_pending_commits(&self) -> Result<(), EngineError> {
        let pending = self.commit.pending_commits(self.dataflow_id).await?;
        if pending.is_empty() {
            return Ok(());
        }

        let commands = pending
            .into_iter()
            .map(|commit_id| Command::ApplyCommit(ApplyCommitPayload { commit_id }))
            .collect();

        self.commit
            .execute(self.dataflow_id, "orchestrator:apply", commands, ExecuteOpts::default())
            .await?;
        Ok(())
    }

    /// Nodes in `pending` status whose required input keys are all present,
    /// optionally restricted to `scope` (the yielding node's descendant
    /// subtree). `template` nodes never surface here — they aren't `pending`.
    async fn ready_nodes(&self, scope: Option<&HashSet<Uuid>>) -> Result<Vec<NodeRow>, EngineError> {
        let mut reader = NodeReader::new(self.dataflow_id).status(NodeStatus::Pending.as_str());
        if let Some(scope) = scope {
            reader = reader.node_ids(scope.iter().copied());
        }
        let candidates = reader.all(self.commit.db()).await?;

        let mut ready = Vec::new();
        for node in candidates {
            if self.is_ready(&node).await? {
                ready.push(node);
            }
        }
        Ok(ready)
    }

    async fn is_ready(&self, node: &NodeRow) -> Result<bool, EngineError> {
        let config = node.config();
        let inputs = DataReader::new(self.dataflow_id)
            .node_id(node.node_id)
            .data_type(DataType::NodeInput.as_str())
            .content(false)
            .all(self.commit.db())
            .await?;

        let required = match &config.inputs {
            Some(spec) if !spec.required.is_empty() => spec.required.clone(),
            _ => return Ok(!inputs.is_empty()),
        };

        let present: HashSet<String> = inputs.into_iter().map(|row| row.key.unwrap_or_default()).collect();
        Ok(required.iter().all(|key| present.contains(key)))
    }

    async fn dispatch_ready(
        &self,
        scope: Option<&HashSet<Uuid>>,
        active: &mut HashMap<Uuid, JoinHandle<()>>,
    ) -> Result<(), EngineError> {
        for node in self.ready_nodes(scope).await? {
            if active.contains_key(&node.node_id) {
                continue;
            }
            self.mark_running(node.node_id).await?;
            let handle = self.spawn_worker(node);
            active.insert(handle.0, handle.1);
        }
        Ok(())
    }

    async fn mark_running(&self, node_id: Uuid) -> Result<(), EngineError> {
        self.commit
            .execute(
                self.dataflow_id,
                "orchestrator:dispatch",
                vec![Command::UpdateNode(UpdateNodePayload {
                    node_id,
                    status: Some(NodeStatus::Running),
                    config: None,
                    metadata: None,
                    merge_metadata: true,
                })],
                ExecuteOpts::default(),
            )
            .await?;
        Ok(())
    }

    /// Spawn a worker task for `node`. The node function runs against a
    /// fresh [`NodeHandle`]; when it returns, the worker posts a
    /// `worker_done` message back onto the workflow's own mailbox so the
    /// driver (outer loop or yield-scoped inner loop, whichever currently
    /// owns the mailbox) can apply the final status transition.
    fn spawn_worker(&self, node: NodeRow) -> (Uuid, JoinHandle<()>) {
        let node_id = node.node_id;
        let node_fn = self.nodes.get(&node.node_type).cloned();
        let commit = self.commit.clone();
        let process = self.process.clone();
        let dataflow_id = self.dataflow_id;
        let config = node.config();
        let node_type = node.node_type.clone();
        let metadata = node.metadata.clone();
        let parent_node_id = node.parent_node_id;
        let mailbox_name = process::dataflow_mailbox(dataflow_id);

        let join = tokio::spawn(async move {
            let mut handle = NodeHandle::new(node_id, dataflow_id, parent_node_id, config, metadata, commit);

            let outcome = match node_fn {
                Some(node_fn) => match node_fn.run(&mut handle).await {
                    Ok(()) => handle.take_outcome(),
                    Err(e) => {
                        warn!(%node_id, error = %e, "node function returned an error without completing or failing");
                        handle.take_outcome()
                    }
                },
                None => {
                    let _ = handle
                        .fail(
                            serde_json::json!({ "code": "FUNCTION_ID_MISSING" }),
                            Some(format!("no node implementation registered for node_type '{node_type}'")),
                            None,
                        )
                        .await;
                    handle.take_outcome()
                }
            };

            let (success, error) = match outcome {
                Some(Outcome::Success { .. }) => (true, None),
                Some(Outcome::Failure { error, .. }) => (false, Some(error)),
                None => (
                    false,
                    Some(serde_json::json!({
                        "code": "FUNCTION_EXECUTION_FAILED",
                        "message": "node function returned without completing or failing",
                    })),
                ),
            };

            process.send(
                &mailbox_name,
                "worker_done",
                serde_json::json!({ "node_id": node_id, "success": success, "error": error }),
            );
        });

        (node_id, join)
    }

    async fn handle_worker_done(
        &self,
        envelope: Envelope,
        active: &mut HashMap<Uuid, JoinHandle<()>>,
    ) -> Result<(), EngineError> {
        let node_id = parse_node_id(&envelope, "node_id")?;
        let success = envelope.payload.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
        active.remove(&node_id);

        self.commit
            .execute(
                self.dataflow_id,
                "orchestrator:finalize",
                vec![Command::UpdateNode(UpdateNodePayload {
                    node_id,
                    status: Some(if success { NodeStatus::Completed } else { NodeStatus::Failed }),
                    config: None,
                    metadata: None,
                    merge_metadata: true,
                })],
                ExecuteOpts::default(),
            )
            .await?;
        Ok(())
    }

    /// Handle a `yield_request`: restrict an inner control-loop pass to the
    /// subtree rooted at the yielding node until every node in that subtree
    /// is terminal, then reply with their results.
    ///
    /// Recurses if a node *within* the scope itself yields — the recursive
    /// call narrows `scope` further to its own descendants while still
    /// reading from the same outer `mailbox`.
    #[instrument(skip(self, envelope, mailbox), fields(dataflow_id = %self.dataflow_id))]
    async fn handle_yield(&self, envelope: Envelope, mailbox: &mut Mailbox) -> Result<(), EngineError> {
        let node_id = parse_node_id(&envelope, "node_id")?;
        let reply_topic = envelope
            .payload
            .get("reply_topic")
            .and_then(|v| v.as_str())
            .unwrap_or(&process::yield_reply_topic(node_id))
            .to_string();

        let scope = self.descendant_ids(node_id).await?;
        let mut active: HashMap<Uuid, JoinHandle<()>> = HashMap::new();

        loop {
            self.drain_pending_commits().await?;
            self.dispatch_ready(Some(&scope), &mut active).await?;

            if self.scope_is_terminal(&scope).await? {
                break;
            }

            match mailbox.recv().await {
                None => break,
                Some(envelope) => match envelope.topic.as_str() {
                    "commit" => {}
                    "worker_done" => self.handle_worker_done(envelope, &mut active).await?,
                    "yield_request" => Box::pin(self.handle_yield(envelope, mailbox)).await?,
                    other => debug!(topic = other, "ignoring mailbox topic during yield wait"),
                },
            }
        }

        let results = self.collect_results(&scope).await?;
        self.process.reply(&reply_topic, serde_json::json!({ "run_node_results": results }));
        Ok(())
    }

    /// All descendants of `root`, transitively, via `parent_node_id` chains.
    async fn descendant_ids(&self, root: Uuid) -> Result<HashSet<Uuid>, EngineError> {
        let mut all = HashSet::new();
        let mut frontier = vec![root];

        while !frontier.is_empty() {
            let children = NodeReader::new(self.dataflow_id)
                .parent_node_ids(frontier.iter().copied())
                .all(self.commit.db())
                .await?;
            frontier = children
                .into_iter()
                .map(|n| n.node_id)
                .filter(|id| all.insert(*id))
                .collect();
        }

        Ok(all)
    }

    async fn scope_is_terminal(&self, scope: &HashSet<Uuid>) -> Result<bool, EngineError> {
        if scope.is_empty() {
            return Ok(true);
        }
        let remaining = NodeReader::new(self.dataflow_id)
            .node_ids(scope.iter().copied())
            .statuses_excluded([
                NodeStatus::Completed.as_str(),
                NodeStatus::Failed.as_str(),
                NodeStatus::Cancelled.as_str(),
            ])
            .count(self.commit.db())
            .await?;
        Ok(remaining == 0)
    }

    /// `node_id -> node_result content` for every node in `scope`, read back
    /// for the yield reply bundle.
    async fn collect_results(&self, scope: &HashSet<Uuid>) -> Result<HashMap<Uuid, serde_json::Value>, EngineError> {
        if scope.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = DataReader::new(self.dataflow_id)
            .node_ids(scope.iter().copied())
            .data_type(DataType::NodeResult.as_str())
            .all(self.commit.db())
            .await?;

        let mut results = HashMap::new();
        for row in rows {
            if let Some(node_id) = row.node_id {
                results.insert(node_id, row.content);
            }
        }
        Ok(results)
    }

    /// The whole workflow (not a yield scope) is terminal when no node is
    /// `pending` or `running`. `active` is consulted only as a sanity check —
    /// database status is the source of truth for readiness/termination.
    async fn is_workflow_terminal(&self, active: &HashMap<Uuid, JoinHandle<()>>) -> Result<bool, EngineError> {
        let non_terminal = NodeReader::new(self.dataflow_id)
            .statuses([NodeStatus::Pending.as_str(), NodeStatus::Running.as_str()])
            .count(self.commit.db())
            .await?;
        Ok(non_terminal == 0 && active.is_empty())
    }

    async fn handle_cancel(
        &self,
        envelope: Envelope,
        active: HashMap<Uuid, JoinHandle<()>>,
    ) -> Result<(), EngineError> {
        let timeout = envelope
            .payload
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CANCEL_TIMEOUT);

        let deadline = tokio::time::Instant::now() + timeout;
        for (node_id, handle) in active {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                debug!(%node_id, "worker did not finish within the cancel deadline");
            }
        }

        let still_running = NodeReader::new(self.dataflow_id)
            .statuses([NodeStatus::Pending.as_str(), NodeStatus::Running.as_str()])
            .all(self.commit.db())
            .await?;

        for node in still_running {
            self.commit
                .execute(
                    self.dataflow_id,
                    "orchestrator:cancel",
                    vec![Command::UpdateNode(UpdateNodePayload {
                        node_id: node.node_id,
                        status: Some(NodeStatus::Cancelled),
                        config: None,
                        metadata: None,
                        merge_metadata: true,
                    })],
                    ExecuteOpts::default(),
                )
                .await?;
        }

        self.set_workflow_status(WorkflowStatus::Cancelled, None).await?;
        Ok(())
    }

    /// Success iff at least one `workflow_output` record exists and no node
    /// failed without an error route: a failed node with empty
    /// `error_targets` (or whose error-handling chain itself ends in an
    /// unrouted failure — covered transitively, since that handler node also
    /// shows up here as `Failed`) fails the whole workflow with its own
    /// error message.
    async fn finalize_outcome(&self) -> Result<(WorkflowStatus, Option<String>), EngineError> {
        let nodes = NodeReader::new(self.dataflow_id).all(self.commit.db()).await?;

        for node in &nodes {
            if node.status() == NodeStatus::Failed {
                let config: NodeConfig = node.config();
                if config.error_targets.is_empty() {
                    let message = self.node_error_message(node.node_id).await?;
                    return Ok((WorkflowStatus::CompletedFailure, Some(message)));
                }
            }
        }

        let has_output = DataReader::new(self.dataflow_id)
            .data_type(DataType::WorkflowOutput.as_str())
            .exists(self.commit.db())
            .await?;

        if !has_output {
            return Ok((
                WorkflowStatus::CompletedFailure,
                Some("Workflow completed without producing output".to_string()),
            ));
        }

        Ok((WorkflowStatus::CompletedSuccess, None))
    }

    async fn node_error_message(&self, node_id: Uuid) -> Result<String, EngineError> {
        let row = DataReader::new(self.dataflow_id)
            .node_id(node_id)
            .data_type(DataType::NodeResult.as_str())
            .data_discriminator("result.error")
            .one(self.commit.db())
            .await?;

        Ok(row
            .and_then(|r| r.content.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| format!("node '{node_id}' failed")))
    }

    async fn set_workflow_status(&self, status: WorkflowStatus, message: Option<String>) -> Result<(), EngineError> {
        let metadata = message.map(|m| serde_json::json!({ "error": m }));
        self.commit
            .execute(
                self.dataflow_id,
                "orchestrator:terminal",
                vec![Command::UpdateWorkflow(UpdateWorkflowPayload {
                    dataflow_id: self.dataflow_id,
                    status: Some(status),
                    last_commit_id: None,
                    metadata,
                    merge_metadata: true,
                })],
                ExecuteOpts::default(),
            )
            .await?;
        Ok(())
    }
}

fn parse_node_id(envelope: &Envelope, field: &str) -> Result<Uuid, EngineError> {
    envelope
        .payload
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .or_else(|| envelope.payload.get(field).and_then(|v| serde_json::from_value(v.clone()).ok()))
        .ok_or_else(|| EngineError::NodeFailed { node_id: Uuid::nil(), message: format!("malformed '{field}' in envelope") })
}
