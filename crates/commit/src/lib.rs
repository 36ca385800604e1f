//! `commit` crate — the durable commit log sitting on top of the command
//! engine: immediate (`execute`) and deferred (`submit`) write paths, the
//! pending-commit query, and the change-notification publish contract.

pub mod error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use error::CommitError;

use db::models::{Command, CommitPayload};
use db::DbPool;
use ops::OpBatchResult;
use process::Registry;

/// Options for [`CommitLog::execute`].
#[derive(Debug, Clone, Copy)]
pub struct ExecuteOpts {
    /// Emit change-notification events after a successful commit. Defaults
    /// to `true`; the orchestrator's own internal `APPLY_COMMIT` batches
    /// still want this on so downstream observers see node/workflow events.
    pub publish: bool,
}

impl Default for ExecuteOpts {
    fn default() -> Self {
        Self { publish: true }
    }
}

/// A node- or workflow-level change notification, as delivered to
/// `user.<actor_id>` on topic `dataflow:<workflow_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeEvent {
    Node {
        node_id: Option<Uuid>,
        parent_node_id: Option<Uuid>,
        op_type: &'static str,
        node_type: Option<String>,
        status: Option<String>,
        metadata: Option<serde_json::Value>,
        deleted: bool,
        updated_at: Option<DateTime<Utc>>,
    },
    Workflow {
        dataflow_id: Uuid,
        updated_at: DateTime<Utc>,
    },
}

/// The durable commit log for one deployment. Cheap to clone: holds a
/// connection pool and a process registry, both already `Arc`-backed.
#[derive(Clone)]
pub struct CommitLog {
    db: DbPool,
    process: Registry,
}

impl CommitLog {
    pub fn new(db: DbPool, process: Registry) -> Self {
        Self { db, process }
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    pub fn process(&self) -> &Registry {
        &self.process
    }

    /// Open a transaction, apply `commands` via the command engine, commit,
    /// and (unless `opts.publish` is false) emit change notifications.
    pub async fn execute(
        &self,
        dataflow_id: Uuid,
        op_id: impl Into<String>,
        commands: Vec<Command>,
        opts: ExecuteOpts,
    ) -> Result<OpBatchResult, CommitError> {
        if commands.is_empty() {
            return Err(CommitError::EmptyCommands);
        }

        let mut tx = self.db.begin().await?;
        let result = ops::apply_commands(&mut tx, dataflow_id, op_id, commands).await?;
        tx.commit().await?;

        if opts.publish {
            self.publish(dataflow_id, &result).await;
        }

        Ok(result)
    }

    /// Write a commit record without applying it or advancing
    /// `last_commit_id`, then notify the workflow's driver mailbox. The
    /// driver is responsible for applying it later via an `APPLY_COMMIT`
    /// inside its own `execute`.
    pub async fn submit(
        &self,
        dataflow_id: Uuid,
        op_id: impl Into<String>,
        commands: Vec<Command>,
    ) -> Result<Uuid, CommitError> {
        if commands.is_empty() {
            return Err(CommitError::EmptyCommands);
        }

        let op_id = op_id.into();
        let commit_id = Uuid::now_v7();
        let payload = CommitPayload { op_id, commands };
        let payload_json = serde_json::to_value(&payload)?;

        db::repository::commits::insert_commit(
            &self.db,
            commit_id,
            dataflow_id,
            payload_json,
            serde_json::json!({}),
        )
        .await?;

        self.process.send(
            &process::dataflow_mailbox(dataflow_id),
            "commit",
            serde_json::json!({ "commit_id": commit_id }),
        );

        Ok(commit_id)
    }

    /// Commit ids strictly greater than the workflow's current
    /// `last_commit_id`, ascending.
    pub async fn pending_commits(&self, dataflow_id: Uuid) -> Result<Vec<Uuid>, CommitError> {
        let workflow = db::repository::workflows::get_workflow(&self.db, dataflow_id).await?;
        let ids =
            db::repository::commits::pending_commit_ids(&self.db, dataflow_id, workflow.last_commit_id).await?;
        Ok(ids)
    }

    async fn publish(&self, dataflow_id: Uuid, result: &OpBatchResult) {
        let workflow = match db::repository::workflows::get_workflow(&self.db, dataflow_id).await {
            Ok(row) => row,
            Err(_) => return,
        };

        let mailbox = process::user_mailbox(&workflow.actor_id);
        let topic = process::dataflow_topic(dataflow_id);

        let node_results: Vec<_> = result.results.iter().filter(|r| r.is_node_op).collect();

        if !node_results.is_empty() {
            for r in node_results {
                let event = ChangeEvent::Node {
                    node_id: r.node_id,
                    parent_node_id: r.parent_node_id,
                    op_type: r.command_kind,
                    node_type: r.node_type.clone(),
                    status: r.status.clone(),
                    metadata: r.metadata.clone(),
                    deleted: r.deleted,
                    updated_at: r.updated_at,
                };
                if let Ok(payload) = serde_json::to_value(&event) {
                    self.process.send(&mailbox, topic.clone(), payload);
                }
            }
        } else if result.results.iter().any(|r| r.is_workflow_op) {
            let event = ChangeEvent::Workflow { dataflow_id, updated_at: workflow.updated_at };
            if let Ok(payload) = serde_json::to_value(&event) {
                self.process.send(&mailbox, topic, payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_opts_default_publishes() {
        assert!(ExecuteOpts::default().publish);
    }
}
