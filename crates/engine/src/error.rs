//! Orchestrator error types.
//!
//! Display strings are part of the public contract: the `api` and `cli`
//! crates match on them directly rather than re-deriving user-facing text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Workflow not found")]
    WorkflowNotFound,

    #[error("Workflow completed without producing output")]
    NoOutput,

    #[error("node '{node_id}' failed: {message}")]
    NodeFailed { node_id: uuid::Uuid, message: String },

    #[error("cannot be cancelled in current state: {status}")]
    CannotCancel { status: String },

    #[error("Failed to deliver cancel signal: no driver running for this workflow")]
    NoDriver,

    #[error(transparent)]
    Commit(#[from] commit::CommitError),

    #[error(transparent)]
    Db(#[from] db::DbError),

    #[error(transparent)]
    Process(#[from] process::ProcessError),
}
