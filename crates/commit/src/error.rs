//! Commit-log error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Commands array cannot be empty")]
    EmptyCommands,

    #[error(transparent)]
    Db(#[from] db::DbError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Ops(#[from] ops::OpsError),

    #[error("failed to encode commit payload: {0}")]
    Serialization(#[from] serde_json::Error),
}
