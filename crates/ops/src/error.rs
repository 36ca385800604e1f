//! Command-engine error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("command {index}: workflow not found")]
    WorkflowNotFound { index: usize },

    #[error("command {index}: workflow is already in a terminal state ({status}) and cannot change status")]
    WorkflowTerminal { index: usize, status: String },

    #[error("command {index}: node not found")]
    NodeNotFound { index: usize },

    #[error("command {index}: data not found")]
    DataNotFound { index: usize },

    #[error("command {index}: Commit not found")]
    CommitNotFound { index: usize },

    #[error("command {index}: {source}")]
    Database {
        index: usize,
        #[source]
        source: db::DbError,
    },

    #[error("command {index}: invalid payload: {message}")]
    InvalidPayload { index: usize, message: String },
}

impl OpsError {
    pub fn index(&self) -> usize {
        match self {
            Self::WorkflowNotFound { index }
            | Self::WorkflowTerminal { index, .. }
            | Self::NodeNotFound { index }
            | Self::DataNotFound { index }
            | Self::CommitNotFound { index }
            | Self::Database { index, .. }
            | Self::InvalidPayload { index, .. } => *index,
        }
    }
}
