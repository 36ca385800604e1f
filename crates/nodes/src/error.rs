//! Node-runtime error type.

use thiserror::Error;

/// Errors surfaced by the node runtime SDK to a node function, or by a node
/// function back to the orchestrator.
///
/// Unlike the ad-hoc retryable/fatal split some queue-backed engines use,
/// this system does not retry node functions itself (see the commit log's
/// own error handling design) — every variant here is terminal from the
/// node's point of view; a node that wants retry semantics composes a child
/// subgraph via `yield`.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    #[error("No input data provided")]
    NoInputData,

    #[error("Function ID not specified")]
    FunctionIdNotSpecified,

    #[error("missing input '{0}'")]
    MissingInput(String),

    #[error("commit error: {0}")]
    Commit(String),

    #[error("yield reply channel closed before the child subgraph replied")]
    YieldReplyLost,
}
