//! Process-shim error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("a process named '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("no process named '{0}' is registered")]
    NotFound(String),

    #[error("mailbox for '{0}' is closed")]
    Closed(String),
}
