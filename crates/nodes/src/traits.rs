//! The `NodeFn` trait — the contract every node function must fulfil.

use async_trait::async_trait;

use crate::{NodeError, NodeHandle};

/// A runnable node function. Every implementation must end by calling
/// either [`NodeHandle::complete`] or [`NodeHandle::fail`] on the handle it
/// is given — only commands flushed before `run` returns are durable. If
/// `run` itself returns `Err` without having called either, the orchestrator
/// treats the node as failed with that error.
#[async_trait]
pub trait NodeFn: Send + Sync {
    async fn run(&self, handle: &mut NodeHandle) -> Result<(), NodeError>;
}
