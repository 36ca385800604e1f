//! Simple [`crate::NodeFn`] test doubles for engine unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{NodeError, NodeFn, NodeHandle};

/// A node that always completes with a fixed output, recording how many
/// times it ran.
pub struct AlwaysCompleteNode {
    pub output: serde_json::Value,
    pub calls: AtomicUsize,
}

impl AlwaysCompleteNode {
    pub fn new(output: serde_json::Value) -> Self {
        Self { output, calls: AtomicUsize::new(0) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeFn for AlwaysCompleteNode {
    async fn run(&self, handle: &mut NodeHandle) -> Result<(), NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        handle.complete(self.output.clone(), None, None).await?;
        Ok(())
    }
}

/// A node that always fails with a fixed error payload.
pub struct AlwaysFailNode {
    pub error: serde_json::Value,
    pub message: String,
}

impl AlwaysFailNode {
    pub fn new(error: serde_json::Value, message: impl Into<String>) -> Self {
        Self { error, message: message.into() }
    }
}

#[async_trait]
impl NodeFn for AlwaysFailNode {
    async fn run(&self, handle: &mut NodeHandle) -> Result<(), NodeError> {
        handle.fail(self.error.clone(), Some(self.message.clone()), None).await?;
        Ok(())
    }
}
