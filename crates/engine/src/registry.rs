//! The node-type registry: maps `node_type` strings to the [`nodes::NodeFn`]
//! implementation the orchestrator dispatches a node to.

use std::collections::HashMap;
use std::sync::Arc;

use nodes::NodeFn;

/// Maps `node_type` to a boxed node function. Looked up once per dispatch;
/// an unregistered `node_type` is routed through `NodeHandle::fail` rather
/// than treated as a validation error, since the declaring commands were
/// already accepted by the command engine.
pub type NodeRegistry = HashMap<String, Arc<dyn NodeFn>>;

/// Convenience builder so callers don't have to spell out the `Arc<dyn _>`
/// coercion at every call site.
#[derive(Default)]
pub struct NodeRegistryBuilder(NodeRegistry);

impl NodeRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, node_type: impl Into<String>, node_fn: impl NodeFn + 'static) -> Self {
        self.0.insert(node_type.into(), Arc::new(node_fn));
        self
    }

    pub fn build(self) -> NodeRegistry {
        self.0
    }
}
