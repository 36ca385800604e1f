//! `TestFunctionNode` — the generic node type used by the engine's
//! integration tests. Mirrors a minimal "echo with metadata" function:
//! reads its inputs, optionally sleeps to simulate work, and completes or
//! fails based on flags carried in a single root input.
//!
//! Two input shapes are supported, matching the two families of test
//! scenarios this node backs:
//!
//! - A single root (`key = ""`) input — the control-flow knobs
//!   (`should_fail`, `delay_ms`) live there, and `input_echo` is that same
//!   object with the control keys stripped (so chaining two of these nodes
//!   nests an `input_echo` inside an `input_echo` without the noise of the
//!   previous hop's own delay/fail flags leaking through).
//! - Multiple named inputs (e.g. a fan-in node declaring
//!   `inputs.required = ["from_b", "from_c"]`) — there is no single
//!   "message", so `input_echo` is the whole resolved input map.
//!
//! A fixed, small artificial delay is applied in the multi-input case too,
//! so fan-out branches have measurable (if tiny) overlapping execution
//! windows for concurrency assertions.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::{NodeError, NodeFn, NodeHandle};

/// Keys stripped from a single-root input before it is echoed back, since
/// they control this node's own behaviour rather than carrying payload.
const CONTROL_KEYS: [&str; 2] = ["delay_ms", "should_fail"];

/// Artificial delay applied to multi-input (fan-in) invocations, so sibling
/// branches dispatched concurrently have a visible overlap window.
const MULTI_INPUT_DELAY_MS: u64 = 20;

pub struct TestFunctionNode;

#[async_trait]
impl NodeFn for TestFunctionNode {
    async fn run(&self, handle: &mut NodeHandle) -> Result<(), NodeError> {
        let func_id = handle.config().extra.get("func_id").and_then(|v| v.as_str()).unwrap_or("");
        if func_id.is_empty() {
            handle
                .fail(json!({"code": "FUNCTION_ID_MISSING"}), Some("Function ID not specified".to_string()), None)
                .await?;
            return Ok(());
        }

        let inputs = handle.inputs().await?.clone();
        if inputs.is_empty() {
            handle.fail(json!({"code": "NO_INPUT_DATA"}), Some("No input data provided".to_string()), None).await?;
            return Ok(());
        }

        let output = if inputs.len() == 1 && inputs.contains_key("") {
            self.run_single_root(handle, inputs.get("").cloned().unwrap_or(Value::Null)).await?
        } else {
            self.run_multi_input(inputs).await
        };

        if let Some(output) = output {
            handle.complete(output, None, None).await?;
        }
        Ok(())
    }
}

impl TestFunctionNode {
    /// The root-input shape: `should_fail`/`delay_ms` drive behaviour,
    /// everything else (chiefly `message`) is payload. Returns `None` when
    /// the node already routed a failure.
    async fn run_single_root(
        &self,
        handle: &mut NodeHandle,
        root: Value,
    ) -> Result<Option<Value>, NodeError> {
        let should_fail = root.get("should_fail").and_then(|v| v.as_bool()).unwrap_or(false);
        if should_fail {
            handle
                .fail(json!({"code": "FUNCTION_EXECUTION_FAILED"}), Some("Intentional semantic failure".to_string()), None)
                .await?;
            return Ok(None);
        }

        let delay_ms = root.get("delay_ms").and_then(|v| v.as_u64()).unwrap_or(0);
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }

        let mut input_echo = root.clone();
        if let Value::Object(map) = &mut input_echo {
            for key in CONTROL_KEYS {
                map.remove(key);
            }
        }

        Ok(Some(json!({
            "message": root.get("message").cloned().unwrap_or(Value::Null),
            "processed_by": "test_function",
            "success": true,
            "delay_applied": delay_ms,
            "input_echo": input_echo,
            "timestamp": Utc::now().to_rfc3339(),
        })))
    }

    /// The fan-in shape: no single message, so the whole resolved input map
    /// becomes `input_echo` verbatim.
    async fn run_multi_input(&self, inputs: std::collections::HashMap<String, Value>) -> Option<Value> {
        tokio::time::sleep(std::time::Duration::from_millis(MULTI_INPUT_DELAY_MS)).await;

        let input_echo = Value::Object(inputs.into_iter().collect());
        Some(json!({
            "processed_by": "test_function",
            "success": true,
            "input_echo": input_echo,
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }
}
