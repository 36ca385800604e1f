//! Static validation of a workflow definition document before submission.
//!
//! Checks that every `data_targets` / `error_targets` entry naming a
//! `node_id` refers to a node declared in the same document — a dangling
//! target descriptor would otherwise only surface as a silent no-op
//! downstream, since [`commit`] materialises target data regardless of
//! whether the target node exists.

use std::collections::HashSet;

use uuid::Uuid;

use api::handlers::workflows::CreateWorkflowRequest;
use db::models::NodeConfig;

/// Returns one human-readable problem string per dangling reference found;
/// an empty vec means the document is clean.
pub fn check_dangling_references(req: &CreateWorkflowRequest) -> Vec<String> {
    let declared: HashSet<Uuid> = req.nodes.iter().filter_map(|n| n.node_id).collect();
    let mut problems = Vec::new();

    for (index, node) in req.nodes.iter().enumerate() {
        let label = node.node_id.map(|id| id.to_string()).unwrap_or_else(|| format!("index {index}"));

        let config: NodeConfig = match serde_json::from_value(node.config.clone()) {
            Ok(config) => config,
            Err(err) => {
                problems.push(format!("node[{label}]: config is not a valid node configuration: {err}"));
                continue;
            }
        };

        for (kind, targets) in [("data_targets", &config.data_targets), ("error_targets", &config.error_targets)] {
            for target in targets {
                if let Some(target_id) = target.node_id {
                    if !declared.contains(&target_id) {
                        problems.push(format!("node[{label}]: {kind} references undeclared node_id {target_id}"));
                    }
                }
            }
        }
    }

    for input in &req.inputs {
        if !declared.contains(&input.node_id) {
            problems.push(format!("input for node_id {}: no such node declared", input.node_id));
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: serde_json::Value) -> CreateWorkflowRequest {
        serde_json::from_value(body).expect("fixture should deserialize")
    }

    #[test]
    fn clean_document_has_no_problems() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let req = parse(json!({
            "actor_id": "tester",
            "workflow_type": "smoke",
            "nodes": [
                { "node_id": a, "node_type": "function", "config": { "data_targets": [{ "data_type": "node_input", "node_id": b }] } },
                { "node_id": b, "node_type": "function", "config": {} },
            ],
            "inputs": [{ "node_id": a, "content": {} }],
        }));
        assert!(check_dangling_references(&req).is_empty());
    }

    #[test]
    fn dangling_target_is_reported() {
        let a = Uuid::new_v4();
        let ghost = Uuid::new_v4();
        let req = parse(json!({
            "actor_id": "tester",
            "workflow_type": "smoke",
            "nodes": [
                { "node_id": a, "node_type": "function", "config": { "data_targets": [{ "data_type": "node_input", "node_id": ghost }] } },
            ],
        }));
        let problems = check_dangling_references(&req);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains(&ghost.to_string()));
    }

    #[test]
    fn dangling_input_target_is_reported() {
        let ghost = Uuid::new_v4();
        let req = parse(json!({
            "actor_id": "tester",
            "workflow_type": "smoke",
            "nodes": [],
            "inputs": [{ "node_id": ghost, "content": {} }],
        }));
        let problems = check_dangling_references(&req);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("no such node declared"));
    }
}
