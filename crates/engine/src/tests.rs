//! End-to-end orchestrator tests against a live Postgres database.
//!
//! These cover the workflow lifecycles the rest of this crate's unit tests
//! can't reach without a real driver loop and a real schema: a single
//! function node, a missing-configuration failure, a two-node chain, error
//! routing, diamond fan-out/fan-in, cancellation, and a couple of commit-log
//! boundary conditions. Each test gets its own throwaway database via
//! `#[sqlx::test]`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use commit::{CommitError, CommitLog, ExecuteOpts};
use db::models::{
    ApplyCommitPayload, Command, CreateDataPayload, CreateNodePayload, CreateWorkflowPayload, DataType,
    NodeStatus, UpdateWorkflowPayload, WorkflowStatus,
};
use db::readers::{DataReader, NodeReader};
use nodes::testing::TestFunctionNode;
use process::Registry;

use crate::registry::{NodeRegistry, NodeRegistryBuilder};
use crate::{cancel, output, spawn};

fn harness(pool: PgPool) -> (CommitLog, Registry, Arc<NodeRegistry>) {
    let process = Registry::new();
    let commit = CommitLog::new(pool, process.clone());
    let nodes = Arc::new(NodeRegistryBuilder::new().register("function", TestFunctionNode).build());
    (commit, process, nodes)
}

fn create_workflow_cmd(dataflow_id: Uuid) -> Command {
    Command::CreateWorkflow(CreateWorkflowPayload {
        dataflow_id: Some(dataflow_id),
        parent_dataflow_id: None,
        actor_id: "test-actor".to_string(),
        workflow_type: "integration-test".to_string(),
        metadata: json!({}),
        status: None,
    })
}

fn create_node_cmd(node_id: Uuid, config: serde_json::Value) -> Command {
    Command::CreateNode(CreateNodePayload {
        node_id: Some(node_id),
        parent_node_id: None,
        node_type: "function".to_string(),
        config,
        metadata: json!({}),
        status: None,
    })
}

fn create_input_cmd(node_id: Uuid, key: Option<&str>, content: serde_json::Value) -> Command {
    Command::CreateData(CreateDataPayload {
        data_id: None,
        node_id: Some(node_id),
        data_type: DataType::NodeInput,
        discriminator: None,
        key: key.map(str::to_string),
        content,
        content_type: None,
        metadata: json!({}),
    })
}

/// Spawn the orchestrator and wait (bounded) for it to reach a terminal
/// status.
async fn run_to_completion(
    commit: CommitLog,
    process: Registry,
    nodes: Arc<NodeRegistry>,
    dataflow_id: Uuid,
) -> WorkflowStatus {
    let (_pid, done) = spawn(commit, process, nodes, dataflow_id).unwrap();
    tokio::time::timeout(Duration::from_secs(5), done)
        .await
        .expect("workflow did not reach a terminal state in time")
        .expect("driver task panicked")
        .expect("driver exited with an error")
}

#[sqlx::test(migrations = "../../migrations")]
async fn single_func_node_succeeds_and_produces_output(pool: PgPool) {
    let (commit, process, nodes) = harness(pool);
    let dataflow_id = Uuid::new_v4();
    let node_id = Uuid::new_v4();

    commit
        .execute(
            dataflow_id,
            "seed",
            vec![
                create_workflow_cmd(dataflow_id),
                create_node_cmd(
                    node_id,
                    json!({"func_id": "echo", "data_targets": [{"data_type": "workflow_output", "key": "result"}]}),
                ),
                create_input_cmd(node_id, None, json!({"message": "Integration test message", "delay_ms": 50})),
            ],
            ExecuteOpts::default(),
        )
        .await
        .unwrap();

    let status = run_to_completion(commit.clone(), process, nodes, dataflow_id).await;
    assert_eq!(status, WorkflowStatus::CompletedSuccess);

    let result = output(&commit, dataflow_id).await.unwrap();
    assert_eq!(result["message"], json!("Integration test message"));
    assert_eq!(result["processed_by"], json!("test_function"));
    assert_eq!(result["success"], json!(true));
    assert_eq!(result["delay_applied"], json!(50));
    assert_eq!(result["input_echo"], json!({"message": "Integration test message"}));
    assert!(result["timestamp"].as_str().is_some());

    let node_result = DataReader::new(dataflow_id)
        .node_id(node_id)
        .data_type(DataType::NodeResult.as_str())
        .one(commit.db())
        .await
        .unwrap()
        .expect("node_result row");
    assert_eq!(node_result.discriminator.as_deref(), Some("result.success"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn missing_func_id_fails_the_node_and_the_workflow(pool: PgPool) {
    let (commit, process, nodes) = harness(pool);
    let dataflow_id = Uuid::new_v4();
    let node_id = Uuid::new_v4();

    commit
        .execute(
            dataflow_id,
            "seed",
            vec![
                create_workflow_cmd(dataflow_id),
                create_node_cmd(node_id, json!({})),
                create_input_cmd(node_id, None, json!({"message": "irrelevant"})),
            ],
            ExecuteOpts::default(),
        )
        .await
        .unwrap();

    let status = run_to_completion(commit.clone(), process, nodes, dataflow_id).await;
    assert_eq!(status, WorkflowStatus::CompletedFailure);

    let workflow = db::repository::workflows::get_workflow(commit.db(), dataflow_id).await.unwrap();
    assert_eq!(workflow.metadata["error"], json!("Function ID not specified"));

    let node = NodeReader::new(dataflow_id).node_id(node_id).one(commit.db()).await.unwrap().unwrap();
    assert_eq!(node.status(), NodeStatus::Failed);
}

#[sqlx::test(migrations = "../../migrations")]
async fn two_node_chain_nests_the_upstream_output(pool: PgPool) {
    let (commit, process, nodes) = harness(pool);
    let dataflow_id = Uuid::new_v4();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    commit
        .execute(
            dataflow_id,
            "seed",
            vec![
                create_workflow_cmd(dataflow_id),
                create_node_cmd(a, json!({"func_id": "echo", "data_targets": [{"data_type": "node_input", "node_id": b}]})),
                create_node_cmd(
                    b,
                    json!({"func_id": "echo", "data_targets": [{"data_type": "workflow_output", "key": "final"}]}),
                ),
                create_input_cmd(a, None, json!({"message": "original"})),
            ],
            ExecuteOpts::default(),
        )
        .await
        .unwrap();

    let status = run_to_completion(commit.clone(), process, nodes, dataflow_id).await;
    assert_eq!(status, WorkflowStatus::CompletedSuccess);

    let result = output(&commit, dataflow_id).await.unwrap();
    assert_eq!(result["input_echo"]["processed_by"], json!("test_function"));
    assert_eq!(result["input_echo"]["input_echo"]["message"], json!("original"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn failed_node_with_error_route_lets_the_workflow_succeed(pool: PgPool) {
    let (commit, process, nodes) = harness(pool);
    let dataflow_id = Uuid::new_v4();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    commit
        .execute(
            dataflow_id,
            "seed",
            vec![
                create_workflow_cmd(dataflow_id),
                create_node_cmd(a, json!({"func_id": "echo", "error_targets": [{"data_type": "node_input", "node_id": b}]})),
                create_node_cmd(
                    b,
                    json!({"func_id": "echo", "data_targets": [{"data_type": "workflow_output", "key": "handled"}]}),
                ),
                create_input_cmd(a, None, json!({"should_fail": true})),
            ],
            ExecuteOpts::default(),
        )
        .await
        .unwrap();

    let status = run_to_completion(commit.clone(), process, nodes, dataflow_id).await;
    assert_eq!(status, WorkflowStatus::CompletedSuccess);

    let a_row = NodeReader::new(dataflow_id).node_id(a).one(commit.db()).await.unwrap().unwrap();
    assert_eq!(a_row.status(), NodeStatus::Failed);

    let result = output(&commit, dataflow_id).await.unwrap();
    assert_eq!(result["input_echo"]["code"], json!("FUNCTION_EXECUTION_FAILED"));
    assert_eq!(result["input_echo"]["message"], json!("Intentional semantic failure"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn diamond_fan_out_fan_in_runs_branches_concurrently(pool: PgPool) {
    let (commit, process, nodes) = harness(pool);
    let dataflow_id = Uuid::new_v4();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    let d = Uuid::new_v4();

    commit
        .execute(
            dataflow_id,
            "seed",
            vec![
                create_workflow_cmd(dataflow_id),
                create_node_cmd(
                    a,
                    json!({"func_id": "echo", "data_targets": [
                        {"data_type": "node_input", "node_id": b, "key": "from_a"},
                        {"data_type": "node_input", "node_id": c, "key": "from_a"},
                    ]}),
                ),
                create_node_cmd(
                    b,
                    json!({
                        "func_id": "echo",
                        "inputs": {"required": ["from_a"]},
                        "data_targets": [{"data_type": "node_input", "node_id": d, "key": "from_b"}],
                    }),
                ),
                create_node_cmd(
                    c,
                    json!({
                        "func_id": "echo",
                        "inputs": {"required": ["from_a"]},
                        "data_targets": [{"data_type": "node_input", "node_id": d, "key": "from_c"}],
                    }),
                ),
                create_node_cmd(
                    d,
                    json!({
                        "func_id": "echo",
                        "inputs": {"required": ["from_b", "from_c"]},
                        "data_targets": [{"data_type": "workflow_output", "key": "result"}],
                    }),
                ),
                create_input_cmd(a, None, json!({"message": "diamond"})),
            ],
            ExecuteOpts::default(),
        )
        .await
        .unwrap();

    let status = run_to_completion(commit.clone(), process, nodes, dataflow_id).await;
    assert_eq!(status, WorkflowStatus::CompletedSuccess);

    let result = output(&commit, dataflow_id).await.unwrap();
    assert!(result["input_echo"]["from_b"].is_object());
    assert!(result["input_echo"]["from_c"].is_object());
    assert_eq!(result["input_echo"]["from_b"]["input_echo"]["from_a"]["message"], json!("diamond"));

    let b_result = DataReader::new(dataflow_id)
        .node_id(b)
        .data_type(DataType::NodeResult.as_str())
        .one(commit.db())
        .await
        .unwrap()
        .expect("b result");
    let c_result = DataReader::new(dataflow_id)
        .node_id(c)
        .data_type(DataType::NodeResult.as_str())
        .one(commit.db())
        .await
        .unwrap()
        .expect("c result");

    let gap_ms = (b_result.created_at - c_result.created_at).num_milliseconds().abs();
    assert!(gap_ms < 100, "fan-out branches should run concurrently, got {gap_ms}ms apart");
}

#[sqlx::test(migrations = "../../migrations")]
async fn cancel_stops_a_running_workflow(pool: PgPool) {
    let (commit, process, nodes) = harness(pool);
    let dataflow_id = Uuid::new_v4();
    let node_id = Uuid::new_v4();

    commit
        .execute(
            dataflow_id,
            "seed",
            vec![
                create_workflow_cmd(dataflow_id),
                create_node_cmd(
                    node_id,
                    json!({"func_id": "echo", "data_targets": [{"data_type": "workflow_output", "key": "result"}]}),
                ),
                create_input_cmd(node_id, None, json!({"message": "slow", "delay_ms": 5_000})),
            ],
            ExecuteOpts::default(),
        )
        .await
        .unwrap();

    let (_pid, done) = spawn(commit.clone(), process.clone(), nodes, dataflow_id).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel(&commit, &process, dataflow_id, Duration::from_millis(200)).await.unwrap();

    let status = tokio::time::timeout(Duration::from_secs(2), done)
        .await
        .expect("cancel did not stop the workflow in time")
        .expect("driver task panicked")
        .expect("driver exited with an error");
    assert_eq!(status, WorkflowStatus::Cancelled);

    let node = NodeReader::new(dataflow_id).node_id(node_id).one(commit.db()).await.unwrap().unwrap();
    assert_eq!(node.status(), NodeStatus::Cancelled);
}

#[sqlx::test(migrations = "../../migrations")]
async fn cancel_on_a_completed_workflow_is_rejected(pool: PgPool) {
    let (commit, process, nodes) = harness(pool);
    let dataflow_id = Uuid::new_v4();
    let node_id = Uuid::new_v4();

    commit
        .execute(
            dataflow_id,
            "seed",
            vec![
                create_workflow_cmd(dataflow_id),
                create_node_cmd(
                    node_id,
                    json!({"func_id": "echo", "data_targets": [{"data_type": "workflow_output", "key": "result"}]}),
                ),
                create_input_cmd(node_id, None, json!({"message": "fast"})),
            ],
            ExecuteOpts::default(),
        )
        .await
        .unwrap();

    let status = run_to_completion(commit.clone(), process.clone(), nodes, dataflow_id).await;
    assert_eq!(status, WorkflowStatus::CompletedSuccess);

    let err = cancel(&commit, &process, dataflow_id, Duration::from_secs(1)).await.unwrap_err();
    assert_eq!(err.to_string(), "cannot be cancelled in current state: completed_success");
}

#[sqlx::test(migrations = "../../migrations")]
async fn execute_rejects_an_empty_commands_batch(pool: PgPool) {
    let (commit, _process, _nodes) = harness(pool);
    let dataflow_id = Uuid::new_v4();

    let err = commit.execute(dataflow_id, "seed", vec![], ExecuteOpts::default()).await.unwrap_err();
    assert!(matches!(err, CommitError::EmptyCommands));
}

#[sqlx::test(migrations = "../../migrations")]
async fn applying_an_unknown_commit_id_fails(pool: PgPool) {
    let (commit, _process, _nodes) = harness(pool);
    let dataflow_id = Uuid::new_v4();

    commit
        .execute(dataflow_id, "seed", vec![create_workflow_cmd(dataflow_id)], ExecuteOpts::default())
        .await
        .unwrap();

    let err = commit
        .execute(
            dataflow_id,
            "seed",
            vec![Command::ApplyCommit(ApplyCommitPayload { commit_id: Uuid::new_v4() })],
            ExecuteOpts::default(),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Commit not found"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn update_workflow_rejects_status_change_once_terminal(pool: PgPool) {
    let (commit, process, nodes) = harness(pool);
    let dataflow_id = Uuid::new_v4();
    let node_id = Uuid::new_v4();

    commit
        .execute(
            dataflow_id,
            "seed",
            vec![
                create_workflow_cmd(dataflow_id),
                create_node_cmd(
                    node_id,
                    json!({"func_id": "echo", "data_targets": [{"data_type": "workflow_output", "key": "result"}]}),
                ),
                create_input_cmd(node_id, None, json!({"message": "fast"})),
            ],
            ExecuteOpts::default(),
        )
        .await
        .unwrap();

    let status = run_to_completion(commit.clone(), process.clone(), nodes, dataflow_id).await;
    assert_eq!(status, WorkflowStatus::CompletedSuccess);

    let err = commit
        .execute(
            dataflow_id,
            "seed",
            vec![Command::UpdateWorkflow(UpdateWorkflowPayload {
                dataflow_id,
                status: Some(WorkflowStatus::Running),
                last_commit_id: None,
                metadata: None,
                merge_metadata: true,
            })],
            ExecuteOpts::default(),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("terminal"));

    commit
        .execute(
            dataflow_id,
            "seed",
            vec![Command::UpdateWorkflow(UpdateWorkflowPayload {
                dataflow_id,
                status: None,
                last_commit_id: None,
                metadata: Some(json!({"note": "archived"})),
                merge_metadata: true,
            })],
            ExecuteOpts::default(),
        )
        .await
        .unwrap();

    let workflow = db::repository::workflows::get_workflow(commit.db(), dataflow_id).await.unwrap();
    assert_eq!(workflow.status(), WorkflowStatus::CompletedSuccess);
    assert_eq!(workflow.metadata["note"], json!("archived"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn create_data_defaults_content_type_to_json_without_inference(pool: PgPool) {
    let (commit, _process, _nodes) = harness(pool);
    let dataflow_id = Uuid::new_v4();
    let node_id = Uuid::new_v4();

    commit
        .execute(
            dataflow_id,
            "seed",
            vec![
                create_workflow_cmd(dataflow_id),
                create_node_cmd(node_id, json!({"func_id": "echo"})),
                Command::CreateData(CreateDataPayload {
                    data_id: None,
                    node_id: Some(node_id),
                    data_type: DataType::NodeInput,
                    discriminator: None,
                    key: None,
                    content: json!("a bare string payload"),
                    content_type: None,
                    metadata: json!({}),
                }),
            ],
            ExecuteOpts::default(),
        )
        .await
        .unwrap();

    let data = DataReader::new(dataflow_id)
        .node_id(node_id)
        .data_type(DataType::NodeInput.as_str())
        .one(commit.db())
        .await
        .unwrap()
        .expect("node_input row");
    assert_eq!(data.content_type, "application/json");
}
