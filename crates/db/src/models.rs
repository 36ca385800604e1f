//! Shared domain and wire types for the dataflow storage layer.
//!
//! This module carries two kinds of types:
//!
//! - **Row structs** that map 1-to-1 onto database tables (`WorkflowRow`,
//!   `NodeRow`, `DataRecordRow`, `CommitRow`).
//! - **Shared domain types** (`Command`, `TargetDescriptor`, the status
//!   enums) that every layer above `db` — `ops`, `commit`, `nodes`, `engine`
//!   — needs in order to speak the same vocabulary without a dependency
//!   cycle. They live here, at the bottom of the stack, rather than in
//!   `engine` as the teacher split domain types, because `ops` (which sits
//!   below `engine`) also needs them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow (`dataflows.status`).
///
/// Transitions are monotonic toward a terminal state; once terminal, no
/// further command mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    CompletedSuccess,
    CompletedFailure,
    Cancelled,
    Terminated,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CompletedSuccess | Self::CompletedFailure | Self::Cancelled | Self::Terminated
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::CompletedSuccess => "completed_success",
            Self::CompletedFailure => "completed_failure",
            Self::Cancelled => "cancelled",
            Self::Terminated => "terminated",
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed_success" => Ok(Self::CompletedSuccess),
            "completed_failure" => Ok(Self::CompletedFailure),
            "cancelled" => Ok(Self::Cancelled),
            "terminated" => Ok(Self::Terminated),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a node (`nodes.status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Template,
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "template" => Ok(Self::Template),
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown node status: {other}")),
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Semantic type of a data record (`data.data_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    WorkflowInput,
    NodeInput,
    NodeResult,
    WorkflowOutput,
    NodeYield,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowInput => "workflow_input",
            Self::NodeInput => "node_input",
            Self::NodeResult => "node_result",
            Self::WorkflowOutput => "workflow_output",
            Self::NodeYield => "node_yield",
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workflow_input" => Ok(Self::WorkflowInput),
            "node_input" => Ok(Self::NodeInput),
            "node_result" => Ok(Self::NodeResult),
            "workflow_output" => Ok(Self::WorkflowOutput),
            "node_yield" => Ok(Self::NodeYield),
            other => Err(format!("unknown data type: {other}")),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Content type marking a data record as a pointer to another record.
pub const REFERENCE_CONTENT_TYPE: &str = "dataflow/reference";

/// Default content type for `CREATE_DATA` when none is given.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

// ---------------------------------------------------------------------------
// Target descriptor
// ---------------------------------------------------------------------------

/// A declarative routing rule on a node's `data_targets` / `error_targets`.
///
/// On node success (data_targets) or failure (error_targets), one new data
/// record is materialised per descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// `config.inputs.required` — the set of `node_input` keys a node needs
/// before it is considered ready.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputsSpec {
    #[serde(default)]
    pub required: Vec<String>,
}

/// The `config` JSON blob of a node, typed for convenience. Node
/// implementations are free to stash extra keys; those round-trip via
/// `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub data_targets: Vec<TargetDescriptor>,
    #[serde(default)]
    pub error_targets: Vec<TargetDescriptor>,
    #[serde(default)]
    pub inputs: Option<InputsSpec>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_node_id: Option<Uuid>,
    pub node_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateNodePayload {
    pub node_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    /// `None` = leave metadata untouched. `Some(Value::Null)` clears it.
    /// `Some(other)` merges (or replaces, see `merge_metadata`) it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default = "default_true")]
    pub merge_metadata: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteNodePayload {
    pub node_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDataPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<Uuid>,
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDataPayload {
    pub data_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default = "default_true")]
    pub merge_metadata: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteDataPayload {
    pub data_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkflowPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataflow_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_dataflow_id: Option<Uuid>,
    pub actor_id: String,
    pub workflow_type: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateWorkflowPayload {
    pub dataflow_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default = "default_true")]
    pub merge_metadata: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteWorkflowPayload {
    pub dataflow_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyCommitPayload {
    pub commit_id: Uuid,
}

fn default_true() -> bool {
    true
}

/// A single mutation. Tagged by `type` so the wire format is a flat JSON
/// object — unknown tags are rejected at deserialisation time by serde
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    #[serde(rename = "CREATE_NODE")]
    CreateNode(CreateNodePayload),
    #[serde(rename = "UPDATE_NODE")]
    UpdateNode(UpdateNodePayload),
    #[serde(rename = "DELETE_NODE")]
    DeleteNode(DeleteNodePayload),
    #[serde(rename = "CREATE_DATA")]
    CreateData(CreateDataPayload),
    #[serde(rename = "UPDATE_DATA")]
    UpdateData(UpdateDataPayload),
    #[serde(rename = "DELETE_DATA")]
    DeleteData(DeleteDataPayload),
    #[serde(rename = "CREATE_WORKFLOW")]
    CreateWorkflow(CreateWorkflowPayload),
    #[serde(rename = "UPDATE_WORKFLOW")]
    UpdateWorkflow(UpdateWorkflowPayload),
    #[serde(rename = "DELETE_WORKFLOW")]
    DeleteWorkflow(DeleteWorkflowPayload),
    #[serde(rename = "APPLY_COMMIT")]
    ApplyCommit(ApplyCommitPayload),
}

impl Command {
    /// Short tag used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateNode(_) => "CREATE_NODE",
            Self::UpdateNode(_) => "UPDATE_NODE",
            Self::DeleteNode(_) => "DELETE_NODE",
            Self::CreateData(_) => "CREATE_DATA",
            Self::UpdateData(_) => "UPDATE_DATA",
            Self::DeleteData(_) => "DELETE_DATA",
            Self::CreateWorkflow(_) => "CREATE_WORKFLOW",
            Self::UpdateWorkflow(_) => "UPDATE_WORKFLOW",
            Self::DeleteWorkflow(_) => "DELETE_WORKFLOW",
            Self::ApplyCommit(_) => "APPLY_COMMIT",
        }
    }

    pub fn is_node_op(&self) -> bool {
        matches!(self, Self::CreateNode(_) | Self::UpdateNode(_) | Self::DeleteNode(_))
    }

    pub fn is_workflow_op(&self) -> bool {
        matches!(
            self,
            Self::CreateWorkflow(_) | Self::UpdateWorkflow(_) | Self::DeleteWorkflow(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Commit payload
// ---------------------------------------------------------------------------

/// The `payload` column of a `dataflow_commits` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitPayload {
    pub op_id: String,
    pub commands: Vec<Command>,
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A persisted workflow row (`dataflows` table).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub dataflow_id: Uuid,
    pub parent_dataflow_id: Option<Uuid>,
    pub actor_id: String,
    pub workflow_type: String,
    pub status: String,
    pub metadata: serde_json::Value,
    pub last_commit_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    pub fn status(&self) -> WorkflowStatus {
        self.status.parse().expect("status column holds a valid WorkflowStatus")
    }
}

/// A persisted node row (`nodes` table).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeRow {
    pub node_id: Uuid,
    pub dataflow_id: Uuid,
    pub parent_node_id: Option<Uuid>,
    pub node_type: String,
    pub status: String,
    pub config: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NodeRow {
    pub fn status(&self) -> NodeStatus {
        self.status.parse().expect("status column holds a valid NodeStatus")
    }

    pub fn config(&self) -> NodeConfig {
        serde_json::from_value(self.config.clone()).unwrap_or_default()
    }
}

/// A persisted data record row (`data` table), with the `ref_*` columns
/// populated only when the reader resolved a reference.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DataRecordRow {
    pub data_id: Uuid,
    pub dataflow_id: Uuid,
    pub node_id: Option<Uuid>,
    pub data_type: String,
    pub discriminator: Option<String>,
    pub key: Option<String>,
    pub content: serde_json::Value,
    pub content_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_data_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_discriminator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_key: Option<String>,
}

impl DataRecordRow {
    pub fn data_type(&self) -> DataType {
        self.data_type.parse().expect("data_type column holds a valid DataType")
    }

    pub fn is_reference(&self) -> bool {
        self.content_type == REFERENCE_CONTENT_TYPE
    }

    /// Apply `replace_references`: overwrite content/content_type/discriminator/
    /// key/data_id with the referent's, keeping this row's own metadata and
    /// type. No-op when the reference is dangling (no `ref_*` columns set).
    pub fn replace_with_referent(&mut self) {
        if let Some(ref_data_id) = self.ref_data_id {
            self.data_id = ref_data_id;
            if let Some(content) = self.ref_content.take() {
                self.content = content;
            }
            if let Some(content_type) = self.ref_content_type.take() {
                self.content_type = content_type;
            }
            self.discriminator = self.ref_discriminator.take();
            self.key = self.ref_key.take();
        }
    }
}

/// A persisted commit row (`dataflow_commits` table).
#[derive(Debug, Clone, FromRow)]
pub struct CommitRow {
    pub commit_id: Uuid,
    pub dataflow_id: Uuid,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl CommitRow {
    pub fn payload(&self) -> Result<CommitPayload, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
