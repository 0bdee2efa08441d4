//! The commit format: ordered commands grouped under one operation id.

use crate::data::{DataId, DataType, ResultDiscriminator};
use crate::node::NodeId;
use crate::workflow::WorkflowStatus;
use gridwork_core::define_id;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

define_id!(
    /// Fresh unique id tagging a commit for idempotent replay.
    OperationId,
    "op"
);

/// Payload for a `CREATE_DATA` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDataPayload {
    pub data_id: Option<DataId>,
    pub data_type: DataType,
    pub content: JsonValue,
    pub content_type: Option<String>,
    pub node_id: Option<NodeId>,
    pub key: Option<String>,
    pub discriminator: Option<ResultDiscriminator>,
    #[serde(default)]
    pub metadata: JsonValue,
}

/// Patch applied by `UPDATE_NODE`; every field is optional so a command can
/// touch only what it needs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodePatch {
    pub status: Option<crate::node::NodeStatus>,
    pub metadata: Option<JsonValue>,
    pub config: Option<JsonValue>,
}

/// One state-mutating command. Recognized core types per the external
/// interface contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    CreateNode {
        node_id: NodeId,
        parent_node_id: Option<NodeId>,
        node_type: String,
        metadata: JsonValue,
        config: JsonValue,
    },
    UpdateNode {
        node_id: NodeId,
        patch: NodePatch,
    },
    DeleteNode {
        node_id: NodeId,
    },
    UpdateWorkflow {
        status: Option<WorkflowStatus>,
        metadata_patch: JsonValue,
    },
    CreateData(CreateDataPayload),
    ApplyCommit {
        operation_id: OperationId,
    },
}

/// One atomic group of state-mutating commands, tagged with a fresh
/// operation id for idempotent replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub operation_id: OperationId,
    pub commands: Vec<Command>,
}

impl Commit {
    #[must_use]
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            operation_id: OperationId::new(),
            commands,
        }
    }
}

/// The outcome of applying one command, as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    NodeCreated { node_id: NodeId },
    NodeUpdated { node_id: NodeId },
    NodeDeleted { node_id: NodeId },
    WorkflowUpdated,
    DataCreated { data_id: DataId },
    CommitApplied { operation_id: OperationId },
}

/// The store's response to a `Commit`: one outcome per command, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    pub operation_id: OperationId,
    pub outcomes: Vec<ApplyOutcome>,
}
