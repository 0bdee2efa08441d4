//! Wire types for the worker contract and the yield protocol (spec §6).

use crate::node::{Node, NodeId};
use crate::yield_state::YieldId;
use gridwork_core::WorkflowId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// What a worker process is handed on spawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInput {
    pub workflow_id: WorkflowId,
    pub node_id: NodeId,
    pub node: Node,
    /// Ancestor chain, immediate parent last; empty for a non-yield-driven
    /// spawn.
    pub path: Vec<NodeId>,
}

/// How a worker process terminated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerExit {
    Success { result: JsonValue },
    Failure { error: String },
}

/// `worker -> orchestrator`, topic `"yield_request"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldRequestMessage {
    pub request_context: YieldRequestContext,
    pub yield_context: YieldContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldRequestContext {
    pub yield_id: YieldId,
    pub node_id: NodeId,
    pub reply_to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldContext {
    pub run_nodes: Vec<NodeId>,
}

/// `orchestrator -> worker`, topic `reply_to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldReplyMessage {
    pub yield_id: YieldId,
    pub response_data: YieldResponseData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldResponseData {
    pub ok: bool,
    pub run_node_results: BTreeMap<NodeId, crate::data::DataId>,
    pub all_completed: bool,
}
