//! Node types and the input-requirements contract.

use gridwork_core::define_id;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

define_id!(
    /// Unique identifier for a node within a workflow.
    NodeId,
    "node"
);

/// Lifecycle status of a node.
///
/// A node moves `Pending -> Running -> (CompletedSuccess | CompletedFailure)`
/// monotonically within one lifetime. `Running` observed on load means the
/// owning process was killed; recovery resets it back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    CompletedSuccess,
    CompletedFailure,
}

impl NodeStatus {
    /// Whether this status is one of the two terminal statuses.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::CompletedSuccess | Self::CompletedFailure)
    }
}

/// The declared input contract of a node, parsed out of `config.inputs`.
///
/// A node with no declared contract (`required` and `optional` both empty,
/// and `declared = false`) is ready as soon as *any* input row exists for
/// it — see `Snapshot::is_ready`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequirements {
    /// Whether `config.inputs` was present at all on the node.
    #[serde(default)]
    pub declared: bool,
    /// Keys that must all be available for the node to be ready.
    #[serde(default)]
    pub required: Vec<String>,
    /// Keys that may or may not be present; never block readiness.
    #[serde(default)]
    pub optional: Vec<String>,
}

impl InputRequirements {
    /// Parses a node's `config.inputs` object, if present, into a contract.
    ///
    /// Accepts `{"inputs": {"required": [...], "optional": [...]}}` shaped
    /// configs; any other shape (missing `inputs`, or a non-object value)
    /// yields an undeclared contract.
    #[must_use]
    pub fn parse(config: &JsonValue) -> Self {
        let Some(inputs) = config.get("inputs") else {
            return Self::default();
        };
        let required = inputs
            .get("required")
            .and_then(JsonValue::as_array)
            .map(|v| {
                v.iter()
                    .filter_map(|k| k.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();
        let optional = inputs
            .get("optional")
            .and_then(JsonValue::as_array)
            .map(|v| {
                v.iter()
                    .filter_map(|k| k.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            declared: true,
            required,
            optional,
        }
    }
}

/// One vertex of a workflow's dataflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub workflow_id: gridwork_core::WorkflowId,
    pub parent_node_id: Option<NodeId>,
    #[serde(rename = "type")]
    pub node_type: String,
    pub status: NodeStatus,
    pub metadata: JsonValue,
    pub config: JsonValue,
}

impl Node {
    /// A node is a root iff it has no parent.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_node_id.is_none()
    }

    /// The node's parsed input-requirements contract.
    #[must_use]
    pub fn requirements(&self) -> InputRequirements {
        InputRequirements::parse(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undeclared_contract_on_missing_inputs() {
        let reqs = InputRequirements::parse(&serde_json::json!({}));
        assert!(!reqs.declared);
        assert!(reqs.required.is_empty());
    }

    #[test]
    fn parses_required_and_optional() {
        let config = serde_json::json!({
            "inputs": { "required": ["cfg", "data"], "optional": ["note"] }
        });
        let reqs = InputRequirements::parse(&config);
        assert!(reqs.declared);
        assert_eq!(reqs.required, vec!["cfg", "data"]);
        assert_eq!(reqs.optional, vec!["note"]);
    }

    #[test]
    fn node_is_root_without_parent() {
        let node = Node {
            node_id: NodeId::new(),
            workflow_id: gridwork_core::WorkflowId::new(),
            parent_node_id: None,
            node_type: "noop".into(),
            status: NodeStatus::Pending,
            metadata: JsonValue::Null,
            config: JsonValue::Null,
        };
        assert!(node.is_root());
    }

    #[test]
    fn terminal_statuses() {
        assert!(NodeStatus::CompletedSuccess.is_terminal());
        assert!(NodeStatus::CompletedFailure.is_terminal());
        assert!(!NodeStatus::Pending.is_terminal());
        assert!(!NodeStatus::Running.is_terminal());
    }
}
