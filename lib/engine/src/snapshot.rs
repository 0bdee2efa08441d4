//! The immutable view of state the scheduler consumes.

use crate::node::{InputRequirements, Node, NodeId, NodeStatus};
use crate::yield_state::YieldInfo;
use std::collections::{BTreeMap, BTreeSet};

/// Per-node input-availability bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputTracker {
    pub requirements: BTreeMap<NodeId, InputRequirements>,
    pub available: BTreeMap<NodeId, BTreeSet<String>>,
}

impl InputTracker {
    /// Marks the given key available for a node.
    pub fn mark_available(&mut self, node_id: NodeId, key: String) {
        self.available.entry(node_id).or_default().insert(key);
    }

    /// Whether the node has at least one available input row, regardless of
    /// key.
    #[must_use]
    pub fn has_any_input(&self, node_id: NodeId) -> bool {
        self.available
            .get(&node_id)
            .is_some_and(|keys| !keys.is_empty())
    }

    /// Whether every required key for the node is available.
    ///
    /// A node with no declared contract is "ready" under this definition
    /// the moment any input exists (see `Snapshot::is_ready` for the full
    /// readiness rule, which also covers declared-but-empty-required
    /// contracts).
    #[must_use]
    pub fn satisfies_required(&self, node_id: NodeId, reqs: &InputRequirements) -> bool {
        let available = self.available.get(&node_id);
        reqs.required.iter().all(|key| {
            available
                .map(|keys| keys.contains(key))
                .unwrap_or(false)
        })
    }
}

/// An immutable view of one workflow's state, consumed by `decide`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub nodes: BTreeMap<NodeId, Node>,
    /// Keyed by the yielding parent's node id.
    pub active_yields: BTreeMap<NodeId, YieldInfo>,
    pub active_processes: BTreeSet<NodeId>,
    pub input_tracker: InputTracker,
    pub has_workflow_output: bool,
}

impl Snapshot {
    /// Whether `node_id` belongs to the `run_nodes` set of some live yield.
    #[must_use]
    pub fn is_yield_child(&self, node_id: NodeId) -> bool {
        self.active_yields
            .values()
            .any(|y| y.pending_children.contains_key(&node_id))
    }

    /// Whether `node_id` is itself the owner of a live yield. Such a node
    /// stays PENDING on disk while its yield is outstanding (see
    /// DESIGN.md), but must never be re-launched by the scheduler; its
    /// worker process is still alive, parked on the reply topic.
    #[must_use]
    pub fn is_yielding_parent(&self, node_id: NodeId) -> bool {
        self.active_yields.contains_key(&node_id)
    }

    /// The live yield that owns `node_id` as a child, if any.
    #[must_use]
    pub fn owning_yield(&self, node_id: NodeId) -> Option<(NodeId, &YieldInfo)> {
        self.active_yields
            .iter()
            .find(|(_, y)| y.pending_children.contains_key(&node_id))
            .map(|(parent, y)| (*parent, y))
    }

    /// Per §3: a node with a declared contract is ready iff every required
    /// key is available. A node without one is ready when any input is
    /// available at all. Truly input-less roots are never "ready" by this
    /// definition — they are handled as root-ready candidates instead (see
    /// `scheduler::decide` priority 4) or fall into a deadlock class.
    #[must_use]
    pub fn is_ready(&self, node: &Node) -> bool {
        let reqs = self.input_tracker.requirements.get(&node.node_id);
        match reqs {
            Some(reqs) if reqs.declared => self.input_tracker.satisfies_required(node.node_id, reqs),
            _ => self.input_tracker.has_any_input(node.node_id),
        }
    }

    /// Whether `node_id` currently has a running process.
    #[must_use]
    pub fn is_active_process(&self, node_id: NodeId) -> bool {
        self.active_processes.contains(&node_id)
    }

    #[must_use]
    pub fn pending_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.status == NodeStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwork_core::WorkflowId;
    use serde_json::json;

    fn pending_node(workflow_id: WorkflowId, parent: Option<NodeId>) -> Node {
        Node {
            node_id: NodeId::new(),
            workflow_id,
            parent_node_id: parent,
            node_type: "noop".into(),
            status: NodeStatus::Pending,
            metadata: json!({}),
            config: json!({}),
        }
    }

    #[test]
    fn undeclared_contract_ready_with_any_input() {
        let wf = WorkflowId::new();
        let node = pending_node(wf, None);
        let mut snapshot = Snapshot::default();
        snapshot
            .input_tracker
            .mark_available(node.node_id, "cfg".into());
        assert!(snapshot.is_ready(&node));
    }

    #[test]
    fn declared_contract_requires_all_keys() {
        let wf = WorkflowId::new();
        let node = pending_node(wf, None);
        let mut snapshot = Snapshot::default();
        snapshot.input_tracker.requirements.insert(
            node.node_id,
            InputRequirements {
                declared: true,
                required: vec!["cfg".into(), "data".into()],
                optional: vec![],
            },
        );
        snapshot
            .input_tracker
            .mark_available(node.node_id, "cfg".into());
        assert!(!snapshot.is_ready(&node));
        snapshot
            .input_tracker
            .mark_available(node.node_id, "data".into());
        assert!(snapshot.is_ready(&node));
    }

    #[test]
    fn input_less_node_is_not_ready() {
        let wf = WorkflowId::new();
        let node = pending_node(wf, None);
        let snapshot = Snapshot::default();
        assert!(!snapshot.is_ready(&node));
    }
}
