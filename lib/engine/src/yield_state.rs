//! In-memory representation of a live yield and its children.

use crate::data::DataId;
use crate::node::{NodeId, NodeStatus};
use gridwork_core::define_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

define_id!(
    /// Unique identifier for a yield request.
    YieldId,
    "yield"
);

/// The status of a child spawned by a yield, as tracked by the parent's
/// `pending_children` map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildStatus {
    Pending,
    CompletedSuccess,
    CompletedFailure,
}

impl ChildStatus {
    #[must_use]
    pub fn from_node_status(status: NodeStatus) -> Self {
        match status {
            NodeStatus::Pending | NodeStatus::Running => Self::Pending,
            NodeStatus::CompletedSuccess => Self::CompletedSuccess,
            NodeStatus::CompletedFailure => Self::CompletedFailure,
        }
    }

    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// A live yield: a durable request by a running node to spawn a set of
/// children and wait for all of them to terminate.
///
/// `BTreeMap` keeps `pending_children` in a deterministic order, which
/// keeps the scheduler's child-selection tests (§8 scenario 6) stable
/// without depending on hash iteration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YieldInfo {
    pub yield_id: YieldId,
    pub reply_to: String,
    /// Full ancestor chain, immediate parent last, per the spec's
    /// authoritative interpretation of `child_path` (see DESIGN.md).
    pub child_path: Vec<NodeId>,
    pub pending_children: BTreeMap<NodeId, ChildStatus>,
    /// `NODE_RESULT` data_id for each child that has completed.
    pub results: BTreeMap<NodeId, DataId>,
}

impl YieldInfo {
    /// A yield is satisfiable iff no entry in `pending_children` is still
    /// PENDING. An empty `run_nodes` yield is retained and satisfies
    /// immediately.
    #[must_use]
    pub fn is_satisfiable(&self) -> bool {
        self.pending_children.values().all(|s| !s.is_pending())
    }

    /// The first child still pending, and not yet scheduled.
    #[must_use]
    pub fn first_pending_child(&self) -> Option<NodeId> {
        self.pending_children
            .iter()
            .find(|(_, status)| status.is_pending())
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yield_info(children: &[(NodeId, ChildStatus)]) -> YieldInfo {
        YieldInfo {
            yield_id: YieldId::new(),
            reply_to: "worker.reply".into(),
            child_path: vec![],
            pending_children: children.iter().copied().collect(),
            results: BTreeMap::new(),
        }
    }

    #[test]
    fn satisfiable_when_no_child_pending() {
        let a = NodeId::new();
        let b = NodeId::new();
        let info = yield_info(&[
            (a, ChildStatus::CompletedSuccess),
            (b, ChildStatus::CompletedFailure),
        ]);
        assert!(info.is_satisfiable());
    }

    #[test]
    fn not_satisfiable_with_pending_child() {
        let a = NodeId::new();
        let b = NodeId::new();
        let info = yield_info(&[(a, ChildStatus::CompletedSuccess), (b, ChildStatus::Pending)]);
        assert!(!info.is_satisfiable());
        assert_eq!(info.first_pending_child(), Some(b));
    }

    #[test]
    fn empty_run_nodes_is_satisfiable() {
        let info = yield_info(&[]);
        assert!(info.is_satisfiable());
        assert_eq!(info.first_pending_child(), None);
    }
}
