//! The pure decision function at the heart of the orchestrator.
//!
//! `decide` takes an immutable [`Snapshot`] and returns exactly one
//! [`Decision`]. It holds no state of its own and never mutates its input —
//! everything here is plain data in, plain data out.

use crate::data::DataId;
use crate::node::{NodeId, NodeStatus};
use crate::snapshot::Snapshot;
use crate::yield_state::YieldId;
use std::collections::BTreeMap;

/// Why a batch of nodes was selected to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    YieldDriven,
    InputReady,
    RootReady,
}

/// One of the four shapes `decide` can return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    ExecuteNodes {
        nodes: Vec<NodeId>,
        trigger_reason: TriggerReason,
        /// Set only for `TriggerReason::YieldDriven`.
        parent_id: Option<NodeId>,
        /// The yield's ancestor chain, used to tag the worker. Empty unless
        /// `trigger_reason == YieldDriven`.
        child_path: Vec<NodeId>,
    },
    SatisfyYield {
        parent_id: NodeId,
        yield_id: YieldId,
        reply_to: String,
        results: BTreeMap<NodeId, DataId>,
    },
    CompleteWorkflow {
        success: bool,
        message: String,
    },
    NoWork,
}

/// Tunables for the batching and yield-concurrency policy. Scheduling
/// *policy* beyond readiness + priority (fairness weights, rate limiting)
/// is explicitly out of scope; this only bounds batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_concurrent_nodes: usize,
    /// When false (the default), yield children are scheduled one at a
    /// time even if several are ready.
    pub yield_concurrency: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_nodes: 10,
            yield_concurrency: false,
        }
    }
}

/// The pure decision function. See module docs and spec §4.1 for the
/// priority order; this function implements it literally, returning on the
/// first match.
#[must_use]
pub fn decide(snapshot: &Snapshot, config: &SchedulerConfig) -> Decision {
    if let Some(decision) = satisfy_completed_yield(snapshot) {
        return decision;
    }
    if let Some(decision) = launch_yield_child(snapshot) {
        return decision;
    }
    if let Some(decision) = launch_input_ready_nodes(snapshot, config) {
        return decision;
    }
    if let Some(decision) = launch_root_ready_nodes(snapshot, config) {
        return decision;
    }
    if snapshot.active_processes.is_empty() && snapshot.active_yields.is_empty() {
        return check_completion(snapshot);
    }
    Decision::NoWork
}

fn satisfy_completed_yield(snapshot: &Snapshot) -> Option<Decision> {
    let (parent_id, info) = snapshot
        .active_yields
        .iter()
        .find(|(_, info)| info.is_satisfiable())?;
    Some(Decision::SatisfyYield {
        parent_id: *parent_id,
        yield_id: info.yield_id,
        reply_to: info.reply_to.clone(),
        results: info.results.clone(),
    })
}

fn launch_yield_child(snapshot: &Snapshot) -> Option<Decision> {
    for (parent_id, info) in &snapshot.active_yields {
        for (child_id, status) in &info.pending_children {
            if !status.is_pending() || snapshot.is_active_process(*child_id) {
                continue;
            }
            let Some(child_node) = snapshot.nodes.get(child_id) else {
                continue;
            };
            if !snapshot.is_ready(child_node) {
                continue;
            }
            return Some(Decision::ExecuteNodes {
                nodes: vec![*child_id],
                trigger_reason: TriggerReason::YieldDriven,
                parent_id: Some(*parent_id),
                child_path: info.child_path.clone(),
            });
        }
    }
    None
}

fn launch_input_ready_nodes(snapshot: &Snapshot, config: &SchedulerConfig) -> Option<Decision> {
    let batch: Vec<NodeId> = snapshot
        .pending_nodes()
        .filter(|n| {
            let reqs = snapshot.input_tracker.requirements.get(&n.node_id);
            let declared = reqs.is_some_and(|r| r.declared);
            declared
                && snapshot.is_ready(n)
                && !snapshot.is_yield_child(n.node_id)
                && !snapshot.is_yielding_parent(n.node_id)
                && !snapshot.is_active_process(n.node_id)
        })
        .map(|n| n.node_id)
        .take(config.max_concurrent_nodes.max(1))
        .collect();
    if batch.is_empty() {
        return None;
    }
    Some(Decision::ExecuteNodes {
        nodes: batch,
        trigger_reason: TriggerReason::InputReady,
        parent_id: None,
        child_path: vec![],
    })
}

fn launch_root_ready_nodes(snapshot: &Snapshot, config: &SchedulerConfig) -> Option<Decision> {
    let batch: Vec<NodeId> = snapshot
        .pending_nodes()
        .filter(|n| {
            let reqs = snapshot.input_tracker.requirements.get(&n.node_id);
            let declared = reqs.is_some_and(|r| r.declared);
            !declared
                && snapshot.input_tracker.has_any_input(n.node_id)
                && !snapshot.is_yield_child(n.node_id)
                && !snapshot.is_yielding_parent(n.node_id)
                && !snapshot.is_active_process(n.node_id)
        })
        .map(|n| n.node_id)
        .take(config.max_concurrent_nodes.max(1))
        .collect();
    if batch.is_empty() {
        return None;
    }
    Some(Decision::ExecuteNodes {
        nodes: batch,
        trigger_reason: TriggerReason::RootReady,
        parent_id: None,
        child_path: vec![],
    })
}

fn check_completion(snapshot: &Snapshot) -> Decision {
    if snapshot.nodes.is_empty() {
        return Decision::CompleteWorkflow {
            success: true,
            message: "Empty workflow completed".into(),
        };
    }
    if snapshot.has_workflow_output {
        return Decision::CompleteWorkflow {
            success: true,
            message: "Workflow completed successfully".into(),
        };
    }
    let pending: Vec<_> = snapshot.pending_nodes().collect();
    if pending.is_empty() {
        return Decision::CompleteWorkflow {
            success: false,
            message: "Workflow completed without producing output".into(),
        };
    }
    // Unreachable via decide()'s priority chain: any ready PENDING node
    // would already have matched priority 3 or 4 above.
    let any_runnable = pending.iter().any(|n| snapshot.is_ready(n));
    if any_runnable {
        return Decision::NoWork;
    }
    let truly_inputless = pending.iter().any(|n| {
        let reqs = snapshot.input_tracker.requirements.get(&n.node_id);
        let declared = reqs.is_some_and(|r| r.declared);
        !declared && !snapshot.input_tracker.has_any_input(n.node_id)
    });
    if truly_inputless {
        Decision::CompleteWorkflow {
            success: false,
            message: "No input data provided".into(),
        }
    } else {
        Decision::CompleteWorkflow {
            success: false,
            message: "Workflow deadlocked: nodes pending but no inputs available".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataId;
    use crate::node::{InputRequirements, Node};
    use crate::yield_state::{ChildStatus, YieldInfo};
    use gridwork_core::WorkflowId;
    use serde_json::json;

    fn node(workflow_id: WorkflowId, parent: Option<NodeId>, status: NodeStatus) -> Node {
        Node {
            node_id: NodeId::new(),
            workflow_id,
            parent_node_id: parent,
            node_type: "noop".into(),
            status,
            metadata: json!({}),
            config: json!({}),
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
    }

    // --- concrete scenarios, spec §8 ---

    #[test]
    fn empty_workflow_completes_successfully() {
        let snapshot = Snapshot::default();
        let decision = decide(&snapshot, &config());
        assert_eq!(
            decision,
            Decision::CompleteWorkflow {
                success: true,
                message: "Empty workflow completed".into(),
            }
        );
    }

    #[test]
    fn single_root_with_input_and_no_contract_executes() {
        let wf = WorkflowId::new();
        let root = node(wf, None, NodeStatus::Pending);
        let mut snapshot = Snapshot::default();
        snapshot
            .input_tracker
            .mark_available(root.node_id, "cfg".into());
        let root_id = root.node_id;
        snapshot.nodes.insert(root_id, root);

        let decision = decide(&snapshot, &config());
        assert_eq!(
            decision,
            Decision::ExecuteNodes {
                nodes: vec![root_id],
                trigger_reason: TriggerReason::RootReady,
                parent_id: None,
                child_path: vec![],
            }
        );
    }

    #[test]
    fn root_with_unmet_requirement_deadlocks() {
        let wf = WorkflowId::new();
        let root = node(wf, None, NodeStatus::Pending);
        let root_id = root.node_id;
        let mut snapshot = Snapshot::default();
        snapshot.input_tracker.requirements.insert(
            root_id,
            InputRequirements {
                declared: true,
                required: vec!["cfg".into(), "data".into()],
                optional: vec![],
            },
        );
        snapshot.input_tracker.mark_available(root_id, "cfg".into());
        snapshot.nodes.insert(root_id, root);

        let decision = decide(&snapshot, &config());
        assert_eq!(
            decision,
            Decision::CompleteWorkflow {
                success: false,
                message: "Workflow deadlocked: nodes pending but no inputs available".into(),
            }
        );
    }

    #[test]
    fn diamond_schedules_both_ready_middle_nodes() {
        let wf = WorkflowId::new();
        let a = node(wf, None, NodeStatus::CompletedSuccess);
        let b = node(wf, None, NodeStatus::Pending);
        let c = node(wf, None, NodeStatus::Pending);
        let d = node(wf, None, NodeStatus::Pending);
        let (a_id, b_id, c_id, d_id) = (a.node_id, b.node_id, c.node_id, d.node_id);

        let mut snapshot = Snapshot::default();
        for (id, reqs) in [
            (
                b_id,
                InputRequirements {
                    declared: true,
                    required: vec!["from_a".into()],
                    optional: vec![],
                },
            ),
            (
                c_id,
                InputRequirements {
                    declared: true,
                    required: vec!["from_a".into()],
                    optional: vec![],
                },
            ),
            (
                d_id,
                InputRequirements {
                    declared: true,
                    required: vec!["from_b".into(), "from_c".into()],
                    optional: vec![],
                },
            ),
        ] {
            snapshot.input_tracker.requirements.insert(id, reqs);
        }
        snapshot.input_tracker.mark_available(b_id, "from_a".into());
        snapshot.input_tracker.mark_available(c_id, "from_a".into());

        for n in [a, b, c, d] {
            snapshot.nodes.insert(n.node_id, n);
        }

        let decision = decide(&snapshot, &config());
        match decision {
            Decision::ExecuteNodes {
                nodes,
                trigger_reason,
                ..
            } => {
                assert_eq!(trigger_reason, TriggerReason::InputReady);
                let set: std::collections::BTreeSet<_> = nodes.into_iter().collect();
                assert_eq!(set, [b_id, c_id].into_iter().collect());
            }
            other => panic!("expected ExecuteNodes, got {other:?}"),
        }
        let _ = a_id;
    }

    #[test]
    fn satisfy_yield_wins_over_ready_root() {
        let wf = WorkflowId::new();
        let parent = node(wf, None, NodeStatus::Pending);
        let root = node(wf, None, NodeStatus::Pending);
        let parent_id = parent.node_id;
        let root_id = root.node_id;

        let child1 = NodeId::new();
        let child2 = NodeId::new();
        let mut pending_children = BTreeMap::new();
        pending_children.insert(child1, ChildStatus::CompletedSuccess);
        pending_children.insert(child2, ChildStatus::CompletedSuccess);

        let mut snapshot = Snapshot::default();
        snapshot.active_yields.insert(
            parent_id,
            YieldInfo {
                yield_id: YieldId::new(),
                reply_to: "worker.reply".into(),
                child_path: vec![parent_id],
                pending_children,
                results: BTreeMap::new(),
            },
        );
        snapshot.input_tracker.mark_available(root_id, "cfg".into());
        snapshot.nodes.insert(parent_id, parent);
        snapshot.nodes.insert(root_id, root);

        let decision = decide(&snapshot, &config());
        match decision {
            Decision::SatisfyYield { parent_id: p, .. } => assert_eq!(p, parent_id),
            other => panic!("expected SatisfyYield, got {other:?}"),
        }
    }

    #[test]
    fn yield_child_wins_over_input_ready_non_yield_node() {
        let wf = WorkflowId::new();
        let parent = node(wf, None, NodeStatus::Pending);
        let parent_id = parent.node_id;
        let child = NodeId::new();
        let other = node(wf, None, NodeStatus::Pending);
        let other_id = other.node_id;

        let child_node = Node {
            node_id: child,
            workflow_id: wf,
            parent_node_id: Some(parent_id),
            node_type: "noop".into(),
            status: NodeStatus::Pending,
            metadata: json!({}),
            config: json!({}),
        };

        let mut pending_children = BTreeMap::new();
        pending_children.insert(child, ChildStatus::Pending);

        let mut snapshot = Snapshot::default();
        snapshot.active_yields.insert(
            parent_id,
            YieldInfo {
                yield_id: YieldId::new(),
                reply_to: "worker.reply".into(),
                child_path: vec![parent_id],
                pending_children,
                results: BTreeMap::new(),
            },
        );
        snapshot.input_tracker.mark_available(child, "cfg".into());
        snapshot.input_tracker.mark_available(other_id, "cfg".into());
        snapshot.nodes.insert(parent_id, parent);
        snapshot.nodes.insert(child, child_node);
        snapshot.nodes.insert(other_id, other);

        let decision = decide(&snapshot, &config());
        match decision {
            Decision::ExecuteNodes {
                nodes,
                trigger_reason,
                parent_id: p,
                child_path,
            } => {
                assert_eq!(nodes, vec![child]);
                assert_eq!(trigger_reason, TriggerReason::YieldDriven);
                assert_eq!(p, Some(parent_id));
                assert_eq!(child_path, vec![parent_id]);
            }
            other => panic!("expected ExecuteNodes, got {other:?}"),
        }
    }

    #[test]
    fn no_pending_nodes_and_no_output_fails() {
        let wf = WorkflowId::new();
        let n = node(wf, None, NodeStatus::CompletedSuccess);
        let mut snapshot = Snapshot::default();
        snapshot.nodes.insert(n.node_id, n);
        let decision = decide(&snapshot, &config());
        assert_eq!(
            decision,
            Decision::CompleteWorkflow {
                success: false,
                message: "Workflow completed without producing output".into(),
            }
        );
    }

    #[test]
    fn inputless_pending_node_fails_with_no_input_data() {
        let wf = WorkflowId::new();
        let n = node(wf, None, NodeStatus::Pending);
        let mut snapshot = Snapshot::default();
        snapshot.nodes.insert(n.node_id, n);
        let decision = decide(&snapshot, &config());
        assert_eq!(
            decision,
            Decision::CompleteWorkflow {
                success: false,
                message: "No input data provided".into(),
            }
        );
    }

    #[test]
    fn has_output_wins_even_with_failed_nodes() {
        let wf = WorkflowId::new();
        let failed = node(wf, None, NodeStatus::CompletedFailure);
        let mut snapshot = Snapshot::default();
        snapshot.has_workflow_output = true;
        snapshot.nodes.insert(failed.node_id, failed);
        let decision = decide(&snapshot, &config());
        assert_eq!(
            decision,
            Decision::CompleteWorkflow {
                success: true,
                message: "Workflow completed successfully".into(),
            }
        );
    }

    // --- invariants, spec §8 ---

    #[test]
    fn decide_is_pure_and_deterministic() {
        let wf = WorkflowId::new();
        let root = node(wf, None, NodeStatus::Pending);
        let mut snapshot = Snapshot::default();
        snapshot
            .input_tracker
            .mark_available(root.node_id, "cfg".into());
        snapshot.nodes.insert(root.node_id, root);
        let before = snapshot.clone();

        let d1 = decide(&snapshot, &config());
        let d2 = decide(&snapshot, &config());
        assert_eq!(d1, d2);
        assert_eq!(snapshot, before);
    }

    #[test]
    fn execute_nodes_batch_is_never_empty() {
        let snapshot = Snapshot::default();
        match decide(&snapshot, &config()) {
            Decision::ExecuteNodes { nodes, .. } => assert!(!nodes.is_empty()),
            _ => {}
        }
    }

    #[test]
    fn non_empty_active_work_never_completes() {
        let wf = WorkflowId::new();
        let mut snapshot = Snapshot::default();
        snapshot.active_processes.insert(NodeId::new());
        snapshot.has_workflow_output = true;
        snapshot.nodes.insert(NodeId::new(), node(wf, None, NodeStatus::Running));
        let decision = decide(&snapshot, &config());
        assert!(!matches!(decision, Decision::CompleteWorkflow { .. }));
    }

    #[test]
    fn executed_node_is_pending_and_not_already_active() {
        let wf = WorkflowId::new();
        let root = node(wf, None, NodeStatus::Pending);
        let root_id = root.node_id;
        let mut snapshot = Snapshot::default();
        snapshot.input_tracker.mark_available(root_id, "cfg".into());
        snapshot.nodes.insert(root_id, root);

        match decide(&snapshot, &config()) {
            Decision::ExecuteNodes { nodes, .. } => {
                for id in nodes {
                    let n = &snapshot.nodes[&id];
                    assert_eq!(n.status, NodeStatus::Pending);
                    assert!(!snapshot.is_active_process(id));
                }
            }
            other => panic!("expected ExecuteNodes, got {other:?}"),
        }
    }
}
