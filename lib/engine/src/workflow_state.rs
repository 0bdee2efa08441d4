//! Durable and in-memory state for one workflow.
//!
//! Grounded on the teacher's `RunState`/`RunStateBuilder::build_from_events`
//! (`run_state.rs`) — the replay-to-reconstruct pattern — but replaying rows
//! already persisted in the `Store` rather than an event log.

use crate::command::{ApplyOutcome, Command, Commit, CommitResult, CreateDataPayload, NodePatch, OperationId};
use crate::data::{DataId, DataRow, DataType, ResultDiscriminator};
use crate::envelope::Envelope;
use crate::error::{StoreError, WorkflowStateError};
use crate::node::{Node, NodeId, NodeStatus};
use crate::process::Pid;
use crate::snapshot::{InputTracker, Snapshot};
use crate::store::Store;
use crate::worker_contract::WorkerExit;
use crate::workflow::WorkflowStatus;
use crate::yield_state::{ChildStatus, YieldId, YieldInfo};
use chrono::Utc;
use gridwork_core::WorkflowId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The wire shape of a `NODE_YIELD` data row's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct YieldPayload {
    yield_id: YieldId,
    reply_to: String,
    run_nodes: Vec<NodeId>,
    child_path: Vec<NodeId>,
}

/// Outcome of `handle_process_exit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub node_id: NodeId,
    pub success: bool,
    pub result_data_id: DataId,
    /// Set when this exit completed every child of a live yield.
    pub yield_complete: Option<(NodeId, YieldInfo)>,
}

/// Owns durable and in-memory state for one workflow.
pub struct WorkflowState {
    workflow_id: WorkflowId,
    store: Arc<dyn Store>,
    workflow_status: WorkflowStatus,
    workflow_running_latch: bool,
    nodes: BTreeMap<NodeId, Node>,
    input_tracker: InputTracker,
    has_workflow_output: bool,
    active_yields: BTreeMap<NodeId, YieldInfo>,
    active_processes: BTreeMap<NodeId, Pid>,
    pid_to_node: BTreeMap<Pid, NodeId>,
    node_results: BTreeMap<NodeId, Vec<DataRow>>,
    seen_data_ids: BTreeSet<DataId>,
    queue: Vec<Command>,
    processed_operation_ids: BTreeSet<OperationId>,
}

impl WorkflowState {
    /// Loads and recovers state for `workflow_id` from the store. See the
    /// module docs and spec §4.2 for the six-step sequence.
    pub async fn load(store: Arc<dyn Store>, workflow_id: WorkflowId) -> Result<Self, WorkflowStateError> {
        let record = store
            .load_workflow(workflow_id)
            .await?
            .ok_or(WorkflowStateError::WorkflowNotFound { workflow_id })?;

        let node_rows = store.list_nodes(workflow_id).await?;
        let mut nodes = BTreeMap::new();
        let mut input_tracker = InputTracker::default();
        for node in node_rows {
            input_tracker
                .requirements
                .insert(node.node_id, node.requirements());
            nodes.insert(node.node_id, node);
        }

        let data_rows = store.list_data(workflow_id).await?;
        let mut has_workflow_output = false;
        let mut seen_data_ids = BTreeSet::new();
        let mut node_results: BTreeMap<NodeId, Vec<DataRow>> = BTreeMap::new();
        let mut yield_rows: Vec<DataRow> = Vec::new();
        for row in &data_rows {
            seen_data_ids.insert(row.data_id);
            match &row.data_type {
                DataType::WorkflowOutput => has_workflow_output = true,
                DataType::NodeInput => {
                    if let (Some(node_id), Some(key)) = (row.node_id, &row.key) {
                        input_tracker.mark_available(node_id, key.clone());
                    }
                }
                DataType::NodeResult => {
                    if let Some(node_id) = row.node_id {
                        node_results.entry(node_id).or_default().push(row.clone());
                    }
                }
                DataType::NodeYield => yield_rows.push(row.clone()),
                _ => {}
            }
        }

        let mut state = Self {
            workflow_id,
            store,
            workflow_status: record.status,
            workflow_running_latch: record.status != WorkflowStatus::Pending,
            nodes,
            input_tracker,
            has_workflow_output,
            active_yields: BTreeMap::new(),
            active_processes: BTreeMap::new(),
            pid_to_node: BTreeMap::new(),
            node_results,
            seen_data_ids,
            queue: Vec::new(),
            processed_operation_ids: BTreeSet::new(),
        };

        state.reset_running_to_pending();
        state.reconstruct_active_yields(&yield_rows);

        if !state.queue.is_empty() {
            state.persist().await?;
        }

        Ok(state)
    }

    fn reset_running_to_pending(&mut self) {
        let running: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.status == NodeStatus::Running)
            .map(|n| n.node_id)
            .collect();
        for node_id in running {
            self.nodes.get_mut(&node_id).unwrap().status = NodeStatus::Pending;
            self.queue.push(Command::UpdateNode {
                node_id,
                patch: NodePatch {
                    status: Some(NodeStatus::Pending),
                    metadata: None,
                    config: None,
                },
            });
        }
    }

    fn reconstruct_active_yields(&mut self, yield_rows: &[DataRow]) {
        for row in yield_rows {
            let Some(owner) = row.node_id else { continue };
            let Some(owner_node) = self.nodes.get(&owner) else {
                continue;
            };
            if owner_node.status != NodeStatus::Pending {
                continue;
            }
            let payload: YieldPayload = match serde_json::from_value(row.content.clone()) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(node_id = %owner, error = %e, "skipping malformed yield payload");
                    continue;
                }
            };

            let mut pending_children = BTreeMap::new();
            let mut results = BTreeMap::new();
            for child_id in &payload.run_nodes {
                let Some(child) = self.nodes.get(child_id) else {
                    // Missing children are dropped from pending_children.
                    continue;
                };
                let status = ChildStatus::from_node_status(child.status);
                pending_children.insert(*child_id, status);
                if !status.is_pending() {
                    if let Some(latest) = self.latest_result_for(*child_id) {
                        results.insert(*child_id, latest);
                    }
                }
            }

            self.active_yields.insert(
                owner,
                YieldInfo {
                    yield_id: payload.yield_id,
                    reply_to: payload.reply_to,
                    child_path: payload.child_path,
                    pending_children,
                    results,
                },
            );
        }
    }

    fn latest_result_for(&self, node_id: NodeId) -> Option<DataId> {
        self.node_results
            .get(&node_id)
            .and_then(|rows| rows.iter().max_by_key(|r| r.created_at))
            .map(|r| r.data_id)
    }

    /// An immutable view for the scheduler.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            nodes: self.nodes.clone(),
            active_yields: self.active_yields.clone(),
            active_processes: self.active_processes.keys().copied().collect(),
            input_tracker: self.input_tracker.clone(),
            has_workflow_output: self.has_workflow_output,
        }
    }

    #[must_use]
    pub fn workflow_status(&self) -> WorkflowStatus {
        self.workflow_status
    }

    #[must_use]
    pub fn node(&self, node_id: NodeId) -> Option<Node> {
        self.nodes.get(&node_id).cloned()
    }

    #[must_use]
    pub fn active_yield(&self, parent_id: NodeId) -> Option<YieldInfo> {
        self.active_yields.get(&parent_id).cloned()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Enqueues a command for the next `persist()` call.
    pub fn queue_command(&mut self, command: Command) {
        self.queue.push(command);
    }

    /// Queues `UPDATE_NODE{status=RUNNING}` for a batch of survivors, and
    /// `UPDATE_WORKFLOW{status=RUNNING}` on first dispatch only.
    pub fn mark_running(&mut self, node_ids: &[NodeId]) {
        if !self.workflow_running_latch {
            self.workflow_running_latch = true;
            self.queue_command(Command::UpdateWorkflow {
                status: Some(WorkflowStatus::Running),
                metadata_patch: json!({}),
            });
            self.workflow_status = WorkflowStatus::Running;
        }
        for &node_id in node_ids {
            self.queue_command(Command::UpdateNode {
                node_id,
                patch: NodePatch {
                    status: Some(NodeStatus::Running),
                    metadata: None,
                    config: None,
                },
            });
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.status = NodeStatus::Running;
            }
        }
    }

    /// Marks a batch of nodes failed (used when a spawn or persist fails
    /// mid-dispatch) and marks the workflow failed.
    pub fn mark_batch_failed(&mut self, node_ids: &[NodeId], reason: &str) {
        for &node_id in node_ids {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.status = NodeStatus::CompletedFailure;
            }
            self.queue_command(Command::UpdateNode {
                node_id,
                patch: NodePatch {
                    status: Some(NodeStatus::CompletedFailure),
                    metadata: None,
                    config: None,
                },
            });
            let data_id = DataId::new();
            self.queue_command(Command::CreateData(CreateDataPayload {
                data_id: Some(data_id),
                data_type: DataType::NodeResult,
                content: json!({ "error": { "message": reason } }),
                content_type: None,
                node_id: Some(node_id),
                key: None,
                discriminator: Some(ResultDiscriminator::Error),
                metadata: json!({}),
            }));
            self.node_results.entry(node_id).or_default().push(DataRow {
                data_id,
                workflow_id: self.workflow_id,
                node_id: Some(node_id),
                data_type: DataType::NodeResult,
                discriminator: Some(ResultDiscriminator::Error),
                key: None,
                content: json!({ "error": { "message": reason } }),
                content_type: None,
                metadata: json!({}),
                created_at: Utc::now(),
            });
        }
    }

    /// Tracks a newly spawned worker process for `node_id`.
    pub fn track_process(&mut self, node_id: NodeId, pid: Pid) {
        self.active_processes.insert(node_id, pid);
        self.pid_to_node.insert(pid, node_id);
    }

    /// Resolves a tracked pid back to its node id, if still tracked.
    #[must_use]
    pub fn node_for_pid(&self, pid: Pid) -> Option<NodeId> {
        self.pid_to_node.get(&pid).copied()
    }

    /// Pids of every currently tracked worker process, terminated wholesale
    /// on CANCEL.
    #[must_use]
    pub fn active_pids(&self) -> Vec<Pid> {
        self.active_processes.values().copied().collect()
    }

    /// Absorbs a process exit: updates the terminal node status, records
    /// its `NODE_RESULT`, and folds the outcome into any live yield this
    /// node is a child of.
    pub fn handle_process_exit(&mut self, pid: Pid, exit: WorkerExit) -> Result<ExitInfo, WorkflowStateError> {
        let node_id = self
            .pid_to_node
            .remove(&pid)
            .ok_or_else(|| WorkflowStateError::Store(StoreError::NotFound {
                message: format!("no tracked process for pid {pid}"),
            }))?;
        self.active_processes.remove(&node_id);

        let success = matches!(exit, WorkerExit::Success { .. });
        let status = if success {
            NodeStatus::CompletedSuccess
        } else {
            NodeStatus::CompletedFailure
        };
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.status = status;
        }
        self.queue_command(Command::UpdateNode {
            node_id,
            patch: NodePatch {
                status: Some(status),
                metadata: None,
                config: None,
            },
        });

        let data_id = DataId::new();
        let discriminator = if success {
            ResultDiscriminator::Success
        } else {
            ResultDiscriminator::Error
        };
        let content = match exit {
            WorkerExit::Success { result } => result,
            WorkerExit::Failure { error } => json!({ "error": { "message": error } }),
        };
        self.queue_command(Command::CreateData(CreateDataPayload {
            data_id: Some(data_id),
            data_type: DataType::NodeResult,
            content: content.clone(),
            content_type: None,
            node_id: Some(node_id),
            key: None,
            discriminator: Some(discriminator),
            metadata: json!({}),
        }));
        self.node_results.entry(node_id).or_default().push(DataRow {
            data_id,
            workflow_id: self.workflow_id,
            node_id: Some(node_id),
            data_type: DataType::NodeResult,
            discriminator: Some(discriminator),
            key: None,
            content,
            content_type: None,
            metadata: json!({}),
            created_at: Utc::now(),
        });

        let yield_complete = self.mark_yield_child(node_id, success, data_id);

        Ok(ExitInfo {
            node_id,
            success,
            result_data_id: data_id,
            yield_complete,
        })
    }

    fn mark_yield_child(
        &mut self,
        child_id: NodeId,
        success: bool,
        data_id: DataId,
    ) -> Option<(NodeId, YieldInfo)> {
        let parent_id = *self
            .active_yields
            .iter()
            .find(|(_, y)| y.pending_children.contains_key(&child_id))
            .map(|(parent, _)| parent)?;
        let info = self.active_yields.get_mut(&parent_id)?;
        let status = if success {
            ChildStatus::CompletedSuccess
        } else {
            ChildStatus::CompletedFailure
        };
        info.pending_children.insert(child_id, status);
        info.results.insert(child_id, data_id);
        if info.is_satisfiable() {
            Some((parent_id, info.clone()))
        } else {
            None
        }
    }

    /// Installs a freshly registered yield, per a `yield_request` message.
    ///
    /// Also queues `UPDATE_NODE{status=PENDING}` for the parent: per spec
    /// §3 a yielding parent reads as PENDING on disk at steady state, and
    /// the scheduler separately refuses to ever re-launch a node with a
    /// live yield (see `Snapshot::is_yielding_parent`).
    pub fn track_yield(&mut self, parent_id: NodeId, yield_id: YieldId, reply_to: String, run_nodes: Vec<NodeId>, child_path: Vec<NodeId>) {
        let mut pending_children = BTreeMap::new();
        let mut results = BTreeMap::new();
        for child_id in &run_nodes {
            if let Some(child) = self.nodes.get(child_id) {
                let status = ChildStatus::from_node_status(child.status);
                pending_children.insert(*child_id, status);
                if !status.is_pending() {
                    if let Some(latest) = self.latest_result_for(*child_id) {
                        results.insert(*child_id, latest);
                    }
                }
            }
        }

        self.active_yields.insert(
            parent_id,
            YieldInfo {
                yield_id,
                reply_to,
                child_path,
                pending_children,
                results,
            },
        );

        if let Some(node) = self.nodes.get_mut(&parent_id) {
            node.status = NodeStatus::Pending;
        }
        self.queue_command(Command::UpdateNode {
            node_id: parent_id,
            patch: NodePatch {
                status: Some(NodeStatus::Pending),
                metadata: None,
                config: None,
            },
        });
    }

    /// Satisfies a yield: queues the `NODE_YIELD_RESULT` row and drops the
    /// in-memory yield. The wire reply is the orchestrator's job, and must
    /// happen strictly after `persist()` succeeds.
    pub fn satisfy_yield(&mut self, parent_id: NodeId) -> Option<YieldInfo> {
        let info = self.active_yields.remove(&parent_id)?;
        let content = json!({
            "yield_id": info.yield_id,
            "results": info.results,
        });
        self.queue_command(Command::CreateData(CreateDataPayload {
            data_id: None,
            data_type: DataType::NodeYieldResult,
            content,
            content_type: None,
            node_id: Some(parent_id),
            key: None,
            discriminator: None,
            metadata: json!({}),
        }));
        Some(info)
    }

    /// Persists a `NODE_YIELD` row so the yield survives a crash before
    /// it's satisfiable.
    pub fn persist_yield_record(&mut self, parent_id: NodeId, info: &YieldInfo) {
        let content = serde_json::to_value(YieldPayload {
            yield_id: info.yield_id,
            reply_to: info.reply_to.clone(),
            run_nodes: info.pending_children.keys().copied().collect(),
            child_path: info.child_path.clone(),
        })
        .unwrap_or(JsonValue::Null);
        self.queue_command(Command::CreateData(CreateDataPayload {
            data_id: None,
            data_type: DataType::NodeYield,
            content,
            content_type: None,
            node_id: Some(parent_id),
            key: None,
            discriminator: None,
            metadata: json!({}),
        }));
    }

    /// Whether a node is "active": running, yielding, or a PENDING child of
    /// a live yield. Used to suppress duplicate spawns.
    #[must_use]
    pub fn is_active(&self, node_id: NodeId) -> bool {
        if self.active_processes.contains_key(&node_id) {
            return true;
        }
        if self.active_yields.contains_key(&node_id) {
            return true;
        }
        self.active_yields.values().any(|y| {
            y.pending_children
                .get(&node_id)
                .is_some_and(ChildStatus::is_pending)
        })
    }

    /// Scans every `COMPLETED_FAILURE` node's latest `NODE_RESULT` and
    /// returns a semicolon-joined summary of failure messages.
    #[must_use]
    pub fn get_failed_node_errors(&self) -> Option<String> {
        let mut messages = Vec::new();
        for node in self.nodes.values() {
            if node.status != NodeStatus::CompletedFailure {
                continue;
            }
            let Some(rows) = self.node_results.get(&node.node_id) else {
                continue;
            };
            let Some(latest) = rows.iter().max_by_key(|r| r.created_at) else {
                continue;
            };
            messages.push(extract_failure_message(&latest.content));
        }
        if messages.is_empty() {
            None
        } else {
            Some(messages.join("; "))
        }
    }

    /// Applies any queued commands as one atomic commit and absorbs the
    /// result into in-memory caches.
    pub async fn persist(&mut self) -> Result<CommitResult, WorkflowStateError> {
        if self.queue.is_empty() {
            return Ok(CommitResult {
                operation_id: OperationId::new(),
                outcomes: vec![],
            });
        }
        let commands = std::mem::take(&mut self.queue);
        let commit = Commit::new(commands.clone());
        let envelope = Envelope::new(commit);
        let result = self
            .store
            .apply_commit(self.workflow_id, envelope)
            .await
            .map_err(WorkflowStateError::Store)?;
        self.absorb(&commands, &result.outcomes);
        Ok(result)
    }

    fn absorb(&mut self, commands: &[Command], outcomes: &[ApplyOutcome]) {
        for (command, outcome) in commands.iter().zip(outcomes) {
            match (command, outcome) {
                (Command::CreateData(payload), ApplyOutcome::DataCreated { data_id }) => {
                    self.seen_data_ids.insert(*data_id);
                    match &payload.data_type {
                        DataType::WorkflowOutput => self.has_workflow_output = true,
                        DataType::NodeInput => {
                            if let (Some(node_id), Some(key)) = (payload.node_id, &payload.key) {
                                self.input_tracker.mark_available(node_id, key.clone());
                            }
                        }
                        _ => {}
                    }
                }
                (Command::ApplyCommit { operation_id }, ApplyOutcome::CommitApplied { .. }) => {
                    self.processed_operation_ids.insert(*operation_id);
                }
                _ => {}
            }
        }
    }

    /// Absorbs an `APPLY_COMMIT` notification for a commit a worker
    /// produced directly against the store: refreshes nodes and data from
    /// the store, applying only rows not already seen.
    pub async fn absorb_external_commit(&mut self, operation_id: OperationId) -> Result<(), WorkflowStateError> {
        if self.processed_operation_ids.contains(&operation_id) {
            return Ok(());
        }
        self.queue_command(Command::ApplyCommit { operation_id });
        self.persist().await?;

        let nodes = self.store.list_nodes(self.workflow_id).await?;
        for node in nodes {
            self.input_tracker
                .requirements
                .insert(node.node_id, node.requirements());
            self.nodes.insert(node.node_id, node);
        }

        let data_rows = self.store.list_data(self.workflow_id).await?;
        for row in data_rows {
            if !self.seen_data_ids.insert(row.data_id) {
                continue;
            }
            match &row.data_type {
                DataType::WorkflowOutput => self.has_workflow_output = true,
                DataType::NodeInput => {
                    if let (Some(node_id), Some(key)) = (row.node_id, &row.key) {
                        self.input_tracker.mark_available(node_id, key.clone());
                    }
                }
                DataType::NodeResult => {
                    if let Some(node_id) = row.node_id {
                        self.node_results.entry(node_id).or_default().push(row);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Queues the terminal `UPDATE_WORKFLOW` commit.
    pub fn mark_terminal(&mut self, status: WorkflowStatus, error: Option<&str>) {
        self.workflow_status = status;
        let metadata_patch = match error {
            Some(message) => json!({ "error": message }),
            None => json!({}),
        };
        self.queue_command(Command::UpdateWorkflow {
            status: Some(status),
            metadata_patch,
        });
    }
}

fn extract_failure_message(content: &JsonValue) -> String {
    if let Some(message) = content.pointer("/error/message").and_then(JsonValue::as_str) {
        return message.to_string();
    }
    if let Some(message) = content.get("message").and_then(JsonValue::as_str) {
        return message.to_string();
    }
    content.to_string()
}
