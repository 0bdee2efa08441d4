//! The durable store: the relational-style KV of workflow/node/data rows.
//!
//! The core makes no assumption about the storage engine beyond atomic
//! multi-row commit and point/range reads (spec §6). `Store` is the trait
//! boundary; `InMemoryStore` is the default in-process implementation used
//! by tests and by single-process deployments that don't need a shared
//! backing store.

use crate::command::{ApplyOutcome, Command, Commit, CommitResult};
use crate::data::{DataRow, DataType};
use crate::envelope::Envelope;
use crate::error::StoreError;
use crate::node::{Node, NodeId, NodeStatus};
use crate::workflow::WorkflowRecord;
use async_trait::async_trait;
use chrono::Utc;
use gridwork_core::WorkflowId;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Trait for the three logical tables (`workflows`, `nodes`, `data`) and
/// the atomic commit primitive that mutates them.
#[async_trait]
pub trait Store: Send + Sync {
    /// Loads the workflow row, or `None` if it doesn't exist.
    async fn load_workflow(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowRecord>, StoreError>;

    /// Lists every node row for a workflow.
    async fn list_nodes(&self, workflow_id: WorkflowId) -> Result<Vec<Node>, StoreError>;

    /// Lists every data row for a workflow.
    async fn list_data(&self, workflow_id: WorkflowId) -> Result<Vec<DataRow>, StoreError>;

    /// Applies one atomic commit, returning one outcome per command in
    /// order. Re-applying a commit with an operation id already seen is a
    /// no-op that returns the original outcomes (idempotent replay).
    async fn apply_commit(
        &self,
        workflow_id: WorkflowId,
        commit: Envelope<Commit>,
    ) -> Result<CommitResult, StoreError>;
}

#[derive(Debug, Default)]
struct WorkflowTables {
    workflow: Option<WorkflowRecord>,
    nodes: BTreeMap<NodeId, Node>,
    data: Vec<DataRow>,
}

/// An in-memory `Store` implementation backed by a single mutex-guarded
/// map. Suitable for tests and single-process deployments; not shared
/// across hosts.
#[derive(Default)]
pub struct InMemoryStore {
    workflows: Mutex<BTreeMap<WorkflowId, WorkflowTables>>,
    applied_commits: Mutex<BTreeMap<crate::command::OperationId, CommitResult>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/bootstrap helper: seeds a workflow row directly, bypassing the
    /// commit path (workflows are created externally per the worker
    /// contract, not by the orchestrator).
    pub fn seed_workflow(&self, record: WorkflowRecord) {
        let mut workflows = self.workflows.lock().unwrap();
        workflows.entry(record.workflow_id).or_default().workflow = Some(record);
    }

    /// Test/bootstrap helper: seeds a node row directly.
    pub fn seed_node(&self, node: Node) {
        let mut workflows = self.workflows.lock().unwrap();
        workflows
            .entry(node.workflow_id)
            .or_default()
            .nodes
            .insert(node.node_id, node);
    }

    /// Test/bootstrap helper: seeds a data row directly.
    pub fn seed_data(&self, row: DataRow) {
        let mut workflows = self.workflows.lock().unwrap();
        workflows.entry(row.workflow_id).or_default().data.push(row);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn load_workflow(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowRecord>, StoreError> {
        let workflows = self.workflows.lock().unwrap();
        Ok(workflows.get(&workflow_id).and_then(|t| t.workflow.clone()))
    }

    async fn list_nodes(&self, workflow_id: WorkflowId) -> Result<Vec<Node>, StoreError> {
        let workflows = self.workflows.lock().unwrap();
        Ok(workflows
            .get(&workflow_id)
            .map(|t| t.nodes.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_data(&self, workflow_id: WorkflowId) -> Result<Vec<DataRow>, StoreError> {
        let workflows = self.workflows.lock().unwrap();
        Ok(workflows
            .get(&workflow_id)
            .map(|t| t.data.clone())
            .unwrap_or_default())
    }

    async fn apply_commit(
        &self,
        workflow_id: WorkflowId,
        commit: Envelope<Commit>,
    ) -> Result<CommitResult, StoreError> {
        let commit = commit.into_payload();

        if let Some(cached) = self.applied_commits.lock().unwrap().get(&commit.operation_id) {
            return Ok(cached.clone());
        }

        let mut workflows = self.workflows.lock().unwrap();
        let table = workflows.entry(workflow_id).or_default();

        let mut outcomes = Vec::with_capacity(commit.commands.len());
        for command in &commit.commands {
            let outcome = apply_one(table, workflow_id, command)?;
            outcomes.push(outcome);
        }

        let result = CommitResult {
            operation_id: commit.operation_id,
            outcomes,
        };
        self.applied_commits
            .lock()
            .unwrap()
            .insert(commit.operation_id, result.clone());
        Ok(result)
    }
}

fn apply_one(
    table: &mut WorkflowTables,
    workflow_id: WorkflowId,
    command: &Command,
) -> Result<ApplyOutcome, StoreError> {
    match command {
        Command::CreateNode {
            node_id,
            parent_node_id,
            node_type,
            metadata,
            config,
        } => {
            table.nodes.insert(
                *node_id,
                Node {
                    node_id: *node_id,
                    workflow_id,
                    parent_node_id: *parent_node_id,
                    node_type: node_type.clone(),
                    status: NodeStatus::Pending,
                    metadata: metadata.clone(),
                    config: config.clone(),
                },
            );
            Ok(ApplyOutcome::NodeCreated { node_id: *node_id })
        }
        Command::UpdateNode { node_id, patch } => {
            let node = table.nodes.get_mut(node_id).ok_or_else(|| StoreError::NotFound {
                message: format!("node {node_id}"),
            })?;
            if let Some(status) = patch.status {
                node.status = status;
            }
            if let Some(metadata) = &patch.metadata {
                node.metadata = metadata.clone();
            }
            if let Some(config) = &patch.config {
                node.config = config.clone();
            }
            Ok(ApplyOutcome::NodeUpdated { node_id: *node_id })
        }
        Command::DeleteNode { node_id } => {
            table.nodes.remove(node_id);
            Ok(ApplyOutcome::NodeDeleted { node_id: *node_id })
        }
        Command::UpdateWorkflow {
            status,
            metadata_patch,
        } => {
            let record = table.workflow.get_or_insert_with(|| WorkflowRecord {
                workflow_id,
                status: crate::workflow::WorkflowStatus::Pending,
                metadata: serde_json::json!({}),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            });
            if let Some(status) = status {
                record.status = *status;
            }
            if let Some(obj) = metadata_patch.as_object() {
                if let Some(existing) = record.metadata.as_object_mut() {
                    for (k, v) in obj {
                        existing.insert(k.clone(), v.clone());
                    }
                } else {
                    record.metadata = metadata_patch.clone();
                }
            }
            record.updated_at = Utc::now();
            Ok(ApplyOutcome::WorkflowUpdated)
        }
        Command::CreateData(payload) => {
            let data_id = payload.data_id.unwrap_or_default();
            table.data.push(DataRow {
                data_id,
                workflow_id,
                node_id: payload.node_id,
                data_type: payload.data_type.clone(),
                discriminator: payload.discriminator,
                key: payload.key.clone(),
                content: payload.content.clone(),
                content_type: payload.content_type.clone(),
                metadata: payload.metadata.clone(),
                created_at: Utc::now(),
            });
            Ok(ApplyOutcome::DataCreated { data_id })
        }
        Command::ApplyCommit { operation_id } => Ok(ApplyOutcome::CommitApplied {
            operation_id: *operation_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CreateDataPayload;
    use serde_json::json;

    fn commit(commands: Vec<Command>) -> Envelope<Commit> {
        Envelope::new(Commit::new(commands))
    }

    #[tokio::test]
    async fn create_then_list_node() {
        let store = InMemoryStore::new();
        let workflow_id = WorkflowId::new();
        let node_id = NodeId::new();
        store
            .apply_commit(
                workflow_id,
                commit(vec![Command::CreateNode {
                    node_id,
                    parent_node_id: None,
                    node_type: "noop".into(),
                    metadata: json!({}),
                    config: json!({}),
                }]),
            )
            .await
            .expect("apply_commit");

        let nodes = store.list_nodes(workflow_id).await.expect("list_nodes");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id, node_id);
        assert_eq!(nodes[0].status, NodeStatus::Pending);
    }

    #[tokio::test]
    async fn commit_replay_is_idempotent() {
        let store = InMemoryStore::new();
        let workflow_id = WorkflowId::new();
        let node_id = NodeId::new();
        let envelope = commit(vec![Command::CreateNode {
            node_id,
            parent_node_id: None,
            node_type: "noop".into(),
            metadata: json!({}),
            config: json!({}),
        }]);

        store
            .apply_commit(workflow_id, envelope.clone())
            .await
            .expect("first apply");
        store
            .apply_commit(workflow_id, envelope)
            .await
            .expect("replay");

        let nodes = store.list_nodes(workflow_id).await.expect("list_nodes");
        assert_eq!(nodes.len(), 1);
    }

    #[tokio::test]
    async fn create_data_workflow_output_is_listed() {
        let store = InMemoryStore::new();
        let workflow_id = WorkflowId::new();
        store
            .apply_commit(
                workflow_id,
                commit(vec![Command::CreateData(CreateDataPayload {
                    data_id: None,
                    data_type: DataType::WorkflowOutput,
                    content: json!({"value": 1}),
                    content_type: None,
                    node_id: None,
                    key: None,
                    discriminator: None,
                    metadata: json!({}),
                })]),
            )
            .await
            .expect("apply_commit");

        let rows = store.list_data(workflow_id).await.expect("list_data");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data_type, DataType::WorkflowOutput);
    }
}
