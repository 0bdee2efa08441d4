//! The process layer: spawning and supervising worker processes.
//!
//! Modeled on the teacher's `Worker<O, E>` / `NodeExecutor` pair
//! (`worker.rs`), generalized from "one-shot node executor" to "a
//! long-running task that may itself send yield-request messages before
//! exiting" (spec §4.3). `InMemorySupervisor` runs each worker as a
//! `tokio::task`; node-type dispatch goes through a caller-supplied
//! `WorkerFactory` registry, per the dynamic-dispatch design note in §9.

use crate::error::ProcessError;
use crate::node::NodeId;
use crate::transport::Transport;
use crate::worker_contract::{WorkerExit, WorkerInput};
use async_trait::async_trait;
use gridwork_core::define_id;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

define_id!(
    /// Identifies one spawned worker process instance.
    Pid,
    "pid"
);

/// How a tracked process exited, or a control signal for the whole run.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Exit {
        pid: Pid,
        node_id: NodeId,
        exit: WorkerExit,
    },
    /// The process vanished without a clean exit (panicked, was killed by
    /// something other than `terminate`).
    LinkDown { pid: Pid, node_id: NodeId },
    /// Out-of-band request to cancel the whole workflow run. Delivered on
    /// the same channel as `Exit`/`LinkDown` since a canceller only needs a
    /// clone of the sender the supervisor was built with.
    Cancel { reason: String },
}

/// A node-type's worker body. Node types are resolved by name at spawn
/// time through a registry the caller supplies; this is the "common
/// worker capability set" referenced in §9.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn run(&self, input: WorkerInput, transport: Arc<dyn Transport>) -> WorkerExit;
}

/// Trait for spawning and terminating worker processes.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Spawns a linked+monitored worker process of `node_type` on the
    /// local host.
    async fn spawn(&self, node_type: &str, input: WorkerInput) -> Result<Pid, ProcessError>;

    /// Terminates a tracked worker without waiting for it to finish.
    async fn terminate(&self, pid: Pid) -> Result<(), ProcessError>;
}

/// An in-process `ProcessSupervisor` backed by `tokio::task::spawn`.
///
/// Worker exits are delivered asynchronously on the channel given at
/// construction; the orchestrator's event loop is the receiver.
pub struct InMemorySupervisor {
    registry: HashMap<String, Arc<dyn WorkerFactory>>,
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedSender<ProcessEvent>,
    handles: Mutex<HashMap<Pid, (NodeId, JoinHandle<()>)>>,
}

impl InMemorySupervisor {
    #[must_use]
    pub fn new(
        registry: HashMap<String, Arc<dyn WorkerFactory>>,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Self {
        Self {
            registry,
            transport,
            events,
            handles: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ProcessSupervisor for InMemorySupervisor {
    async fn spawn(&self, node_type: &str, input: WorkerInput) -> Result<Pid, ProcessError> {
        let node_id = input.node_id;
        let factory = self
            .registry
            .get(node_type)
            .ok_or_else(|| ProcessError::SpawnFailed {
                node_id,
                message: format!("no worker registered for node type '{node_type}'"),
            })?
            .clone();
        let pid = Pid::new();
        let transport = self.transport.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let exit = factory.run(input, transport).await;
            // The receiver outliving every sender is the orchestrator
            // shutting down; dropping the exit is correct in that case.
            let _ = events.send(ProcessEvent::Exit { pid, node_id, exit });
        });

        self.handles.lock().unwrap().insert(pid, (node_id, handle));
        Ok(pid)
    }

    async fn terminate(&self, pid: Pid) -> Result<(), ProcessError> {
        let entry = self.handles.lock().unwrap().remove(&pid);
        let Some((_, handle)) = entry else {
            return Err(ProcessError::NotFound { node_id: NodeId::new() });
        };
        handle.abort();
        Ok(())
    }
}

/// A worker factory that echoes its inputs back as the result (for tests).
pub struct EchoWorkerFactory;

#[async_trait]
impl WorkerFactory for EchoWorkerFactory {
    async fn run(&self, input: WorkerInput, _transport: Arc<dyn Transport>) -> WorkerExit {
        WorkerExit::Success {
            result: input.node.metadata.clone(),
        }
    }
}

/// A worker factory that always fails (for tests).
pub struct FailingWorkerFactory {
    pub error: String,
}

#[async_trait]
impl WorkerFactory for FailingWorkerFactory {
    async fn run(&self, _input: WorkerInput, _transport: Arc<dyn Transport>) -> WorkerExit {
        WorkerExit::Failure {
            error: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeStatus};
    use crate::transport::InMemoryTransport;
    use gridwork_core::WorkflowId;
    use serde_json::json;

    fn worker_input(node_type: &str) -> WorkerInput {
        let workflow_id = WorkflowId::new();
        WorkerInput {
            workflow_id,
            node_id: NodeId::new(),
            node: Node {
                node_id: NodeId::new(),
                workflow_id,
                parent_node_id: None,
                node_type: node_type.into(),
                status: NodeStatus::Running,
                metadata: json!({"echo": true}),
                config: json!({}),
            },
            path: vec![],
        }
    }

    #[tokio::test]
    async fn spawn_runs_registered_factory_and_reports_exit() {
        let mut registry: HashMap<String, Arc<dyn WorkerFactory>> = HashMap::new();
        registry.insert("echo".into(), Arc::new(EchoWorkerFactory));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let supervisor =
            InMemorySupervisor::new(registry, Arc::new(InMemoryTransport::new()), tx);

        let input = worker_input("echo");
        let node_id = input.node_id;
        let pid = supervisor.spawn("echo", input).await.expect("spawn");

        let event = rx.recv().await.expect("event");
        match event {
            ProcessEvent::Exit {
                pid: got_pid,
                node_id: got_node,
                exit: WorkerExit::Success { .. },
            } => {
                assert_eq!(got_pid, pid);
                assert_eq!(got_node, node_id);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_unknown_node_type_fails() {
        let registry: HashMap<String, Arc<dyn WorkerFactory>> = HashMap::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let supervisor =
            InMemorySupervisor::new(registry, Arc::new(InMemoryTransport::new()), tx);
        let result = supervisor.spawn("missing", worker_input("missing")).await;
        assert!(result.is_err());
    }
}
