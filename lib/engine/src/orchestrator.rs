//! The orchestrator: a single-threaded event loop driving one workflow run.
//!
//! Grounded on the teacher's `orchestrator.rs` loop shape (subscribe to a
//! subject, drain a command queue, dispatch `RunState` mutations, react to
//! worker supervision events) but redriven against the pure `Scheduler`
//! (§4.1) instead of the teacher's own inline trigger logic, and against
//! `WorkflowState`/`Store` instead of NATS JetStream + an in-memory
//! `RunState`.

use crate::error::{OrchestratorError, ProcessError};
use crate::node::{Node, NodeId};
use crate::process::{Pid, ProcessEvent, ProcessSupervisor};
use crate::scheduler::{self, Decision, SchedulerConfig};
use crate::store::Store;
use crate::transport::{Transport, TransportMessage};
use crate::worker_contract::{WorkerExit, WorkerInput, YieldReplyMessage, YieldRequestMessage, YieldResponseData};
use crate::workflow::WorkflowStatus;
use crate::workflow_state::WorkflowState;
use async_trait::async_trait;
use gridwork_core::WorkflowId;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A caller-provided hook run once at startup, after the zero-node
/// short-circuit and before the dispatch loop. Its error is non-fatal: the
/// run proceeds regardless (spec §4.3 "optionally invoke a caller-provided
/// init function (non-fatal on error)").
#[async_trait]
pub trait InitFunc: Send + Sync {
    async fn run(&self, workflow_id: WorkflowId) -> Result<(), String>;
}

/// Tuning knobs for one orchestrator run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub scheduler: SchedulerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// The terminal result of a workflow run.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorOutcome {
    pub workflow_id: WorkflowId,
    pub success: bool,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
}

/// Drives one workflow from its current persisted state to completion.
///
/// One instance owns exactly one workflow's lifetime; the transport topic
/// `workflow.<id>` and `"yield_request"` are registered for the duration of
/// `run` and torn down on return, mirroring the teacher's per-run NATS
/// subscription lifecycle.
pub struct Orchestrator {
    workflow_id: WorkflowId,
    state: WorkflowState,
    store: Arc<dyn Store>,
    supervisor: Arc<dyn ProcessSupervisor>,
    transport: Arc<dyn Transport>,
    config: OrchestratorConfig,
    process_events: mpsc::UnboundedReceiver<ProcessEvent>,
    workflow_inbox: mpsc::UnboundedReceiver<TransportMessage>,
    init_func: Option<Arc<dyn InitFunc>>,
}

impl Orchestrator {
    /// Loads `workflow_id`'s state.
    ///
    /// The caller is responsible for registering the `workflow.<id>` topic
    /// on `transport` (e.g. via `InMemoryTransport::register`) before
    /// calling this, and passing the resulting receiver as `workflow_inbox`
    /// — mirroring how `process_events` is supplied already wired to the
    /// `ProcessSupervisor` the caller constructed. Keeping registration
    /// outside the orchestrator keeps `Transport` a narrow send-only trait.
    /// `init_func`, if given, runs once at the start of `run` (spec §4.3
    /// Startup); cancellation is delivered on `process_events` as
    /// `ProcessEvent::Cancel`, so a canceller only needs a clone of the
    /// sender the caller built `process_events` from.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow doesn't exist or its state can't be
    /// recovered from the store.
    pub async fn new(
        workflow_id: WorkflowId,
        store: Arc<dyn Store>,
        supervisor: Arc<dyn ProcessSupervisor>,
        transport: Arc<dyn Transport>,
        process_events: mpsc::UnboundedReceiver<ProcessEvent>,
        workflow_inbox: mpsc::UnboundedReceiver<TransportMessage>,
        config: OrchestratorConfig,
        init_func: Option<Arc<dyn InitFunc>>,
    ) -> Result<Self, OrchestratorError> {
        let state = WorkflowState::load(store.clone(), workflow_id)
            .await
            .map_err(OrchestratorError::WorkflowState)?;

        Ok(Self {
            workflow_id,
            state,
            store,
            supervisor,
            transport,
            config,
            process_events,
            workflow_inbox,
            init_func,
        })
    }

    /// Runs the workflow to completion: zero-node short-circuit, the
    /// optional init hook, then the strict-priority dispatch loop from spec
    /// §4.3 until the scheduler returns `CompleteWorkflow` or a `CANCEL`
    /// event arrives.
    pub async fn run(mut self) -> Result<OrchestratorOutcome, OrchestratorError> {
        if self.state.node_count() == 0 {
            return self.complete(true, "Empty workflow completed".into(), None).await;
        }

        if let Some(init_func) = self.init_func.clone() {
            if let Err(message) = init_func.run(self.workflow_id).await {
                tracing::warn!(workflow_id = %self.workflow_id, error = %message, "init function failed, continuing");
            }
        }

        loop {
            self.drain_pending_commits().await?;

            let snapshot = self.state.snapshot();
            let decision = scheduler::decide(&snapshot, &self.config.scheduler);

            match decision {
                Decision::NoWork => {
                    if let Some(outcome) = self.await_next_event().await? {
                        return Ok(outcome);
                    }
                }
                Decision::ExecuteNodes {
                    nodes,
                    parent_id: _,
                    trigger_reason: _,
                    child_path,
                } => {
                    self.dispatch_batch(nodes, child_path).await?;
                }
                Decision::SatisfyYield {
                    parent_id,
                    yield_id,
                    reply_to,
                    results,
                } => {
                    self.satisfy_yield(parent_id, yield_id, reply_to, results).await?;
                }
                Decision::CompleteWorkflow { success, message } => {
                    let output = if success {
                        self.latest_workflow_output().await?
                    } else {
                        None
                    };
                    return self.complete(success, message, output).await;
                }
            }
        }
    }

    async fn dispatch_batch(&mut self, nodes: Vec<NodeId>, path: Vec<NodeId>) -> Result<(), OrchestratorError> {
        self.state.mark_running(&nodes);
        self.state.persist().await.map_err(OrchestratorError::WorkflowState)?;

        for node_id in nodes {
            let Some(node) = self.state.node(node_id) else {
                continue;
            };
            let input = WorkerInput {
                workflow_id: self.workflow_id,
                node_id,
                node: node.clone(),
                path: path.clone(),
            };
            match self.supervisor.spawn(&node.node_type, input).await {
                Ok(pid) => self.state.track_process(node_id, pid),
                Err(ProcessError::SpawnFailed { node_id, message }) => {
                    self.state.mark_batch_failed(&[node_id], &message);
                    self.state.persist().await.map_err(OrchestratorError::WorkflowState)?;
                }
                Err(e) => return Err(OrchestratorError::Process(e)),
            }
        }
        Ok(())
    }

    async fn satisfy_yield(
        &mut self,
        parent_id: NodeId,
        yield_id: crate::yield_state::YieldId,
        reply_to: String,
        results: std::collections::BTreeMap<NodeId, crate::data::DataId>,
    ) -> Result<(), OrchestratorError> {
        self.state.satisfy_yield(parent_id);
        self.state.persist().await.map_err(OrchestratorError::WorkflowState)?;

        let message = TransportMessage::YieldReply(YieldReplyMessage {
            yield_id,
            response_data: YieldResponseData {
                ok: true,
                run_node_results: results,
                all_completed: true,
            },
        });
        self.transport
            .send(&reply_to, message)
            .await
            .map_err(OrchestratorError::Transport)?;
        Ok(())
    }

    /// Blocks on whichever event source fires first: a worker process exit,
    /// a link-down, a CANCEL signal, or an inbound yield-request /
    /// external-commit message. Returns `Some(outcome)` only if the event
    /// loop should terminate — which only a CANCEL does on its own.
    async fn await_next_event(&mut self) -> Result<Option<OrchestratorOutcome>, OrchestratorError> {
        tokio::select! {
            event = self.process_events.recv() => {
                match event {
                    Some(ProcessEvent::Exit { pid, exit, .. }) => {
                        self.absorb_exit(pid, exit).await?;
                        Ok(None)
                    }
                    Some(ProcessEvent::LinkDown { pid, node_id }) => {
                        self.absorb_exit(pid, WorkerExit::Failure {
                            error: format!("node {node_id} process link went down"),
                        }).await?;
                        Ok(None)
                    }
                    Some(ProcessEvent::Cancel { reason }) => self.cancel(reason).await.map(Some),
                    None => Ok(None),
                }
            }
            message = self.workflow_inbox.recv() => {
                self.handle_inbox_message(message).await?;
                Ok(None)
            }
        }
    }

    /// CANCEL: terminate every tracked worker without waiting, mark the
    /// workflow `CANCELLED` with `reason` in its metadata, persist, and
    /// return the outcome. Cooperative at the workflow boundary, forceful at
    /// the process boundary — any in-flight `satisfy_yield` reply racing
    /// with this is simply never sent, since the process behind it is gone.
    async fn cancel(&mut self, reason: String) -> Result<OrchestratorOutcome, OrchestratorError> {
        for pid in self.state.active_pids() {
            if let Err(e) = self.supervisor.terminate(pid).await {
                tracing::warn!(pid = %pid, error = %e, "terminate failed during cancel, continuing");
            }
        }
        self.state.mark_terminal(WorkflowStatus::Cancelled, Some(&reason));
        self.state.persist().await.map_err(OrchestratorError::WorkflowState)?;

        Ok(OrchestratorOutcome {
            workflow_id: self.workflow_id,
            success: false,
            output: None,
            error: Some(reason),
        })
    }

    async fn absorb_exit(&mut self, pid: Pid, exit: WorkerExit) -> Result<(), OrchestratorError> {
        let info = self
            .state
            .handle_process_exit(pid, exit)
            .map_err(OrchestratorError::WorkflowState)?;
        self.state.persist().await.map_err(OrchestratorError::WorkflowState)?;
        // A satisfiable yield is picked up by `scheduler::decide` on the next
        // loop iteration via `SatisfyYield`; nothing further to do here.
        let _ = info.yield_complete;
        Ok(())
    }

    async fn handle_inbox_message(&mut self, message: Option<TransportMessage>) -> Result<(), OrchestratorError> {
        match message {
            Some(TransportMessage::YieldRequest(msg)) => self.handle_yield_request(msg).await,
            Some(TransportMessage::Commit(result)) => {
                self.state
                    .absorb_external_commit(result.operation_id)
                    .await
                    .map_err(OrchestratorError::WorkflowState)
            }
            Some(TransportMessage::YieldReply(_)) | None => Ok(()),
        }
    }

    async fn handle_yield_request(&mut self, msg: YieldRequestMessage) -> Result<(), OrchestratorError> {
        let parent_id = msg.request_context.node_id;
        let snapshot = self.state.snapshot();
        if !snapshot.is_active_process(parent_id) {
            // The worker already exited (or was never tracked) by the time
            // this request was drained; nothing to attach the yield to.
            return Ok(());
        }
        let child_path = self.ancestor_chain(parent_id, &snapshot.nodes);

        self.state.track_yield(
            parent_id,
            msg.request_context.yield_id,
            msg.request_context.reply_to.clone(),
            msg.yield_context.run_nodes.clone(),
            child_path,
        );
        let info = self.state.active_yield(parent_id);
        if let Some(info) = info {
            self.state.persist_yield_record(parent_id, &info);
        }
        self.state.persist().await.map_err(OrchestratorError::WorkflowState)
    }

    /// Ancestor chain from the workflow root down to `node_id` inclusive.
    fn ancestor_chain(
        &self,
        node_id: NodeId,
        nodes: &std::collections::BTreeMap<NodeId, Node>,
    ) -> Vec<NodeId> {
        let mut chain = vec![node_id];
        let mut current = node_id;
        while let Some(parent) = nodes.get(&current).and_then(|n| n.parent_node_id) {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    async fn drain_pending_commits(&mut self) -> Result<(), OrchestratorError> {
        while let Ok(message) = self.workflow_inbox.try_recv() {
            self.handle_inbox_message(Some(message)).await?;
        }
        Ok(())
    }

    async fn latest_workflow_output(&self) -> Result<Option<JsonValue>, OrchestratorError> {
        let rows = self
            .store
            .list_data(self.workflow_id)
            .await
            .map_err(|e| OrchestratorError::WorkflowState(e.into()))?;
        Ok(rows
            .into_iter()
            .filter(|r| r.data_type == crate::data::DataType::WorkflowOutput)
            .max_by_key(|r| r.created_at)
            .map(|r| r.content))
    }

    async fn complete(
        mut self,
        success: bool,
        message: String,
        output: Option<JsonValue>,
    ) -> Result<OrchestratorOutcome, OrchestratorError> {
        let error = if success {
            None
        } else {
            Some(self.state.get_failed_node_errors().unwrap_or(message))
        };
        let status = if success {
            WorkflowStatus::CompletedSuccess
        } else {
            WorkflowStatus::CompletedFailure
        };
        self.state.mark_terminal(status, error.as_deref());
        self.state.persist().await.map_err(OrchestratorError::WorkflowState)?;

        Ok(OrchestratorOutcome {
            workflow_id: self.workflow_id,
            success,
            output,
            error,
        })
    }
}
