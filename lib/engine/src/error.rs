//! Error types for the engine crate.
//!
//! Plain `Display`+`Error` enums layered with `From` impls, not
//! `rootcause::Report` — callers match on the failure kind (spawn failed vs.
//! not found vs. malformed yield), which a concrete enum expresses directly:
//! - `StoreError`, `ProcessError`, `TransportError`: errors from the three
//!   external-interface traits.
//! - `WorkflowStateError`: state-manager failures (load/recover, persist).
//! - `OrchestratorError`: the loop's own failures, wrapping the above.
//! - `EngineError`: top-level union used at the crate boundary.

use crate::node::NodeId;
use gridwork_core::WorkflowId;
use std::fmt;

/// Errors from the durable `Store` trait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    ConnectionFailed { message: String },
    NotFound { message: String },
    CommitFailed { message: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => write!(f, "store connection failed: {message}"),
            Self::NotFound { message } => write!(f, "store row not found: {message}"),
            Self::CommitFailed { message } => write!(f, "store commit failed: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from the `ProcessSupervisor` trait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    SpawnFailed { node_id: NodeId, message: String },
    NotFound { node_id: NodeId },
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnFailed { node_id, message } => {
                write!(f, "failed to spawn worker for node {node_id}: {message}")
            }
            Self::NotFound { node_id } => write!(f, "no tracked process for node {node_id}"),
        }
    }
}

impl std::error::Error for ProcessError {}

/// Errors from the `Transport` trait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    RegistrationFailed { name: String, message: String },
    SendFailed { topic: String, message: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegistrationFailed { name, message } => {
                write!(f, "failed to register process '{name}': {message}")
            }
            Self::SendFailed { topic, message } => {
                write!(f, "failed to send to topic '{topic}': {message}")
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors from `WorkflowState` load/recover and command application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowStateError {
    WorkflowNotFound { workflow_id: WorkflowId },
    Store(StoreError),
}

impl fmt::Display for WorkflowStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkflowNotFound { workflow_id } => {
                write!(f, "workflow not found: {workflow_id}")
            }
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for WorkflowStateError {}

impl From<StoreError> for WorkflowStateError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors raised by the orchestrator loop itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    InvalidInput { message: String },
    WorkflowState(WorkflowStateError),
    Process(ProcessError),
    Transport(TransportError),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput { message } => write!(f, "invalid input: {message}"),
            Self::WorkflowState(e) => write!(f, "workflow state error: {e}"),
            Self::Process(e) => write!(f, "process error: {e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<WorkflowStateError> for OrchestratorError {
    fn from(e: WorkflowStateError) -> Self {
        Self::WorkflowState(e)
    }
}

impl From<ProcessError> for OrchestratorError {
    fn from(e: ProcessError) -> Self {
        Self::Process(e)
    }
}

impl From<TransportError> for OrchestratorError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Top-level error union at the crate boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Orchestrator(OrchestratorError),
    WorkflowState(WorkflowStateError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Orchestrator(e) => write!(f, "orchestrator error: {e}"),
            Self::WorkflowState(e) => write!(f, "workflow state error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<OrchestratorError> for EngineError {
    fn from(e: OrchestratorError) -> Self {
        Self::Orchestrator(e)
    }
}

impl From<WorkflowStateError> for EngineError {
    fn from(e: WorkflowStateError) -> Self {
        Self::WorkflowState(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let err = StoreError::NotFound {
            message: "workflow row".into(),
        };
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn orchestrator_error_wraps_workflow_state_error() {
        let inner = WorkflowStateError::WorkflowNotFound {
            workflow_id: WorkflowId::new(),
        };
        let err: OrchestratorError = inner.into();
        assert!(err.to_string().contains("workflow not found"));
    }

    #[test]
    fn engine_error_wraps_orchestrator_error() {
        let inner = OrchestratorError::InvalidInput {
            message: "missing workflow_id".into(),
        };
        let err: EngineError = inner.into();
        assert!(err.to_string().contains("invalid input"));
    }
}
