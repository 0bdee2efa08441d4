//! A recoverable, hierarchical, directed-dataflow-graph orchestrator.
//!
//! Three pieces, per the architecture: a pure [`scheduler`] that maps a
//! [`snapshot::Snapshot`] to one [`scheduler::Decision`] with no side
//! effects, a durable [`workflow_state::WorkflowState`] that owns recovery
//! and commit application against a [`store::Store`], and an
//! [`orchestrator::Orchestrator`] event loop that drives the two against a
//! [`process::ProcessSupervisor`] and a [`transport::Transport`].

pub mod command;
pub mod data;
pub mod envelope;
pub mod error;
pub mod node;
pub mod orchestrator;
pub mod process;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod transport;
pub mod worker_contract;
pub mod workflow;
pub mod workflow_state;
pub mod yield_state;

pub use command::{ApplyOutcome, Command, Commit, CommitResult, OperationId};
pub use data::{DataId, DataRow, DataType, ResultDiscriminator};
pub use envelope::Envelope;
pub use error::EngineError;
pub use node::{Node, NodeId, NodeStatus};
pub use orchestrator::{InitFunc, Orchestrator, OrchestratorConfig, OrchestratorOutcome};
pub use process::{Pid, ProcessEvent, ProcessSupervisor, WorkerFactory};
pub use scheduler::{Decision, SchedulerConfig};
pub use snapshot::Snapshot;
pub use store::Store;
pub use transport::{Transport, TransportMessage};
pub use worker_contract::{WorkerExit, WorkerInput};
pub use workflow::{WorkflowRecord, WorkflowStatus};
pub use workflow_state::WorkflowState;
pub use yield_state::{ChildStatus, YieldId, YieldInfo};
