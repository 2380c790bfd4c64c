//! Belay - task-execution core for a distributed workflow orchestration
//! engine.
//!
//! Belay consumes task-execution requests from a shared durable queue,
//! validates that the owning workflow and task are in a state where
//! execution is legal, dispatches the declared action synchronously or
//! asynchronously, and conveys the outcome to the owning workflow
//! coordinator under transactional guarantees. It is built around one
//! hazard: results and duplicate deliveries arriving out of order with the
//! transactions that created the records they refer to.

pub mod actions;
pub mod config;
pub mod conveyor;
pub mod dispatcher;
pub mod fault;
pub mod intake;
pub mod messages;
pub mod observability;
pub mod queue;
pub mod states;
pub mod store;

pub use actions::{Action, ActionError, ActionKind, ActionRegistry, EchoAction, RegistryError};
pub use config::{Config, QueueConfig};
pub use conveyor::{ResultConveyor, TaskOutcome, WorkflowCoordinator};
pub use dispatcher::TaskDispatcher;
pub use fault::FaultHandler;
pub use intake::IntakeLoop;
pub use messages::{MessageError, TaskDsl, TaskRequest};
pub use queue::{Delivery, MemoryTaskQueue, QueueError, TaskQueue};
pub use states::ExecutionState;
pub use store::{
    MemoryStateStore, PostgresStateStore, StateStore, StateTransaction, StoreError, StoreResult,
    TaskExecutionPatch, TaskExecutionRecord, WorkflowExecutionPatch, WorkflowExecutionRecord,
};
