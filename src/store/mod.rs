//! State-store implementations for workflow and task execution records.

mod base;
mod memory;
mod postgres;

pub use base::{
    StateStore, StateTransaction, StoreError, StoreResult, TaskExecutionPatch,
    TaskExecutionRecord, WorkflowExecutionPatch, WorkflowExecutionRecord,
};
pub use memory::MemoryStateStore;
pub use postgres::PostgresStateStore;
