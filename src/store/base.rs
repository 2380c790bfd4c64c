//! State-store contract: transactional CRUD access to workflow-execution and
//! task-execution records.
//!
//! Record lifetimes are owned entirely by the workflow coordinator; this
//! crate never constructs or deletes them, only reads and conditionally
//! updates. Every write is either a single-record update or part of an
//! explicitly scoped transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::states::ExecutionState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One running instance of a workflow definition. Owned by the workflow
/// coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionRecord {
    pub id: String,
    pub workbook_name: String,
    pub state: ExecutionState,
    /// Populated only on terminal states.
    pub output: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One task within a workflow execution. Created by the coordinator before
/// the corresponding queue message is ever published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionRecord {
    pub id: String,
    pub execution_id: String,
    pub workbook_name: String,
    pub state: ExecutionState,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of a workflow execution record. Unset fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct WorkflowExecutionPatch {
    pub state: Option<ExecutionState>,
    pub output: Option<Value>,
}

/// Partial update of a task execution record.
#[derive(Debug, Clone, Default)]
pub struct TaskExecutionPatch {
    pub state: Option<ExecutionState>,
    pub result: Option<Value>,
}

/// Transactional CRUD access to execution records.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn workflow_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
    ) -> StoreResult<Option<WorkflowExecutionRecord>>;

    async fn task_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
        task_id: &str,
    ) -> StoreResult<Option<TaskExecutionRecord>>;

    /// Single-record update; fails with [`StoreError::NotFound`] when the
    /// record no longer exists.
    async fn update_workflow_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
        patch: WorkflowExecutionPatch,
    ) -> StoreResult<()>;

    /// Single-record update; fails with [`StoreError::NotFound`] when the
    /// record no longer exists.
    async fn update_task_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
        task_id: &str,
        patch: TaskExecutionPatch,
    ) -> StoreResult<()>;

    /// Open a scoped transaction: every update inside commits atomically or
    /// not at all.
    async fn begin_transaction(&self) -> StoreResult<Box<dyn StateTransaction>>;
}

/// A scoped store transaction. Dropping without [`commit`] discards the
/// buffered updates.
///
/// [`commit`]: StateTransaction::commit
#[async_trait]
pub trait StateTransaction: Send {
    async fn update_workflow_execution(
        &mut self,
        workbook_name: &str,
        execution_id: &str,
        patch: WorkflowExecutionPatch,
    ) -> StoreResult<()>;

    async fn update_task_execution(
        &mut self,
        workbook_name: &str,
        execution_id: &str,
        task_id: &str,
        patch: TaskExecutionPatch,
    ) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
