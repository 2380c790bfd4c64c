//! Transactional error handler, the last line of defense.
//!
//! Any failure not classified as an expected action-level failure lands
//! here. The handler forces both the owning workflow execution and the task
//! execution into `ERROR` inside its own scoped transaction, independent of
//! and never nested within whatever transaction was active at the point of
//! failure, so a partially-applied outer transaction cannot suppress the
//! transition. Failures raised while forcing are logged and swallowed.

use std::sync::Arc;

use tracing::error;

use crate::messages::TaskRequest;
use crate::states::ExecutionState;
use crate::store::{
    StateStore, StateTransaction, StoreResult, TaskExecutionPatch, WorkflowExecutionPatch,
};

#[derive(Clone)]
pub struct FaultHandler {
    store: Arc<dyn StateStore>,
}

impl FaultHandler {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Force workflow and task to `ERROR`, both or neither. Never returns an
    /// error and never panics; the intake loop must survive this path.
    pub async fn force_error(&self, request: &TaskRequest, failure: &anyhow::Error) {
        error!(
            workbook_name = %request.workbook_name,
            execution_id = %request.execution_id,
            task_id = %request.id,
            ?failure,
            "unexpected failure during dispatch, forcing error state",
        );
        metrics::counter!("belay_forced_errors_total").increment(1);

        if let Err(err) = self.apply(request).await {
            error!(?err, task_id = %request.id, "failed to force error state");
        }
    }

    async fn apply(&self, request: &TaskRequest) -> StoreResult<()> {
        let mut tx = self.store.begin_transaction().await?;
        match Self::stage(&mut *tx, request).await {
            Ok(()) => tx.commit().await,
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }

    async fn stage(tx: &mut dyn StateTransaction, request: &TaskRequest) -> StoreResult<()> {
        tx.update_workflow_execution(
            &request.workbook_name,
            &request.execution_id,
            WorkflowExecutionPatch {
                state: Some(ExecutionState::Error),
                output: None,
            },
        )
        .await?;
        tx.update_task_execution(
            &request.workbook_name,
            &request.execution_id,
            &request.id,
            TaskExecutionPatch {
                state: Some(ExecutionState::Error),
                result: None,
            },
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{TaskDsl, TaskRequest};
    use crate::store::MemoryStateStore;
    use anyhow::anyhow;
    use serde_json::Value;

    fn request() -> TaskRequest {
        TaskRequest {
            workbook_name: "wb".to_string(),
            execution_id: "exec-1".to_string(),
            id: "task1".to_string(),
            task_dsl: TaskDsl {
                action: "std.echo".to_string(),
                params: serde_json::Map::new(),
            },
            service_dsl: Value::Null,
        }
    }

    #[tokio::test]
    async fn forces_both_records_to_error() {
        let store = MemoryStateStore::new();
        store.insert_workflow_execution("wb", "exec-1", ExecutionState::Running);
        store.insert_task_execution("wb", "exec-1", "task1", ExecutionState::Idle);

        let handler = FaultHandler::new(Arc::new(store.clone()));
        handler.force_error(&request(), &anyhow!("boom")).await;

        let workflow = store.workflow_execution("wb", "exec-1").await.unwrap().unwrap();
        let task = store
            .task_execution("wb", "exec-1", "task1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(workflow.state, ExecutionState::Error);
        assert_eq!(task.state, ExecutionState::Error);
    }

    #[tokio::test]
    async fn partial_targets_leave_no_trace() {
        let store = MemoryStateStore::new();
        store.insert_workflow_execution("wb", "exec-1", ExecutionState::Running);
        // No task row: the forced transition must apply to neither record.

        let handler = FaultHandler::new(Arc::new(store.clone()));
        handler.force_error(&request(), &anyhow!("boom")).await;

        let workflow = store.workflow_execution("wb", "exec-1").await.unwrap().unwrap();
        assert_eq!(workflow.state, ExecutionState::Running);
    }

    #[tokio::test]
    async fn missing_everything_is_swallowed() {
        let store = MemoryStateStore::new();
        let handler = FaultHandler::new(Arc::new(store));
        // Must not panic or propagate.
        handler.force_error(&request(), &anyhow!("boom")).await;
    }
}
