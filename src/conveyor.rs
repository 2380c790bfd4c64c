//! Conveyance of terminal task outcomes to the owning workflow coordinator.
//!
//! The conveyor is the boundary this core calls into after an action
//! completes or fails. It guarantees exactly one conveyed outcome per
//! validated message and makes no assumption about commit visibility: the
//! coordinator's creating transaction may still be in flight when a result
//! arrives.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::messages::TaskRequest;
use crate::states::ExecutionState;

/// Terminal outcome of one task dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Error,
}

impl TaskOutcome {
    pub fn terminal_state(&self) -> ExecutionState {
        match self {
            TaskOutcome::Success => ExecutionState::Success,
            TaskOutcome::Error => ExecutionState::Error,
        }
    }
}

/// Reconciliation entry point owned by the workflow coordinator.
///
/// Implementations must serialize against their own transaction boundaries:
/// a result may be reported before the transaction that created the
/// workflow/task rows is visible to the caller, and the coordinator is
/// expected to re-read fresh state under its own lock/transaction rather
/// than assume monotonic arrival.
#[async_trait]
pub trait WorkflowCoordinator: Send + Sync {
    async fn report_result(
        &self,
        workbook_name: &str,
        execution_id: &str,
        task_id: &str,
        outcome: TaskOutcome,
        result: Option<Value>,
    ) -> Result<()>;
}

/// Delivers outcomes for a specific (workbook, execution, task) triple to
/// the coordinator.
#[derive(Clone)]
pub struct ResultConveyor {
    coordinator: Arc<dyn WorkflowCoordinator>,
}

impl ResultConveyor {
    pub fn new(coordinator: Arc<dyn WorkflowCoordinator>) -> Self {
        Self { coordinator }
    }

    pub async fn convey(
        &self,
        request: &TaskRequest,
        outcome: TaskOutcome,
        result: Option<Value>,
    ) -> Result<()> {
        info!(
            workbook_name = %request.workbook_name,
            execution_id = %request.execution_id,
            task_id = %request.id,
            outcome = %outcome.terminal_state(),
            "conveying task result",
        );
        metrics::counter!("belay_results_conveyed_total").increment(1);

        self.coordinator
            .report_result(
                &request.workbook_name,
                &request.execution_id,
                &request.id,
                outcome,
                result,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{TaskDsl, TaskRequest};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCoordinator {
        calls: Mutex<Vec<(String, String, String, TaskOutcome, Option<Value>)>>,
    }

    #[async_trait]
    impl WorkflowCoordinator for RecordingCoordinator {
        async fn report_result(
            &self,
            workbook_name: &str,
            execution_id: &str,
            task_id: &str,
            outcome: TaskOutcome,
            result: Option<Value>,
        ) -> Result<()> {
            self.calls.lock().unwrap().push((
                workbook_name.to_string(),
                execution_id.to_string(),
                task_id.to_string(),
                outcome,
                result,
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn convey_passes_the_triple_and_outcome() {
        let coordinator = Arc::new(RecordingCoordinator::default());
        let conveyor = ResultConveyor::new(coordinator.clone());

        let request = TaskRequest {
            workbook_name: "wb".to_string(),
            execution_id: "exec-1".to_string(),
            id: "task1".to_string(),
            task_dsl: TaskDsl {
                action: "std.echo".to_string(),
                params: serde_json::Map::new(),
            },
            service_dsl: Value::Null,
        };

        conveyor
            .convey(&request, TaskOutcome::Success, Some(json!(1)))
            .await
            .unwrap();

        let calls = coordinator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (wb, exec, task, outcome, result) = &calls[0];
        assert_eq!(wb, "wb");
        assert_eq!(exec, "exec-1");
        assert_eq!(task, "task1");
        assert_eq!(*outcome, TaskOutcome::Success);
        assert_eq!(*result, Some(json!(1)));
    }
}
