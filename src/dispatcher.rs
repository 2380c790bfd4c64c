//! Task dispatcher: execution-mode policy and local state transitions.
//!
//! Synchronous actions complete within the dispatch call and defer all state
//! commitment to the coordinator's reconciliation; persisting an intermediate
//! `RUNNING` on that path would open a window where a concurrent reader
//! observes a running task that has in fact already finished. An asynchronous
//! start is the only path that persists `RUNNING` directly.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::actions::{ActionError, ActionKind, ActionRegistry, ResolvedAction};
use crate::conveyor::{ResultConveyor, TaskOutcome};
use crate::messages::TaskRequest;
use crate::states::ExecutionState;
use crate::store::{StateStore, TaskExecutionPatch};

pub struct TaskDispatcher {
    registry: Arc<ActionRegistry>,
    store: Arc<dyn StateStore>,
    conveyor: ResultConveyor,
    sync_action_timeout: Option<Duration>,
}

impl TaskDispatcher {
    pub fn new(
        registry: Arc<ActionRegistry>,
        store: Arc<dyn StateStore>,
        conveyor: ResultConveyor,
    ) -> Self {
        Self {
            registry,
            store,
            conveyor,
            sync_action_timeout: None,
        }
    }

    /// Build a dispatcher honoring the process configuration.
    pub fn from_config(
        config: &crate::config::Config,
        registry: Arc<ActionRegistry>,
        store: Arc<dyn StateStore>,
        conveyor: ResultConveyor,
    ) -> Self {
        Self::new(registry, store, conveyor).with_sync_action_timeout(config.sync_action_timeout)
    }

    /// Apply a deadline to synchronous action execution. `None` (the
    /// default) leaves execution unbounded.
    pub fn with_sync_action_timeout(mut self, deadline: Option<Duration>) -> Self {
        self.sync_action_timeout = deadline;
        self
    }

    /// Dispatch one validated task request. `Err` means an unexpected
    /// failure the caller routes to the fault handler; expected action-level
    /// failures are conveyed as `ERROR` outcomes and return `Ok`.
    pub async fn dispatch(&self, request: &TaskRequest) -> Result<()> {
        let resolved = self
            .registry
            .resolve(request)
            .with_context(|| format!("resolving action for task {}", request.id))?;

        info!(
            task_id = %request.id,
            action = %request.action_name(),
            "starting task action",
        );
        metrics::counter!("belay_tasks_dispatched_total").increment(1);

        match resolved.kind {
            ActionKind::Synchronous => self.dispatch_sync(request, resolved).await,
            ActionKind::Asynchronous => self.dispatch_async(request, resolved).await,
        }
    }

    async fn dispatch_sync(&self, request: &TaskRequest, resolved: ResolvedAction) -> Result<()> {
        match self.run_with_deadline(resolved).await {
            Ok(result) => {
                self.conveyor
                    .convey(request, TaskOutcome::Success, Some(result))
                    .await
            }
            Err(err) => {
                warn!(task_id = %request.id, %err, "action failed");
                self.conveyor.convey(request, TaskOutcome::Error, None).await
            }
        }
    }

    async fn dispatch_async(&self, request: &TaskRequest, resolved: ResolvedAction) -> Result<()> {
        match resolved.action.run().await {
            Ok(_) => {
                // The work is in flight; completion arrives out of band.
                self.store
                    .update_task_execution(
                        &request.workbook_name,
                        &request.execution_id,
                        &request.id,
                        TaskExecutionPatch {
                            state: Some(ExecutionState::Running),
                            result: None,
                        },
                    )
                    .await
                    .context("persisting RUNNING after asynchronous start")?;
                Ok(())
            }
            Err(err) => {
                warn!(task_id = %request.id, %err, "asynchronous action failed to start");
                self.conveyor.convey(request, TaskOutcome::Error, None).await
            }
        }
    }

    async fn run_with_deadline(&self, resolved: ResolvedAction) -> Result<Value, ActionError> {
        match self.sync_action_timeout {
            Some(deadline) => match timeout(deadline, resolved.action.run()).await {
                Ok(result) => result,
                Err(_) => Err(ActionError::new(format!(
                    "action exceeded deadline of {}ms",
                    deadline.as_millis()
                ))),
            },
            None => resolved.action.run().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionRegistry};
    use crate::conveyor::WorkflowCoordinator;
    use crate::messages::{TaskDsl, TaskRequest};
    use crate::store::MemoryStateStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCoordinator {
        calls: Mutex<Vec<(String, TaskOutcome, Option<Value>)>>,
    }

    #[async_trait]
    impl WorkflowCoordinator for RecordingCoordinator {
        async fn report_result(
            &self,
            _workbook_name: &str,
            _execution_id: &str,
            task_id: &str,
            outcome: TaskOutcome,
            result: Option<Value>,
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((task_id.to_string(), outcome, result));
            Ok(())
        }
    }

    struct SleepyAction;

    #[async_trait]
    impl Action for SleepyAction {
        async fn run(&self) -> Result<Value, ActionError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!("too late"))
        }
    }

    fn request_for(action: &str) -> TaskRequest {
        let mut params = serde_json::Map::new();
        params.insert("output".to_string(), json!(1));
        TaskRequest {
            workbook_name: "wb".to_string(),
            execution_id: "exec-1".to_string(),
            id: "task1".to_string(),
            task_dsl: TaskDsl {
                action: action.to_string(),
                params,
            },
            service_dsl: Value::Null,
        }
    }

    fn harness(
        registry: ActionRegistry,
    ) -> (TaskDispatcher, MemoryStateStore, Arc<RecordingCoordinator>) {
        let store = MemoryStateStore::new();
        store.insert_workflow_execution("wb", "exec-1", ExecutionState::Running);
        store.insert_task_execution("wb", "exec-1", "task1", ExecutionState::Idle);

        let coordinator = Arc::new(RecordingCoordinator::default());
        let dispatcher = TaskDispatcher::new(
            Arc::new(registry),
            Arc::new(store.clone()),
            ResultConveyor::new(coordinator.clone()),
        );
        (dispatcher, store, coordinator)
    }

    #[tokio::test]
    async fn sync_success_conveys_without_persisting() {
        let (dispatcher, store, coordinator) = harness(ActionRegistry::with_std_actions());

        dispatcher.dispatch(&request_for("std.echo")).await.unwrap();

        let calls = coordinator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("task1".to_string(), TaskOutcome::Success, Some(json!(1))));
        drop(calls);

        // No intermediate RUNNING; state commitment is the coordinator's.
        let task = store
            .task_execution("wb", "exec-1", "task1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.state, ExecutionState::Idle);
    }

    #[tokio::test]
    async fn async_start_persists_running() {
        let mut registry = ActionRegistry::new();
        registry.register("svc.launch", ActionKind::Asynchronous, |_| {
            Ok(Box::new(crate::actions::EchoAction { output: json!(null) }) as Box<dyn Action>)
        });
        let (dispatcher, store, coordinator) = harness(registry);

        dispatcher.dispatch(&request_for("svc.launch")).await.unwrap();

        assert!(coordinator.calls.lock().unwrap().is_empty());
        let task = store
            .task_execution("wb", "exec-1", "task1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.state, ExecutionState::Running);
    }

    #[tokio::test]
    async fn async_start_failure_conveys_error() {
        struct FailingStart;

        #[async_trait]
        impl Action for FailingStart {
            async fn run(&self) -> Result<Value, ActionError> {
                Err(ActionError::new("connection refused"))
            }
        }

        let mut registry = ActionRegistry::new();
        registry.register("svc.launch", ActionKind::Asynchronous, |_| {
            Ok(Box::new(FailingStart) as Box<dyn Action>)
        });
        let (dispatcher, store, coordinator) = harness(registry);

        dispatcher.dispatch(&request_for("svc.launch")).await.unwrap();

        let calls = coordinator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("task1".to_string(), TaskOutcome::Error, None));
        drop(calls);

        let task = store
            .task_execution("wb", "exec-1", "task1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.state, ExecutionState::Idle);
    }

    #[tokio::test]
    async fn unknown_action_is_an_unexpected_failure() {
        let (dispatcher, _store, coordinator) = harness(ActionRegistry::new());

        assert!(dispatcher.dispatch(&request_for("std.echo")).await.is_err());
        assert!(coordinator.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_is_an_action_level_failure() {
        let mut registry = ActionRegistry::new();
        registry.register("std.block", ActionKind::Synchronous, |_| {
            Ok(Box::new(SleepyAction) as Box<dyn Action>)
        });
        let (dispatcher, _store, coordinator) = harness(registry);
        let dispatcher = dispatcher.with_sync_action_timeout(Some(Duration::from_millis(50)));

        dispatcher.dispatch(&request_for("std.block")).await.unwrap();

        let calls = coordinator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], ("task1".to_string(), TaskOutcome::Error, None));
    }
}
