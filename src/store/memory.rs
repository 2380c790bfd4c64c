//! In-memory state store for tests and embedded runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::base::{
    StateStore, StateTransaction, StoreError, StoreResult, TaskExecutionPatch,
    TaskExecutionRecord, WorkflowExecutionPatch, WorkflowExecutionRecord,
};
use crate::states::ExecutionState;

#[derive(Default)]
struct Shared {
    /// Keyed by (workbook_name, execution_id).
    workflows: HashMap<(String, String), WorkflowExecutionRecord>,
    /// Keyed by (workbook_name, execution_id, task_id).
    tasks: HashMap<(String, String, String), TaskExecutionRecord>,
}

impl Shared {
    fn apply_workflow(
        &mut self,
        workbook_name: &str,
        execution_id: &str,
        patch: &WorkflowExecutionPatch,
    ) -> StoreResult<()> {
        let key = (workbook_name.to_string(), execution_id.to_string());
        let record = self
            .workflows
            .get_mut(&key)
            .ok_or_else(|| workflow_not_found(workbook_name, execution_id))?;
        if let Some(state) = patch.state {
            record.state = state;
        }
        if let Some(output) = &patch.output {
            record.output = Some(output.clone());
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    fn apply_task(
        &mut self,
        workbook_name: &str,
        execution_id: &str,
        task_id: &str,
        patch: &TaskExecutionPatch,
    ) -> StoreResult<()> {
        let key = (
            workbook_name.to_string(),
            execution_id.to_string(),
            task_id.to_string(),
        );
        let record = self
            .tasks
            .get_mut(&key)
            .ok_or_else(|| task_not_found(workbook_name, execution_id, task_id))?;
        if let Some(state) = patch.state {
            record.state = state;
        }
        if let Some(result) = &patch.result {
            record.result = Some(result.clone());
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    fn contains_workflow(&self, workbook_name: &str, execution_id: &str) -> bool {
        self.workflows
            .contains_key(&(workbook_name.to_string(), execution_id.to_string()))
    }

    fn contains_task(&self, workbook_name: &str, execution_id: &str, task_id: &str) -> bool {
        self.tasks.contains_key(&(
            workbook_name.to_string(),
            execution_id.to_string(),
            task_id.to_string(),
        ))
    }
}

fn workflow_not_found(workbook_name: &str, execution_id: &str) -> StoreError {
    StoreError::NotFound(format!("workflow execution {workbook_name}/{execution_id}"))
}

fn task_not_found(workbook_name: &str, execution_id: &str, task_id: &str) -> StoreError {
    StoreError::NotFound(format!(
        "task execution {workbook_name}/{execution_id}/{task_id}"
    ))
}

/// Keeps all records behind one mutex; transactions buffer their updates and
/// apply them under a single lock acquisition, so a commit is atomic with
/// respect to every reader.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<Shared>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.inner.lock().expect("state store lock poisoned")
    }

    /// Seed a workflow execution row. Record creation is the coordinator's
    /// job; this exists for harnesses and embedded runs standing in for it.
    pub fn insert_workflow_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
        state: ExecutionState,
    ) {
        let now = Utc::now();
        self.lock().workflows.insert(
            (workbook_name.to_string(), execution_id.to_string()),
            WorkflowExecutionRecord {
                id: execution_id.to_string(),
                workbook_name: workbook_name.to_string(),
                state,
                output: None,
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// Seed a task execution row; see [`insert_workflow_execution`].
    ///
    /// [`insert_workflow_execution`]: MemoryStateStore::insert_workflow_execution
    pub fn insert_task_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
        task_id: &str,
        state: ExecutionState,
    ) {
        let now = Utc::now();
        self.lock().tasks.insert(
            (
                workbook_name.to_string(),
                execution_id.to_string(),
                task_id.to_string(),
            ),
            TaskExecutionRecord {
                id: task_id.to_string(),
                execution_id: execution_id.to_string(),
                workbook_name: workbook_name.to_string(),
                state,
                result: None,
                created_at: now,
                updated_at: now,
            },
        );
    }

    /// Remove a workflow execution and its tasks, as the coordinator does
    /// when an execution is deleted.
    pub fn remove_workflow_execution(&self, workbook_name: &str, execution_id: &str) {
        let mut shared = self.lock();
        shared
            .workflows
            .remove(&(workbook_name.to_string(), execution_id.to_string()));
        shared
            .tasks
            .retain(|(wb, exec, _), _| !(wb == workbook_name && exec == execution_id));
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn workflow_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
    ) -> StoreResult<Option<WorkflowExecutionRecord>> {
        Ok(self
            .lock()
            .workflows
            .get(&(workbook_name.to_string(), execution_id.to_string()))
            .cloned())
    }

    async fn task_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
        task_id: &str,
    ) -> StoreResult<Option<TaskExecutionRecord>> {
        Ok(self
            .lock()
            .tasks
            .get(&(
                workbook_name.to_string(),
                execution_id.to_string(),
                task_id.to_string(),
            ))
            .cloned())
    }

    async fn update_workflow_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
        patch: WorkflowExecutionPatch,
    ) -> StoreResult<()> {
        self.lock()
            .apply_workflow(workbook_name, execution_id, &patch)
    }

    async fn update_task_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
        task_id: &str,
        patch: TaskExecutionPatch,
    ) -> StoreResult<()> {
        self.lock()
            .apply_task(workbook_name, execution_id, task_id, &patch)
    }

    async fn begin_transaction(&self) -> StoreResult<Box<dyn StateTransaction>> {
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            buffered: Vec::new(),
        }))
    }
}

enum Buffered {
    Workflow {
        workbook_name: String,
        execution_id: String,
        patch: WorkflowExecutionPatch,
    },
    Task {
        workbook_name: String,
        execution_id: String,
        task_id: String,
        patch: TaskExecutionPatch,
    },
}

/// Buffers updates and applies them under a single lock acquisition at
/// commit time. Validation runs over the whole buffer before the first
/// update is applied, so a commit against a missing record changes nothing.
pub struct MemoryTransaction {
    inner: Arc<Mutex<Shared>>,
    buffered: Vec<Buffered>,
}

#[async_trait]
impl StateTransaction for MemoryTransaction {
    async fn update_workflow_execution(
        &mut self,
        workbook_name: &str,
        execution_id: &str,
        patch: WorkflowExecutionPatch,
    ) -> StoreResult<()> {
        self.buffered.push(Buffered::Workflow {
            workbook_name: workbook_name.to_string(),
            execution_id: execution_id.to_string(),
            patch,
        });
        Ok(())
    }

    async fn update_task_execution(
        &mut self,
        workbook_name: &str,
        execution_id: &str,
        task_id: &str,
        patch: TaskExecutionPatch,
    ) -> StoreResult<()> {
        self.buffered.push(Buffered::Task {
            workbook_name: workbook_name.to_string(),
            execution_id: execution_id.to_string(),
            task_id: task_id.to_string(),
            patch,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut shared = self.inner.lock().expect("state store lock poisoned");

        for update in &self.buffered {
            match update {
                Buffered::Workflow {
                    workbook_name,
                    execution_id,
                    ..
                } => {
                    if !shared.contains_workflow(workbook_name, execution_id) {
                        return Err(workflow_not_found(workbook_name, execution_id));
                    }
                }
                Buffered::Task {
                    workbook_name,
                    execution_id,
                    task_id,
                    ..
                } => {
                    if !shared.contains_task(workbook_name, execution_id, task_id) {
                        return Err(task_not_found(workbook_name, execution_id, task_id));
                    }
                }
            }
        }

        for update in &self.buffered {
            match update {
                Buffered::Workflow {
                    workbook_name,
                    execution_id,
                    patch,
                } => shared.apply_workflow(workbook_name, execution_id, patch)?,
                Buffered::Task {
                    workbook_name,
                    execution_id,
                    task_id,
                    patch,
                } => shared.apply_task(workbook_name, execution_id, task_id, patch)?,
            }
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
