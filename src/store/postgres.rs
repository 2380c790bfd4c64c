//! Postgres-backed state store.
//!
//! State is kept in two tables keyed the way the wire identifies records:
//! (workbook_name, execution_id) for workflows and (workbook_name,
//! execution_id, task_id) for tasks. Payloads are JSONB for flexibility.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::base::{
    StateStore, StateTransaction, StoreError, StoreResult, TaskExecutionPatch,
    TaskExecutionRecord, WorkflowExecutionPatch, WorkflowExecutionRecord,
};

/// Persist workflow and task execution records in Postgres.
#[derive(Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(dsn: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(dsn).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Initialize the schema.
    pub async fn init_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_executions (
                workbook_name TEXT NOT NULL,
                id TEXT NOT NULL,
                state TEXT NOT NULL,
                output JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (workbook_name, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_executions (
                workbook_name TEXT NOT NULL,
                execution_id TEXT NOT NULL,
                id TEXT NOT NULL,
                state TEXT NOT NULL,
                result JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (workbook_name, execution_id, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_task_executions_execution
                ON task_executions(workbook_name, execution_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn workflow_from_row(row: &PgRow) -> StoreResult<WorkflowExecutionRecord> {
    let state: String = row.try_get("state")?;
    Ok(WorkflowExecutionRecord {
        id: row.try_get("id")?,
        workbook_name: row.try_get("workbook_name")?,
        state: state
            .parse()
            .map_err(|err: crate::states::UnknownState| StoreError::Message(err.to_string()))?,
        output: row.try_get("output")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn task_from_row(row: &PgRow) -> StoreResult<TaskExecutionRecord> {
    let state: String = row.try_get("state")?;
    Ok(TaskExecutionRecord {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        workbook_name: row.try_get("workbook_name")?,
        state: state
            .parse()
            .map_err(|err: crate::states::UnknownState| StoreError::Message(err.to_string()))?,
        result: row.try_get("result")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn update_workflow<'e, E>(
    executor: E,
    workbook_name: &str,
    execution_id: &str,
    patch: WorkflowExecutionPatch,
) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE workflow_executions
        SET state = COALESCE($3, state),
            output = COALESCE($4, output),
            updated_at = NOW()
        WHERE workbook_name = $1 AND id = $2
        "#,
    )
    .bind(workbook_name)
    .bind(execution_id)
    .bind(patch.state.map(|state| state.as_str()))
    .bind(patch.output)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!(
            "workflow execution {workbook_name}/{execution_id}"
        )));
    }
    Ok(())
}

async fn update_task<'e, E>(
    executor: E,
    workbook_name: &str,
    execution_id: &str,
    task_id: &str,
    patch: TaskExecutionPatch,
) -> StoreResult<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE task_executions
        SET state = COALESCE($4, state),
            result = COALESCE($5, result),
            updated_at = NOW()
        WHERE workbook_name = $1 AND execution_id = $2 AND id = $3
        "#,
    )
    .bind(workbook_name)
    .bind(execution_id)
    .bind(task_id)
    .bind(patch.state.map(|state| state.as_str()))
    .bind(patch.result)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!(
            "task execution {workbook_name}/{execution_id}/{task_id}"
        )));
    }
    Ok(())
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn workflow_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
    ) -> StoreResult<Option<WorkflowExecutionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT workbook_name, id, state, output, created_at, updated_at
            FROM workflow_executions
            WHERE workbook_name = $1 AND id = $2
            "#,
        )
        .bind(workbook_name)
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn task_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
        task_id: &str,
    ) -> StoreResult<Option<TaskExecutionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT workbook_name, execution_id, id, state, result, created_at, updated_at
            FROM task_executions
            WHERE workbook_name = $1 AND execution_id = $2 AND id = $3
            "#,
        )
        .bind(workbook_name)
        .bind(execution_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn update_workflow_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
        patch: WorkflowExecutionPatch,
    ) -> StoreResult<()> {
        update_workflow(&self.pool, workbook_name, execution_id, patch).await
    }

    async fn update_task_execution(
        &self,
        workbook_name: &str,
        execution_id: &str,
        task_id: &str,
        patch: TaskExecutionPatch,
    ) -> StoreResult<()> {
        update_task(&self.pool, workbook_name, execution_id, task_id, patch).await
    }

    async fn begin_transaction(&self) -> StoreResult<Box<dyn StateTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }
}

/// Wraps a live database transaction; updates run against it immediately and
/// become visible on commit.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StateTransaction for PostgresTransaction {
    async fn update_workflow_execution(
        &mut self,
        workbook_name: &str,
        execution_id: &str,
        patch: WorkflowExecutionPatch,
    ) -> StoreResult<()> {
        update_workflow(&mut *self.tx, workbook_name, execution_id, patch).await
    }

    async fn update_task_execution(
        &mut self,
        workbook_name: &str,
        execution_id: &str,
        task_id: &str,
        patch: TaskExecutionPatch,
    ) -> StoreResult<()> {
        update_task(&mut *self.tx, workbook_name, execution_id, task_id, patch).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
