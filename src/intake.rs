//! Message intake loop: the sequential consumer of task-execution requests.
//!
//! Each delivery is processed fully, through acknowledgment and hand-off,
//! before the next is pulled. The queue's delivery guarantee is "at least
//! once, recovered by state validation", so a message is acknowledged as
//! soon as it parses; redelivery is never used for retry. A message whose
//! workflow is not `RUNNING` or whose task is not `IDLE` is stale (duplicate
//! delivery, already processed, or superseded) and is silently discarded.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatcher::TaskDispatcher;
use crate::fault::FaultHandler;
use crate::messages::TaskRequest;
use crate::queue::{Delivery, TaskQueue};
use crate::states::ExecutionState;
use crate::store::StateStore;

pub struct IntakeLoop {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<Result<()>>,
}

impl IntakeLoop {
    pub fn start(
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn StateStore>,
        dispatcher: Arc<TaskDispatcher>,
        fault: FaultHandler,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let task = IntakeTask {
                queue,
                store,
                dispatcher,
                fault,
                shutdown_rx,
            };
            if let Err(err) = task.run().await {
                error!(?err, "intake loop terminated with error");
                Err(err)
            } else {
                Ok(())
            }
        });
        Self {
            shutdown_tx,
            handle,
        }
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown(self) -> Result<()> {
        self.trigger_shutdown();
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(anyhow!("intake loop task panicked: {err}")),
        }
    }
}

struct IntakeTask {
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn StateStore>,
    dispatcher: Arc<TaskDispatcher>,
    fault: FaultHandler,
    shutdown_rx: watch::Receiver<bool>,
}

impl IntakeTask {
    async fn run(mut self) -> Result<()> {
        info!("waiting for task messages");

        loop {
            tokio::select! {
                received = self.queue.receive() => {
                    match received {
                        Ok(Some(delivery)) => self.handle_delivery(delivery).await,
                        Ok(None) => {
                            info!("task queue closed");
                            break;
                        }
                        Err(err) => {
                            error!(?err, "queue receive failed");
                            break;
                        }
                    }
                }
                changed = self.shutdown_rx.changed() => {
                    if changed.is_ok() && *self.shutdown_rx.borrow() {
                        info!("intake loop shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        let request = match TaskRequest::decode(&delivery.payload) {
            Ok(request) => request,
            Err(err) => {
                // A payload that does not parse can never become
                // processable; drop it for good.
                warn!(
                    delivery_tag = delivery.delivery_tag,
                    %err,
                    "dropping malformed task request",
                );
                metrics::counter!("belay_messages_malformed_total").increment(1);
                self.ack(&delivery).await;
                return;
            }
        };

        // Ack before any business logic runs; duplicates are rejected by
        // state validation, not recovered through redelivery.
        self.ack(&delivery).await;

        info!(
            workbook_name = %request.workbook_name,
            execution_id = %request.execution_id,
            task_id = %request.id,
            action = %request.action_name(),
            "received task request",
        );
        metrics::counter!("belay_messages_consumed_total").increment(1);

        if let Err(failure) = self.process(&request).await {
            self.fault.force_error(&request, &failure).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        // A failed ack leaves the message in flight for redelivery, which
        // state validation then rejects as stale.
        if let Err(err) = self.queue.ack(delivery).await {
            warn!(
                delivery_tag = delivery.delivery_tag,
                ?err,
                "failed to acknowledge delivery",
            );
        }
    }

    async fn process(&self, request: &TaskRequest) -> Result<()> {
        let task = self
            .store
            .task_execution(&request.workbook_name, &request.execution_id, &request.id)
            .await?;
        let workflow = self
            .store
            .workflow_execution(&request.workbook_name, &request.execution_id)
            .await?;

        let (Some(workflow), Some(task)) = (workflow, task) else {
            debug!(task_id = %request.id, "workflow or task no longer exists, discarding");
            metrics::counter!("belay_messages_stale_total").increment(1);
            return Ok(());
        };

        if workflow.state != ExecutionState::Running || task.state != ExecutionState::Idle {
            debug!(
                task_id = %request.id,
                workflow_state = %workflow.state,
                task_state = %task.state,
                "stale task request, discarding",
            );
            metrics::counter!("belay_messages_stale_total").increment(1);
            return Ok(());
        }

        self.dispatcher.dispatch(request).await
    }
}
