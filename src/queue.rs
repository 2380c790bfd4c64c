//! Consumer seam for the shared task queue.
//!
//! The broker itself is an external collaborator; this module only defines
//! the consumer-side contract the intake loop runs against, plus an
//! in-memory queue used by tests and embedded runs. Delivery is at least
//! once: redelivered messages are made safe by state validation in the
//! intake loop, not by the queue.

use std::sync::{
    Mutex,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::messages::TaskRequest;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection lost: {0}")]
    Connection(String),
    #[error("acknowledgment failed for delivery {0}")]
    Ack(u64),
}

/// One queued payload, identified by its broker delivery tag.
#[derive(Debug)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
}

/// Consumer side of the durable task queue. Implementations are expected to
/// hand out one unacknowledged delivery at a time per consumer (prefetch 1).
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Next delivery; resolves to `None` once the queue is closed and drained.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    /// Permanently remove a delivery from the queue.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;
}

/// In-memory task queue backed by an unbounded channel.
pub struct MemoryTaskQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    next_tag: AtomicU64,
    acked: AtomicUsize,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            next_tag: AtomicU64::new(1),
            acked: AtomicUsize::new(0),
        }
    }

    /// Publish a raw payload. Publishing to a closed queue drops the payload.
    pub fn publish(&self, payload: Vec<u8>) {
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let delivery = Delivery {
            delivery_tag: tag,
            payload,
        };
        if let Some(tx) = self.tx.lock().expect("queue sender lock poisoned").as_ref() {
            let _ = tx.send(delivery);
        }
    }

    pub fn publish_request(&self, request: &TaskRequest) {
        self.publish(request.encode());
    }

    /// Close the producer side; `receive` returns `None` once drained.
    pub fn close(&self) {
        self.tx.lock().expect("queue sender lock poisoned").take();
    }

    pub fn acked_count(&self) -> usize {
        self.acked.load(Ordering::Relaxed)
    }
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), QueueError> {
        self.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
