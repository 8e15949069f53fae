//! Bounded passage queue between the edge context and the control loop
//!
//! Single producer (edge handlers), single consumer (controller). The
//! producer never waits: on a full queue the new record is dropped and the
//! overflow is counted.

use crate::domain::types::PassageRecord;
use crate::infra::metrics::Metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PushError {
    #[error("passage queue full, record {0:?} dropped")]
    Full(PassageRecord),
    #[error("passage queue closed")]
    Closed(PassageRecord),
}

/// Producer half, owned by the edge detector
pub struct PassageProducer {
    tx: mpsc::Sender<PassageRecord>,
    overflows: Arc<AtomicU64>,
    metrics: Arc<Metrics>,
}

/// Consumer half, owned by the control loop
pub struct PassageConsumer {
    rx: mpsc::Receiver<PassageRecord>,
    metrics: Arc<Metrics>,
}

/// Create a passage queue holding at most `capacity` records
pub fn passage_queue(capacity: usize, metrics: Arc<Metrics>) -> (PassageProducer, PassageConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        PassageProducer { tx, overflows: Arc::new(AtomicU64::new(0)), metrics: metrics.clone() },
        PassageConsumer { rx, metrics },
    )
}

impl PassageProducer {
    /// Push without waiting; drops the record when the queue is full
    pub fn push(&self, record: PassageRecord) -> Result<(), PushError> {
        match self.tx.try_send(record) {
            Ok(()) => {
                self.metrics.set_queue_depth(self.depth() as u64);
                Ok(())
            }
            Err(TrySendError::Full(record)) => {
                self.overflows.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_passage_dropped();
                Err(PushError::Full(record))
            }
            Err(TrySendError::Closed(record)) => Err(PushError::Closed(record)),
        }
    }

    /// Records currently waiting in the queue
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}

impl PassageConsumer {
    /// Non-blocking pop; `None` when no record is available
    pub fn try_pop(&mut self) -> Option<PassageRecord> {
        match self.rx.try_recv() {
            Ok(record) => {
                self.update_depth();
                Some(record)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next record; `None` once the producer is gone and the queue is drained
    pub async fn pop(&mut self) -> Option<PassageRecord> {
        let record = self.rx.recv().await?;
        self.update_depth();
        Some(record)
    }

    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    fn update_depth(&self) {
        self.metrics.set_queue_depth(self.depth() as u64);
    }
}
