// src/scheduler/simple.rs
// =============================================================================
// The simple scheduler: one shared queue, no matching.
//
// Every worker reads from the same channel, so worker() always hands out the
// same logical inbox and worker_ready() has nothing to do. The channel is
// unbounded, which keeps submit() from ever blocking the results loop.
// =============================================================================

use super::WorkerSlot;
use crate::model::Task;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SimpleScheduler {
    tx: mpsc::UnboundedSender<Task>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
}

impl SimpleScheduler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        SimpleScheduler {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    // Nothing to start; workers stop on their own shutdown signal.
    pub fn run(&self, _shutdown: CancellationToken) {}

    pub fn submit(&self, task: Task) {
        if let Err(e) = self.tx.send(task) {
            debug!(url = %e.0.url(), "scheduler stopped; task not queued");
        }
    }

    pub fn worker(&self) -> WorkerSlot {
        WorkerSlot::shared(Arc::clone(&self.rx))
    }

    pub fn worker_ready(&self, _slot: &WorkerSlot) {}
}

impl Default for SimpleScheduler {
    fn default() -> Self {
        Self::new()
    }
}
