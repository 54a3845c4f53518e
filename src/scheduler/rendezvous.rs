// src/scheduler/rendezvous.rs
// =============================================================================
// The rendezvous dispatcher.
//
// One background task owns two FIFO queues:
//   tasks    - submitted, not yet handed out
//   workers  - inboxes of idle workers
//
// Every loop iteration waits for whichever comes first:
//   1. a new task arrives          -> push onto tasks
//   2. a worker announces itself   -> push onto workers
//   3. the head worker can accept  -> pop both heads, hand the task over
//
// Only the dispatcher touches the queues, so they need no lock. The oldest
// task always goes to the oldest idle worker.
// =============================================================================

use super::WorkerSlot;
use crate::model::Task;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct RendezvousScheduler {
    task_tx: mpsc::UnboundedSender<Task>,
    ready_tx: mpsc::UnboundedSender<mpsc::Sender<Task>>,
    // Receivers wait here until run() moves them into the dispatcher
    inbox: Arc<Mutex<Option<Inbox>>>,
}

#[derive(Debug)]
struct Inbox {
    task_rx: mpsc::UnboundedReceiver<Task>,
    ready_rx: mpsc::UnboundedReceiver<mpsc::Sender<Task>>,
}

impl RendezvousScheduler {
    pub fn new() -> Self {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        RendezvousScheduler {
            task_tx,
            ready_tx,
            inbox: Arc::new(Mutex::new(Some(Inbox { task_rx, ready_rx }))),
        }
    }

    pub fn run(&self, shutdown: CancellationToken) {
        let inbox = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match inbox {
            Some(inbox) => {
                tokio::spawn(dispatch(inbox, shutdown));
            }
            None => debug!("rendezvous scheduler already running"),
        }
    }

    pub fn submit(&self, task: Task) {
        // Fails only after the dispatcher has shut down, when nobody is
        // left to run the task anyway.
        if let Err(e) = self.task_tx.send(task) {
            debug!(url = %e.0.url(), "scheduler stopped; task not queued");
        }
    }

    pub fn worker(&self) -> WorkerSlot {
        WorkerSlot::dedicated()
    }

    pub fn worker_ready(&self, slot: &WorkerSlot) {
        if let Some(handle) = slot.handle() {
            // Same as submit: only fails once the dispatcher is gone
            let _ = self.ready_tx.send(handle);
        }
    }
}

impl Default for RendezvousScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch(mut inbox: Inbox, shutdown: CancellationToken) {
    let mut tasks: VecDeque<Task> = VecDeque::new();
    let mut workers: VecDeque<mpsc::Sender<Task>> = VecDeque::new();

    loop {
        let can_dispatch = !tasks.is_empty() && !workers.is_empty();
        // Clone so the reserve future doesn't borrow the queue we push to
        let head_worker = workers.front().cloned();

        tokio::select! {
            _ = shutdown.cancelled() => break,

            Some(task) = inbox.task_rx.recv() => {
                trace!(url = %task.url(), pending = tasks.len() + 1, "task queued");
                tasks.push_back(task);
            }

            Some(worker) = inbox.ready_rx.recv() => {
                workers.push_back(worker);
            }

            permit = async move {
                match head_worker {
                    Some(w) => w.reserve_owned().await,
                    None => std::future::pending().await,
                }
            }, if can_dispatch => {
                workers.pop_front();
                match permit {
                    Ok(permit) => {
                        if let Some(task) = tasks.pop_front() {
                            trace!(url = %task.url(), "task dispatched");
                            permit.send(task);
                        }
                    }
                    // The worker went away; keep the task for the next one
                    Err(_) => debug!("dropping closed worker handle"),
                }
            }
        }
    }

    debug!(
        pending = tasks.len(),
        idle_workers = workers.len(),
        "rendezvous dispatcher stopped"
    );
}

// -----------------------------------------------------------------------------
// NOTES:
//
// 1. Why an actor instead of a Mutex<VecDeque>?
//    - Every queue change goes through one task, so there is nothing to lock
//    - FIFO pairing falls out naturally: both queues only ever pop the head
//
// 2. What does reserve_owned() do here?
//    - It waits until the worker's inbox has room, then gives us a permit
//    - Sending through the permit can't fail or block, so a task is never
//      lost between "popped from the queue" and "in the inbox"
//
// 3. Why `if can_dispatch`?
//    - tokio::select! skips a branch whose precondition is false, the same
//      way a nil channel never fires in a select
// -----------------------------------------------------------------------------
