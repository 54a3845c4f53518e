// src/scheduler/mod.rs
// =============================================================================
// Matches pending tasks with idle workers.
//
// Two strategies, picked when the engine is built:
// - rendezvous: a dispatcher pairs the oldest task with the oldest ready
//   worker (FIFO on both sides), each worker has its own inbox
// - simple: one shared channel, whichever worker is free grabs the next task
//
// Both expose the same four operations:
//   run()           start the internal machinery
//   submit(task)    queue a task (never blocks, never drops)
//   worker()        get an inbox a worker can wait on
//   worker_ready()  tell the scheduler a worker is idle
// =============================================================================

mod rendezvous;
mod simple;

pub use rendezvous::RendezvousScheduler;
pub use simple::SimpleScheduler;

use crate::model::Task;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Which scheduling strategy to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    #[default]
    Rendezvous,
    Simple,
}

/// A handle onto a scheduler. Clones share the same queues.
#[derive(Debug, Clone)]
pub enum Scheduler {
    Rendezvous(RendezvousScheduler),
    Simple(SimpleScheduler),
}

impl Scheduler {
    pub fn new(kind: SchedulerKind) -> Self {
        match kind {
            SchedulerKind::Rendezvous => Scheduler::Rendezvous(RendezvousScheduler::new()),
            SchedulerKind::Simple => Scheduler::Simple(SimpleScheduler::new()),
        }
    }

    pub fn kind(&self) -> SchedulerKind {
        match self {
            Scheduler::Rendezvous(_) => SchedulerKind::Rendezvous,
            Scheduler::Simple(_) => SchedulerKind::Simple,
        }
    }

    /// Starts dispatching. Must be called from inside a tokio runtime.
    /// Calling it again is harmless.
    pub fn run(&self, shutdown: CancellationToken) {
        match self {
            Scheduler::Rendezvous(s) => s.run(shutdown),
            Scheduler::Simple(s) => s.run(shutdown),
        }
    }

    pub fn submit(&self, task: Task) {
        match self {
            Scheduler::Rendezvous(s) => s.submit(task),
            Scheduler::Simple(s) => s.submit(task),
        }
    }

    pub fn worker(&self) -> WorkerSlot {
        match self {
            Scheduler::Rendezvous(s) => s.worker(),
            Scheduler::Simple(s) => s.worker(),
        }
    }

    pub fn worker_ready(&self, slot: &WorkerSlot) {
        match self {
            Scheduler::Rendezvous(s) => s.worker_ready(slot),
            Scheduler::Simple(s) => s.worker_ready(slot),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new(SchedulerKind::default())
    }
}

/// Where a worker waits for its next task.
#[derive(Debug)]
pub struct WorkerSlot {
    inner: SlotInner,
}

#[derive(Debug)]
enum SlotInner {
    // Own inbox; the sender half is what gets announced as "ready"
    Dedicated {
        tx: mpsc::Sender<Task>,
        rx: mpsc::Receiver<Task>,
    },
    // Everyone reads from the same queue
    Shared(Arc<Mutex<mpsc::UnboundedReceiver<Task>>>),
}

impl WorkerSlot {
    pub(crate) fn dedicated() -> Self {
        // One slot is enough: a worker only announces itself when its inbox
        // is empty, so at most one task is ever waiting in it.
        let (tx, rx) = mpsc::channel(1);
        WorkerSlot {
            inner: SlotInner::Dedicated { tx, rx },
        }
    }

    pub(crate) fn shared(rx: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>) -> Self {
        WorkerSlot {
            inner: SlotInner::Shared(rx),
        }
    }

    /// Sender half of a dedicated inbox, `None` for shared slots.
    pub(crate) fn handle(&self) -> Option<mpsc::Sender<Task>> {
        match &self.inner {
            SlotInner::Dedicated { tx, .. } => Some(tx.clone()),
            SlotInner::Shared(_) => None,
        }
    }

    /// Waits for the next task. `None` means the scheduler is gone.
    pub async fn recv(&mut self) -> Option<Task> {
        match &mut self.inner {
            SlotInner::Dedicated { rx, .. } => rx.recv().await,
            SlotInner::Shared(rx) => rx.lock().await.recv().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::nil_parser;

    #[tokio::test]
    async fn test_both_kinds_deliver_a_task() {
        for kind in [SchedulerKind::Rendezvous, SchedulerKind::Simple] {
            let scheduler = Scheduler::new(kind);
            assert_eq!(scheduler.kind(), kind);

            let shutdown = CancellationToken::new();
            scheduler.run(shutdown.clone());

            let mut slot = scheduler.worker();
            scheduler.worker_ready(&slot);
            scheduler.submit(Task::new("https://example.com/a", nil_parser));

            let task = slot.recv().await.unwrap();
            assert_eq!(task.url(), "https://example.com/a");
            shutdown.cancel();
        }
    }

    #[test]
    fn test_kind_deserializes_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: SchedulerKind,
        }
        let w: Wrapper = toml::from_str(r#"kind = "simple""#).unwrap();
        assert_eq!(w.kind, SchedulerKind::Simple);
    }
}
