use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender};

use crate::types::ProcessingTask;

/// Unbounded FIFO handoff between the watcher and the dispatcher.
///
/// The queue owns both channel ends, so enqueueing never blocks and never fails while the
/// queue is alive.
#[derive(Debug)]
pub struct IngestionQueue {
    tx: Sender<ProcessingTask>,
    rx: Receiver<ProcessingTask>,
}

/// Cloneable producer side of an [`IngestionQueue`].
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: Sender<ProcessingTask>,
}

impl IngestionQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// A handle producers (e.g. watcher hooks) can hold independently of the queue.
    pub fn producer(&self) -> QueueProducer {
        QueueProducer {
            tx: self.tx.clone(),
        }
    }

    pub fn enqueue(&self, path: impl Into<PathBuf>) {
        let _ = self.tx.send(ProcessingTask::new(path));
    }

    /// Number of tasks waiting for the dispatcher.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub(crate) fn receiver(&self) -> Receiver<ProcessingTask> {
        self.rx.clone()
    }
}

impl Default for IngestionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueProducer {
    /// Enqueue a task. Returns `false` only if every consumer-side handle has been dropped.
    pub fn enqueue(&self, path: impl Into<PathBuf>) -> bool {
        self.tx.send(ProcessingTask::new(path)).is_ok()
    }
}
