//! Per-actor behavior queue.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Unbounded multi-producer FIFO of pending work for one actor.
///
/// `pending` counts behaviors that are queued *or* currently executing, so a
/// value of zero means the actor has nothing left to do. Producers push from
/// any thread; only the worker that owns the actor's running turn pops.
pub struct Mailbox<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    pending: AtomicUsize,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            pending: AtomicUsize::new(0),
        }
    }

    /// Append a behavior. Returns the pending count including it.
    pub fn push(&self, item: T) -> usize {
        let pending = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if self.tx.send(item).is_err() {
            // Receiver lives in `self`; unreachable in practice.
            return self.pending.fetch_sub(1, Ordering::AcqRel) - 1;
        }
        pending
    }

    /// Next queued behavior. The pending count is released by [`mark_done`]
    /// once the behavior has run.
    ///
    /// [`mark_done`]: Mailbox::mark_done
    pub fn pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn mark_done(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// Queued plus executing behaviors. Racy; use as a hint only.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether a behavior is waiting in the queue.
    pub fn has_queued(&self) -> bool {
        !self.rx.is_empty()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
