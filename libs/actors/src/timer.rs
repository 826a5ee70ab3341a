//! Delayed and periodic behaviors.
//!
//! One background thread (`actor-timers`) keeps a deadline heap and sends the
//! registered behavior to its actor when a timer comes due. Timers never run
//! actor code themselves, so an actor's behaviors still execute one at a time
//! on the worker pool.

use crate::actor::{Actor, ActorRef};
use crate::behavior::Context;

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Shortest accepted period for [`Timer::every`].
const MIN_INTERVAL: Duration = Duration::from_millis(1);

enum Fire {
    Once(Box<dyn FnOnce() + Send + 'static>),
    Every {
        interval: Duration,
        deliver: Arc<dyn Fn() + Send + Sync + 'static>,
    },
}

struct Pending {
    due: Instant,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    fire: Fire,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Reverse<Pending>>,
    seq: u64,
}

struct TimerService {
    queue: Mutex<Queue>,
    changed: Condvar,
}

static SERVICE: Lazy<Arc<TimerService>> = Lazy::new(|| {
    let service = Arc::new(TimerService {
        queue: Mutex::new(Queue::default()),
        changed: Condvar::new(),
    });
    let worker = Arc::clone(&service);
    if let Err(e) = thread::Builder::new()
        .name("actor-timers".to_string())
        .spawn(move || worker.run())
    {
        error!(error = %e, "Failed to spawn timer thread, timers will not fire");
    }
    service
});

impl TimerService {
    fn register(&self, delay: Duration, cancelled: Arc<AtomicBool>, fire: Fire) {
        let mut queue = self.queue.lock();
        queue.seq += 1;
        let seq = queue.seq;
        queue.heap.push(Reverse(Pending {
            due: Instant::now() + delay,
            seq,
            cancelled,
            fire,
        }));
        self.changed.notify_one();
    }

    fn run(&self) {
        debug!("Timer thread started");
        let mut queue = self.queue.lock();
        loop {
            let now = Instant::now();
            let next_due = queue.heap.peek().map(|Reverse(pending)| pending.due);
            match next_due {
                None => {
                    self.changed.wait(&mut queue);
                }
                Some(due) if due > now => {
                    self.changed.wait_until(&mut queue, due);
                }
                Some(_) => {
                    let Some(Reverse(pending)) = queue.heap.pop() else {
                        continue;
                    };
                    if pending.cancelled.load(Ordering::Acquire) {
                        continue;
                    }
                    trace!(seq = pending.seq, "Timer fired");
                    match pending.fire {
                        Fire::Once(deliver) => {
                            drop(queue);
                            deliver();
                            queue = self.queue.lock();
                        }
                        Fire::Every { interval, deliver } => {
                            queue.seq += 1;
                            let seq = queue.seq;
                            queue.heap.push(Reverse(Pending {
                                due: now + interval,
                                seq,
                                cancelled: pending.cancelled,
                                fire: Fire::Every {
                                    interval,
                                    deliver: Arc::clone(&deliver),
                                },
                            }));
                            drop(queue);
                            deliver();
                            queue = self.queue.lock();
                        }
                    }
                }
            }
        }
    }
}

/// Cancel every outstanding timer.
pub(crate) fn clear() {
    if let Some(service) = Lazy::get(&SERVICE) {
        let mut queue = service.queue.lock();
        let dropped = queue.heap.len();
        for Reverse(pending) in queue.heap.drain() {
            pending.cancelled.store(true, Ordering::Release);
        }
        if dropped > 0 {
            debug!(dropped, "Cleared pending timers");
        }
    }
}

/// Handle to a registered timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Stop the timer. A behavior already sent to the actor still runs.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Entry point for timers; the target actor is kept alive until the timer
/// fires or is cancelled.
pub struct Timer;

impl Timer {
    /// Send `behavior` to `actor` once, after `delay`.
    pub fn after<A, F>(delay: Duration, actor: &ActorRef<A>, behavior: F) -> TimerHandle
    where
        A: Actor,
        F: FnOnce(&mut A, &mut Context<'_, A>) + Send + 'static,
    {
        let handle = TimerHandle {
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        let actor = actor.clone();
        SERVICE.register(
            delay,
            Arc::clone(&handle.cancelled),
            Fire::Once(Box::new(move || {
                actor.send(behavior);
            })),
        );
        handle
    }

    /// Send `behavior` to `actor` every `interval` until cancelled.
    pub fn every<A, F>(interval: Duration, actor: &ActorRef<A>, behavior: F) -> TimerHandle
    where
        A: Actor,
        F: Fn(&mut A, &mut Context<'_, A>) + Send + Sync + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        let handle = TimerHandle {
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        let actor = actor.clone();
        let behavior = Arc::new(behavior);
        SERVICE.register(
            interval,
            Arc::clone(&handle.cancelled),
            Fire::Every {
                interval,
                deliver: Arc::new(move || {
                    let behavior = Arc::clone(&behavior);
                    actor.send(move |state, ctx| behavior(state, ctx));
                }),
            },
        );
        handle
    }
}
