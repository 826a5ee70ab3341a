//! Countdown latch for coordinating a batch of outstanding work.

use crate::actor::{Actor, ActorRef};
use crate::behavior::Context;
use crate::error::{fatal, Result, RuntimeError};
use crate::scheduler;

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;

type Observer = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct GroupState {
    count: usize,
    observers: Vec<Observer>,
}

/// Tracks outstanding work items; observers fire once the count drops to
/// zero.
///
/// ```rust,no_run
/// use actor_runtime::{Actor, ActorRef, Group};
/// use std::sync::Arc;
///
/// struct Loader;
/// impl Actor for Loader {}
///
/// let group = Arc::new(Group::new());
/// let loader = ActorRef::new(Loader);
/// for _ in 0..4 {
///     group.enter();
///     let group = Arc::clone(&group);
///     loader.send(move |_, _| group.leave());
/// }
/// group.wait();
/// ```
#[derive(Default)]
pub struct Group {
    state: Mutex<GroupState>,
    drained: Condvar,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) {
        self.state.lock().count += 1;
    }

    /// Mark one item done. Extra calls at zero are ignored.
    pub fn leave(&self) {
        let observers = {
            let mut state = self.state.lock();
            state.count = state.count.saturating_sub(1);
            if state.count > 0 {
                return;
            }
            self.drained.notify_all();
            std::mem::take(&mut state.observers)
        };

        if !observers.is_empty() {
            trace!(observers = observers.len(), "Group drained, notifying observers");
        }
        for observer in observers {
            observer();
        }
    }

    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// Block until the count reaches zero. Not callable from a worker.
    #[track_caller]
    pub fn wait(&self) {
        if let Some(worker) = scheduler::current_worker() {
            fatal(RuntimeError::contract(format!(
                "Group::wait() called from worker {}",
                worker.index
            )));
        }

        let mut state = self.state.lock();
        while state.count > 0 {
            self.drained.wait(&mut state);
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        if let Some(worker) = scheduler::current_worker() {
            return Err(RuntimeError::contract(format!(
                "Group::wait_timeout() called from worker {}",
                worker.index
            )));
        }

        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.count > 0 {
            if self.drained.wait_until(&mut state, deadline).timed_out() && state.count > 0 {
                return Err(RuntimeError::timeout(
                    "Group::wait",
                    timeout.as_millis() as u64,
                ));
            }
        }
        Ok(())
    }

    /// Send `behavior` to `actor` once the count is zero; immediately if it
    /// already is.
    pub fn notify<A, F>(&self, actor: &ActorRef<A>, behavior: F)
    where
        A: Actor,
        F: FnOnce(&mut A, &mut Context<'_, A>) + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.count == 0 {
            drop(state);
            actor.send(behavior);
            return;
        }

        let actor = actor.clone();
        state.observers.push(Box::new(move || {
            actor.send(behavior);
        }));
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Group")
            .field("count", &state.count)
            .field("observers", &state.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_count_saturates() {
        let group = Group::new();
        group.enter();
        group.enter();
        assert_eq!(group.count(), 2);
        group.leave();
        group.leave();
        group.leave();
        assert_eq!(group.count(), 0);
        group.wait();
    }

    #[test]
    fn test_wait_released_by_other_thread() {
        let group = Arc::new(Group::new());
        for _ in 0..3 {
            group.enter();
        }
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let group = Arc::clone(&group);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5));
                    group.leave();
                })
            })
            .collect();

        group.wait_timeout(Duration::from_secs(5)).unwrap();
        for worker in workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_wait_timeout_expires() {
        let group = Group::new();
        group.enter();
        let err = group.wait_timeout(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.category(), "timeout");
    }
}
