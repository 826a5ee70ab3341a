//! Actors and actor handles.
//!
//! An actor is a value of a user type `A: Actor` living inside an
//! [`ActorCell`] together with its mailbox and scheduling attributes. Outside
//! code only ever holds [`ActorRef`]s; the state itself is reachable solely
//! from behaviors, which the scheduler runs one at a time per actor.
//!
//! ## Scheduling states
//!
//! ```text
//!   send ──► Idle ──CAS──► Scheduled ──worker──► Running ──┬──► Scheduled (work left)
//!             ▲                                            │
//!             └────────────── recheck mailbox ◄────────────┴──► Idle
//! ```

use crate::affinity::CoreAffinity;
use crate::behavior::{Behavior, Context};
use crate::chain::{ChainArgs, ChainOutcome, ChainState};
use crate::error::{fatal, Result, RuntimeError};
use crate::mailbox::Mailbox;
use crate::metrics::METRICS;
use crate::scheduler::{self, BatchOutcome, Schedulable};

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;

/// Back-off bounds for [`ActorRef::wait`], in microseconds.
const WAIT_SLEEP_MIN_US: u64 = 10;
const WAIT_SLEEP_MAX_US: u64 = 500;

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique actor identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u64);

impl ActorId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

/// State owned by an actor.
///
/// Any `Send` type can be an actor; override [`process_chain`] to take part
/// in pipelines.
///
/// [`process_chain`]: Actor::process_chain
pub trait Actor: Send + Sized + 'static {
    /// Handle a chained message. An empty `args` is end-of-stream.
    fn process_chain(&mut self, args: ChainArgs, _ctx: &mut Context<'_, Self>) -> ChainOutcome {
        ChainOutcome::Forward(args)
    }
}

struct Slot<A> {
    actor: A,
    chain: ChainState,
}

pub(crate) struct ActorCell<A: Actor> {
    id: ActorId,
    mailbox: Mailbox<Behavior<A>>,
    /// Only locked by the worker running this actor's turn.
    slot: Mutex<Slot<A>>,
    state: AtomicU8,
    priority: AtomicI32,
    affinity: AtomicU8,
    batch_size: AtomicUsize,
    yield_requested: AtomicBool,
    suspended: AtomicBool,
    upstream_links: AtomicUsize,
    created_at: Instant,
}

impl<A: Actor> ActorCell<A> {
    fn schedule_if_idle(self: &Arc<Self>) {
        if self.suspended.load(Ordering::SeqCst) {
            return;
        }
        if self
            .state
            .compare_exchange(IDLE, SCHEDULED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            scheduler::schedule(Arc::clone(self) as Arc<dyn Schedulable>);
        }
    }

    fn has_runnable_work(&self) -> bool {
        self.mailbox.has_queued() && !self.suspended.load(Ordering::SeqCst)
    }

    /// Leave RUNNING for IDLE, taking the actor back if a send or a resume
    /// raced with the transition.
    fn settle_idle(&self) -> BatchOutcome {
        self.state.store(IDLE, Ordering::SeqCst);
        if self.has_runnable_work()
            && self
                .state
                .compare_exchange(IDLE, SCHEDULED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return BatchOutcome::Reschedule;
        }
        BatchOutcome::Idle
    }
}

impl<A: Actor> Schedulable for ActorCell<A> {
    fn actor_id(&self) -> ActorId {
        self.id
    }

    fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    fn core_affinity(&self) -> CoreAffinity {
        CoreAffinity::from_u8(self.affinity.load(Ordering::Relaxed))
    }

    fn run_batch(self: Arc<Self>) -> BatchOutcome {
        if self
            .state
            .compare_exchange(SCHEDULED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return BatchOutcome::Idle;
        }

        if self.suspended.load(Ordering::SeqCst) {
            trace!(actor_id = %self.id, "Skipping suspended actor");
            return self.settle_idle();
        }

        let myself = ActorRef {
            cell: Arc::clone(&self),
        };
        let limit = self.batch_size.load(Ordering::Relaxed).max(1);
        let started = Instant::now();
        let mut processed = 0u64;

        {
            let mut slot = self.slot.lock();
            let Slot { actor, chain } = &mut *slot;

            while processed < limit as u64 {
                let Some(behavior) = self.mailbox.pop() else {
                    break;
                };
                let mut ctx = Context::new(&myself, chain);
                behavior(actor, &mut ctx);
                self.mailbox.mark_done();
                processed += 1;

                if self.yield_requested.swap(false, Ordering::AcqRel) {
                    METRICS.yields.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                if self.suspended.load(Ordering::SeqCst) {
                    break;
                }
            }
        }

        METRICS.record_batch(processed, started.elapsed());

        if self.has_runnable_work() {
            self.state.store(SCHEDULED, Ordering::SeqCst);
            return BatchOutcome::Reschedule;
        }
        self.settle_idle()
    }
}

impl<A: Actor> Drop for ActorCell<A> {
    fn drop(&mut self) {
        METRICS.actors_destroyed.fetch_add(1, Ordering::Relaxed);
        debug!(
            actor_id = %self.id,
            uptime_ms = self.created_at.elapsed().as_millis() as u64,
            "Actor destroyed"
        );
    }
}

/// Handle to a live actor. Cloning is cheap; the actor is destroyed once the
/// last handle is gone and the scheduler no longer holds it.
pub struct ActorRef<A: Actor> {
    cell: Arc<ActorCell<A>>,
}

impl<A: Actor> ActorRef<A> {
    /// Create an actor with default scheduling attributes, starting the
    /// runtime if necessary.
    pub fn new(actor: A) -> Self {
        ActorBuilder::new(actor).spawn()
    }

    pub fn id(&self) -> ActorId {
        self.cell.id
    }

    /// Queue a behavior. Safe from any thread, including from inside other
    /// behaviors.
    pub fn send<F>(&self, behavior: F) -> &Self
    where
        F: FnOnce(&mut A, &mut Context<'_, A>) + Send + 'static,
    {
        self.cell.mailbox.push(Box::new(behavior));
        METRICS.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.cell.schedule_if_idle();
        self
    }

    /// Queued plus executing behaviors. A racy hint.
    pub fn pending_count(&self) -> usize {
        self.cell.mailbox.pending()
    }

    pub fn uptime(&self) -> Duration {
        self.cell.created_at.elapsed()
    }

    /// Block the calling thread until at most `min_pending` behaviors remain.
    ///
    /// Must not be called from a worker thread: the worker could be the one
    /// that has to drain the mailbox.
    #[track_caller]
    pub fn wait(&self, min_pending: usize) {
        if let Some(worker) = scheduler::current_worker() {
            fatal(RuntimeError::contract(format!(
                "wait() on {} called from worker {}",
                self.id(),
                worker.index
            )));
        }

        let mut sleep_us = WAIT_SLEEP_MIN_US;
        while self.pending_count() > min_pending {
            thread::sleep(Duration::from_micros(sleep_us));
            sleep_us = (sleep_us + 1).min(WAIT_SLEEP_MAX_US);
        }
    }

    /// [`wait`](ActorRef::wait) with an upper bound.
    pub fn wait_timeout(&self, min_pending: usize, timeout: Duration) -> Result<()> {
        if let Some(worker) = scheduler::current_worker() {
            return Err(RuntimeError::contract(format!(
                "wait_timeout() on {} called from worker {}",
                self.id(),
                worker.index
            )));
        }

        let deadline = Instant::now() + timeout;
        let mut sleep_us = WAIT_SLEEP_MIN_US;
        while self.pending_count() > min_pending {
            if Instant::now() >= deadline {
                return Err(RuntimeError::timeout(
                    format!("wait on {}", self.id()),
                    timeout.as_millis() as u64,
                ));
            }
            thread::sleep(Duration::from_micros(sleep_us));
            sleep_us = (sleep_us + 1).min(WAIT_SLEEP_MAX_US);
        }
        Ok(())
    }

    /// End the actor's current turn after the running behavior.
    pub fn request_yield(&self) -> &Self {
        self.cell.yield_requested.store(true, Ordering::Release);
        self
    }

    /// Stop running behaviors until [`resume`](ActorRef::resume). Sends are
    /// still queued.
    pub fn suspend(&self) -> &Self {
        self.cell.suspended.store(true, Ordering::SeqCst);
        debug!(actor_id = %self.id(), "Actor suspended");
        self
    }

    pub fn resume(&self) -> &Self {
        self.cell.suspended.store(false, Ordering::SeqCst);
        debug!(actor_id = %self.id(), "Actor resumed");
        if self.cell.mailbox.has_queued() {
            self.cell.schedule_if_idle();
        }
        self
    }

    pub fn is_suspended(&self) -> bool {
        self.cell.suspended.load(Ordering::SeqCst)
    }

    /// Takes effect the next time the actor is queued.
    pub fn set_priority(&self, priority: i32) -> &Self {
        self.cell.priority.store(priority, Ordering::Relaxed);
        self
    }

    pub fn priority(&self) -> i32 {
        self.cell.priority.load(Ordering::Relaxed)
    }

    pub fn set_core_affinity(&self, affinity: CoreAffinity) -> &Self {
        self.cell.affinity.store(affinity as u8, Ordering::Relaxed);
        self
    }

    pub fn core_affinity(&self) -> CoreAffinity {
        CoreAffinity::from_u8(self.cell.affinity.load(Ordering::Relaxed))
    }

    /// Zero is treated as one.
    pub fn set_batch_size(&self, batch_size: usize) -> &Self {
        self.cell.batch_size.store(batch_size, Ordering::Relaxed);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.cell.batch_size.load(Ordering::Relaxed)
    }

    pub(crate) fn link_upstream(&self) {
        self.cell.upstream_links.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn upstream_links(&self) -> usize {
        self.cell.upstream_links.load(Ordering::Acquire)
    }
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<A: Actor> PartialEq for ActorRef<A> {
    fn eq(&self, other: &Self) -> bool {
        self.cell.id == other.cell.id
    }
}

impl<A: Actor> Eq for ActorRef<A> {}

impl<A: Actor> fmt::Debug for ActorRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("id", &self.cell.id)
            .field("actor", &std::any::type_name::<A>())
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Builder for actors with non-default scheduling attributes.
pub struct ActorBuilder<A: Actor> {
    actor: A,
    priority: i32,
    affinity: CoreAffinity,
    batch_size: Option<usize>,
}

impl<A: Actor> ActorBuilder<A> {
    pub fn new(actor: A) -> Self {
        Self {
            actor,
            priority: 0,
            affinity: CoreAffinity::default(),
            batch_size: None,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn core_affinity(mut self, affinity: CoreAffinity) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Spawn the actor; a runtime that cannot start is fatal.
    #[track_caller]
    pub fn spawn(self) -> ActorRef<A> {
        match self.try_spawn() {
            Ok(actor) => actor,
            Err(err) => fatal(err),
        }
    }

    pub fn try_spawn(self) -> Result<ActorRef<A>> {
        scheduler::ensure_started()?;

        let batch_size = self
            .batch_size
            .unwrap_or_else(|| scheduler::config().scheduler.default_batch_size);

        let cell = Arc::new(ActorCell {
            id: ActorId::next(),
            mailbox: Mailbox::new(),
            slot: Mutex::new(Slot {
                actor: self.actor,
                chain: ChainState::new(),
            }),
            state: AtomicU8::new(IDLE),
            priority: AtomicI32::new(self.priority),
            affinity: AtomicU8::new(self.affinity as u8),
            batch_size: AtomicUsize::new(batch_size),
            yield_requested: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            upstream_links: AtomicUsize::new(0),
            created_at: Instant::now(),
        });

        METRICS.actors_created.fetch_add(1, Ordering::Relaxed);
        debug!(
            actor_id = %cell.id,
            actor = std::any::type_name::<A>(),
            priority = self.priority,
            affinity = ?self.affinity,
            batch_size,
            "Actor created"
        );

        Ok(ActorRef { cell })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tally(u32);
    impl Actor for Tally {}

    #[test]
    fn test_actor_id_display() {
        let a = ActorId::next();
        let b = ActorId::next();
        assert!(b > a);
        assert_eq!(a.to_string(), format!("actor-{}", a.as_u64()));
    }

    #[test]
    fn test_builder_attributes() {
        let actor = ActorBuilder::new(Tally(0))
            .priority(5)
            .core_affinity(CoreAffinity::OnlyEfficiency)
            .batch_size(7)
            .spawn();

        assert_eq!(actor.priority(), 5);
        assert_eq!(actor.core_affinity(), CoreAffinity::OnlyEfficiency);
        assert_eq!(actor.batch_size(), 7);

        actor.set_priority(-1).set_core_affinity(CoreAffinity::PreferEfficiency);
        assert_eq!(actor.priority(), -1);
        assert_eq!(actor.core_affinity(), CoreAffinity::PreferEfficiency);
    }

    #[test]
    fn test_uptime_grows() {
        let actor = ActorRef::new(Tally(0));
        let first = actor.uptime();
        thread::sleep(Duration::from_millis(5));
        assert!(actor.uptime() >= first + Duration::from_millis(5));
    }

    #[test]
    fn test_send_runs_in_order() {
        let actor = ActorRef::new(Tally(0));
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 1..=10 {
            actor.send(move |t, _| t.0 = t.0 * 10 + i % 10);
        }
        actor.send(move |t, _| {
            let _ = tx.send(t.0);
        });
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            1_234_567_890
        );
    }

    #[test]
    fn test_suspend_holds_messages() {
        let actor = ActorRef::new(Tally(0));
        actor.suspend();
        for _ in 0..5 {
            actor.send(|t, _| t.0 += 1);
        }
        thread::sleep(Duration::from_millis(20));
        assert_eq!(actor.pending_count(), 5);

        actor.resume();
        actor.wait(0);
        let (tx, rx) = crossbeam_channel::bounded(1);
        actor.send(move |t, _| {
            let _ = tx.send(t.0);
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 5);
    }

    #[test]
    fn test_wait_timeout_expires_while_suspended() {
        let actor = ActorRef::new(Tally(0));
        actor.suspend().send(|t, _| t.0 += 1);
        let err = actor
            .wait_timeout(0, Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(err.category(), "timeout");
        actor.resume();
        actor.wait_timeout(0, Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_skipped_suspended_actor_stays_idle() {
        let actor = ActorRef::new(Tally(0));
        actor.suspend().send(|t, _| t.0 += 1);
        actor.cell.state.store(SCHEDULED, Ordering::SeqCst);

        let outcome = Arc::clone(&actor.cell).run_batch();
        assert!(matches!(outcome, BatchOutcome::Idle));
        assert_eq!(actor.cell.state.load(Ordering::SeqCst), IDLE);
        assert_eq!(actor.pending_count(), 1);
    }

    #[test]
    fn test_resume_during_skipped_turn_reschedules() {
        let actor = ActorRef::new(Tally(0));
        actor.suspend().send(|t, _| t.0 += 1);

        // The worker has claimed the turn and seen the suspension; the resume
        // lands before it settles, so its own schedule attempt is refused.
        actor.cell.state.store(RUNNING, Ordering::SeqCst);
        actor.resume();
        assert_eq!(actor.cell.state.load(Ordering::SeqCst), RUNNING);

        let outcome = actor.cell.settle_idle();
        assert!(matches!(outcome, BatchOutcome::Reschedule));
        assert_eq!(actor.cell.state.load(Ordering::SeqCst), SCHEDULED);
    }
}
