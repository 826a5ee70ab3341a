//! Worker Pool Scheduler
//!
//! A fixed pool of OS threads runs actors cooperatively: a worker takes the
//! best runnable actor its [`CoreClass`] may run, executes up to one batch of
//! its behaviors, and queues it again if work remains.
//!
//! ## Ready lanes
//!
//! Runnable actors wait in one of four lanes keyed by [`CoreAffinity`]. Each
//! lane is a max-heap on `(priority, FIFO sequence)`; priority and affinity
//! are sampled when the actor is queued.
//!
//! | Worker class  | Drains first                          | Falls back to        |
//! |---------------|---------------------------------------|----------------------|
//! | `Efficiency`  | `OnlyEfficiency`, `PreferEfficiency`  | `PreferPerformance`  |
//! | `Performance` | `OnlyPerformance`, `PreferPerformance`| `PreferEfficiency`   |
//! | `Uniform`     | every lane                            | -                    |
//!
//! ## Lifecycle
//!
//! The runtime is process-wide. It starts on first actor creation (or an
//! explicit [`startup`]), and [`shutdown`] stops the workers after their
//! current batch. Actors still queued at shutdown, and actors sent to while
//! the runtime is down, are carried over to the next startup.
//!
//! # Lock Ordering
//!
//! 1. `RUNTIME` (read or write)
//! 2. `CARRYOVER`
//! 3. `Shared::ready`

use crate::actor::ActorId;
use crate::affinity::{CoreAffinity, CoreClass, CoreTopology};
use crate::chain::set_argument_checks;
use crate::error::{fatal, Result, RuntimeError};
use crate::metrics::METRICS;
use crate::{remote, timer};

use once_cell::sync::Lazy;
use parking_lot::{const_mutex, Condvar, Mutex, RwLock};
use runtime_config::RuntimeConfig;
use std::cell::Cell;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

const LANES: usize = 4;

/// Poll interval of [`wait_until_idle`].
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Anything a worker can run.
pub(crate) trait Schedulable: Send + Sync {
    fn actor_id(&self) -> ActorId;

    fn priority(&self) -> i32;

    fn core_affinity(&self) -> CoreAffinity;

    /// Run one batch of behaviors.
    fn run_batch(self: Arc<Self>) -> BatchOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchOutcome {
    /// Work remains; queue the actor again.
    Reschedule,
    Idle,
}

/// Identity of the worker thread running the current behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerInfo {
    pub index: usize,
    pub class: CoreClass,
}

thread_local! {
    static WORKER: Cell<Option<WorkerInfo>> = const { Cell::new(None) };
}

/// The worker running on this thread, if any.
pub fn current_worker() -> Option<WorkerInfo> {
    WORKER.with(Cell::get)
}

struct ReadyEntry {
    priority: i32,
    seq: u64,
    actor: Arc<dyn Schedulable>,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Higher priority first, then earlier sequence.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct ReadyQueues {
    lanes: [BinaryHeap<ReadyEntry>; LANES],
    seq: u64,
}

impl ReadyQueues {
    fn push(&mut self, actor: Arc<dyn Schedulable>) -> CoreAffinity {
        let affinity = actor.core_affinity();
        let priority = actor.priority();
        self.seq += 1;
        self.lanes[affinity.lane()].push(ReadyEntry {
            priority,
            seq: self.seq,
            actor,
        });
        affinity
    }

    fn pop_for(&mut self, class: CoreClass) -> Option<ReadyEntry> {
        let (primary, secondary) = class.lanes();
        self.pop_best(primary).or_else(|| self.pop_best(secondary))
    }

    fn pop_best(&mut self, lanes: &[CoreAffinity]) -> Option<ReadyEntry> {
        let lane = lanes
            .iter()
            .filter_map(|affinity| {
                let lane = affinity.lane();
                self.lanes[lane].peek().map(|entry| (lane, entry))
            })
            .max_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(lane, _)| lane)?;
        self.lanes[lane].pop()
    }

    fn len(&self) -> usize {
        self.lanes.iter().map(BinaryHeap::len).sum()
    }

    fn is_empty(&self) -> bool {
        self.lanes.iter().all(BinaryHeap::is_empty)
    }

    fn drain(&mut self) -> Vec<Arc<dyn Schedulable>> {
        let mut entries: Vec<ReadyEntry> = self.lanes.iter_mut().flat_map(|lane| lane.drain()).collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|entry| entry.actor).collect()
    }
}

struct Shared {
    ready: Mutex<ReadyQueues>,
    wake: [Condvar; CoreClass::COUNT],
    shutdown: AtomicBool,
    /// Workers currently running a batch.
    active: AtomicUsize,
    faulted: AtomicUsize,
    park_timeout: Duration,
}

impl Shared {
    fn push(&self, actor: Arc<dyn Schedulable>) {
        let affinity = self.ready.lock().push(actor);
        self.notify(affinity);
    }

    fn notify(&self, affinity: CoreAffinity) {
        let target = affinity.target_class();
        if self.wake[target.index()].notify_one() {
            return;
        }
        if self.wake[CoreClass::Uniform.index()].notify_one() {
            return;
        }
        if !affinity.is_exclusive() {
            let other = match target {
                CoreClass::Efficiency => CoreClass::Performance,
                _ => CoreClass::Efficiency,
            };
            self.wake[other.index()].notify_one();
        }
    }

    fn is_idle(&self) -> bool {
        self.active.load(Ordering::Acquire) == 0 && self.ready.lock().is_empty()
    }
}

struct Runtime {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    classes: Vec<CoreClass>,
}

static RUNTIME: Lazy<RwLock<Option<Runtime>>> = Lazy::new(|| RwLock::new(None));
static STARTED: AtomicBool = AtomicBool::new(false);
static CONFIG: Lazy<RwLock<RuntimeConfig>> = Lazy::new(|| RwLock::new(environment_config()));
static CARRYOVER: Lazy<Mutex<Vec<Arc<dyn Schedulable>>>> = Lazy::new(|| Mutex::new(Vec::new()));
/// Held for the whole of a start or a shutdown, worker joins included.
static LIFECYCLE: Mutex<()> = const_mutex(());

fn environment_config() -> RuntimeConfig {
    match RuntimeConfig::load(None) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "Ignoring invalid runtime configuration from environment");
            RuntimeConfig::default()
        }
    }
}

/// Configuration of the current (or next) runtime.
pub fn config() -> RuntimeConfig {
    CONFIG.read().clone()
}

/// Queue a runnable actor, or park it until the next startup.
pub(crate) fn schedule(actor: Arc<dyn Schedulable>) {
    let runtime = RUNTIME.read();
    match runtime.as_ref() {
        Some(runtime) => runtime.shared.push(actor),
        None => {
            trace!(actor_id = %actor.actor_id(), "Runtime down, carrying actor over");
            CARRYOVER.lock().push(actor);
        }
    }
}

pub(crate) fn ensure_started() -> Result<()> {
    if STARTED.load(Ordering::Acquire) {
        return Ok(());
    }
    start(config()).map(|_| ())
}

/// Workers never restart the pool they belong to. A worker seeing the
/// runtime down is finishing its last batch under a shutdown.
fn owned_by_worker() -> bool {
    match current_worker() {
        Some(worker) => {
            trace!(worker = worker.index, "Runtime lifecycle left to the stopping pool");
            true
        }
        None => false,
    }
}

/// Start the runtime with the stored configuration (environment overrides
/// applied). Does nothing if it is already running.
pub fn startup() -> Result<()> {
    startup_with(config())
}

/// Start the runtime with `config`. Does nothing if it is already running
/// or if called from a behavior.
pub fn startup_with(config: RuntimeConfig) -> Result<()> {
    if owned_by_worker() {
        return Ok(());
    }
    if !start(config)? {
        warn!("Actor runtime already running, ignoring startup");
    }
    Ok(())
}

fn start(config: RuntimeConfig) -> Result<bool> {
    config
        .validate()
        .map_err(|e| RuntimeError::configuration(format!("{e:#}"), Some("scheduler")))?;

    // Joining workers under LIFECYCLE would deadlock with a worker waiting
    // on it here.
    if owned_by_worker() {
        return Ok(false);
    }
    let _lifecycle = LIFECYCLE.lock();
    let mut slot = RUNTIME.write();
    if slot.is_some() {
        return Ok(false);
    }

    let settings = &config.scheduler;
    let detected = CoreTopology::detect();
    let worker_count = settings.resolve_worker_count(detected.total);
    let topology = match settings.efficiency_workers {
        Some(efficiency) => CoreTopology::split(worker_count, efficiency),
        None => detected,
    };
    let classes = topology.worker_classes(worker_count);

    let shared = Arc::new(Shared {
        ready: Mutex::new(ReadyQueues::default()),
        wake: Default::default(),
        shutdown: AtomicBool::new(false),
        active: AtomicUsize::new(0),
        faulted: AtomicUsize::new(0),
        park_timeout: Duration::from_millis(settings.park_timeout_ms.max(1)),
    });

    let mut workers = Vec::with_capacity(worker_count);
    for (index, &class) in classes.iter().enumerate() {
        let info = WorkerInfo { index, class };
        let worker_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("actor-worker-{index}"))
            .spawn(move || worker_loop(worker_shared, info));

        match spawned {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                error!(worker = index, error = %e, "Failed to spawn worker thread");
                stop_workers(&shared, workers);
                return Err(RuntimeError::scheduler_with_source(
                    format!("failed to spawn worker {index}"),
                    e,
                ));
            }
        }
    }

    set_argument_checks(config.debug.check_arguments);

    let carried = std::mem::take(&mut *CARRYOVER.lock());
    let carried_count = carried.len();
    for actor in carried {
        shared.push(actor);
    }

    let count = |class: CoreClass| classes.iter().filter(|c| **c == class).count();
    info!(
        workers = worker_count,
        efficiency = count(CoreClass::Efficiency),
        performance = count(CoreClass::Performance),
        uniform = count(CoreClass::Uniform),
        heterogeneous = topology.heterogeneous,
        batch_size = settings.default_batch_size,
        carried_over = carried_count,
        "Actor runtime started"
    );

    *CONFIG.write() = config;
    *slot = Some(Runtime {
        shared,
        workers,
        classes,
    });
    STARTED.store(true, Ordering::Release);
    Ok(true)
}

/// Signal and join workers, returning how many died by panic.
fn stop_workers(shared: &Shared, workers: Vec<JoinHandle<()>>) -> usize {
    {
        let _ready = shared.ready.lock();
        shared.shutdown.store(true, Ordering::Release);
    }
    for condvar in &shared.wake {
        condvar.notify_all();
    }
    workers
        .into_iter()
        .map(JoinHandle::join)
        .filter(std::result::Result::is_err)
        .count()
}

/// Stop the worker pool after the batches in flight.
///
/// Queued actors are kept for the next startup and pending timers are
/// cancelled. Reports [`RuntimeError::WorkerFault`] if any worker died.
pub fn shutdown() -> Result<()> {
    if let Some(worker) = current_worker() {
        return Err(RuntimeError::contract(format!(
            "shutdown() called from worker {}",
            worker.index
        )));
    }

    let _lifecycle = LIFECYCLE.lock();
    let runtime = {
        let mut slot = RUNTIME.write();
        STARTED.store(false, Ordering::Release);
        slot.take()
    };
    let Some(runtime) = runtime else {
        debug!("Actor runtime not running, nothing to shut down");
        return Ok(());
    };

    info!(workers = runtime.workers.len(), "Shutting down actor runtime");
    let panicked = stop_workers(&runtime.shared, runtime.workers);
    timer::clear();

    let leftover = runtime.shared.ready.lock().drain();
    let carried = leftover.len();
    CARRYOVER.lock().extend(leftover);

    let faulted = runtime.shared.faulted.load(Ordering::Acquire).max(panicked);
    info!(carried_over = carried, faulted, "Actor runtime stopped");

    if faulted > 0 {
        return Err(RuntimeError::WorkerFault { faulted });
    }
    Ok(())
}

/// Block until every worker is idle and every lane is empty for the
/// configured quiescence period, optionally also waiting for remote actors
/// to disconnect.
#[track_caller]
pub fn wait_until_idle(wait_for_remotes: bool) {
    if let Some(worker) = current_worker() {
        fatal(RuntimeError::contract(format!(
            "wait_until_idle() called from worker {}",
            worker.index
        )));
    }

    let quiescence = Duration::from_millis(config().scheduler.quiescence_ms);
    let mut idle_since: Option<Instant> = None;

    loop {
        let idle = is_idle() && (!wait_for_remotes || remote::active_remotes() == 0);
        match idle_since {
            Some(since) if idle && since.elapsed() >= quiescence => return,
            Some(_) if idle => {}
            _ if idle => idle_since = Some(Instant::now()),
            _ => idle_since = None,
        }
        thread::sleep(IDLE_POLL_INTERVAL);
    }
}

/// [`wait_until_idle`] followed by [`shutdown`].
pub fn shutdown_when_idle(wait_for_remotes: bool) -> Result<()> {
    wait_until_idle(wait_for_remotes);
    shutdown()
}

fn is_idle() -> bool {
    RUNTIME
        .read()
        .as_ref()
        .map_or(true, |runtime| runtime.shared.is_idle())
}

pub fn is_running() -> bool {
    STARTED.load(Ordering::Acquire)
}

pub fn worker_count() -> usize {
    RUNTIME
        .read()
        .as_ref()
        .map_or(0, |runtime| runtime.workers.len())
}

/// Core class of each worker, by worker index.
pub fn worker_classes() -> Vec<CoreClass> {
    RUNTIME
        .read()
        .as_ref()
        .map_or_else(Vec::new, |runtime| runtime.classes.clone())
}

/// Actors queued and waiting for a worker.
pub fn ready_count() -> usize {
    RUNTIME
        .read()
        .as_ref()
        .map_or(0, |runtime| runtime.shared.ready.lock().len())
}

/// Cores contributed by remote nodes.
pub fn remote_cores() -> usize {
    config().remote.remote_cores
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Reports a worker that unwinds out of a behavior.
struct FaultGuard<'a> {
    shared: &'a Shared,
    info: WorkerInfo,
}

impl Drop for FaultGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.shared.faulted.fetch_add(1, Ordering::AcqRel);
            METRICS.worker_faults.fetch_add(1, Ordering::Relaxed);
            error!(
                worker = self.info.index,
                class = %self.info.class,
                "Worker terminated by panicking behavior"
            );
        }
    }
}

fn worker_loop(shared: Arc<Shared>, info: WorkerInfo) {
    WORKER.with(|worker| worker.set(Some(info)));
    let _fault = FaultGuard {
        shared: &shared,
        info,
    };
    debug!(worker = info.index, class = %info.class, "Worker started");

    loop {
        let entry = {
            let mut ready = shared.ready.lock();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                if let Some(entry) = ready.pop_for(info.class) {
                    shared.active.fetch_add(1, Ordering::AcqRel);
                    break Some(entry);
                }
                shared.wake[info.class.index()].wait_for(&mut ready, shared.park_timeout);
            }
        };
        let Some(entry) = entry else {
            break;
        };
        let _active = ActiveGuard(&shared.active);
        let actor = entry.actor;

        let affinity = actor.core_affinity();
        if !affinity.allows(info.class) {
            METRICS.affinity_requeues.fetch_add(1, Ordering::Relaxed);
            trace!(
                worker = info.index,
                actor_id = %actor.actor_id(),
                ?affinity,
                "Affinity changed, requeueing actor"
            );
            shared.push(actor);
            continue;
        }

        trace!(
            worker = info.index,
            actor_id = %actor.actor_id(),
            priority = entry.priority,
            "Running actor"
        );
        if Arc::clone(&actor).run_batch() == BatchOutcome::Reschedule {
            shared.push(actor);
        }
    }

    WORKER.with(|worker| worker.set(None));
    debug!(worker = info.index, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        id: ActorId,
        priority: i32,
        affinity: CoreAffinity,
    }

    impl Schedulable for Fake {
        fn actor_id(&self) -> ActorId {
            self.id
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn core_affinity(&self) -> CoreAffinity {
            self.affinity
        }
        fn run_batch(self: Arc<Self>) -> BatchOutcome {
            BatchOutcome::Idle
        }
    }

    fn fake(priority: i32, affinity: CoreAffinity) -> (ActorId, Arc<dyn Schedulable>) {
        let id = ActorId::next();
        let actor: Arc<dyn Schedulable> = Arc::new(Fake {
            id,
            priority,
            affinity,
        });
        (id, actor)
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut ready = ReadyQueues::default();
        let (low, a) = fake(0, CoreAffinity::PreferPerformance);
        let (high_first, b) = fake(5, CoreAffinity::PreferPerformance);
        let (high_second, c) = fake(5, CoreAffinity::PreferPerformance);
        ready.push(a);
        ready.push(b);
        ready.push(c);

        let order: Vec<_> = std::iter::from_fn(|| ready.pop_for(CoreClass::Performance))
            .map(|entry| entry.actor.actor_id())
            .collect();
        assert_eq!(order, vec![high_first, high_second, low]);
    }

    #[test]
    fn test_exclusive_lanes_respect_class() {
        let mut ready = ReadyQueues::default();
        let (_, only_perf) = fake(0, CoreAffinity::OnlyPerformance);
        ready.push(only_perf);

        assert!(ready.pop_for(CoreClass::Efficiency).is_none());
        assert!(ready.pop_for(CoreClass::Performance).is_some());
    }

    #[test]
    fn test_prefer_lanes_spill_over() {
        let mut ready = ReadyQueues::default();
        let (prefer_eff, actor) = fake(0, CoreAffinity::PreferEfficiency);
        ready.push(actor);

        let entry = ready.pop_for(CoreClass::Performance).unwrap();
        assert_eq!(entry.actor.actor_id(), prefer_eff);
    }

    #[test]
    fn test_uniform_takes_highest_priority_across_lanes() {
        let mut ready = ReadyQueues::default();
        let (_, low) = fake(1, CoreAffinity::OnlyEfficiency);
        let (high, high_actor) = fake(9, CoreAffinity::PreferPerformance);
        ready.push(low);
        ready.push(high_actor);

        assert_eq!(ready.len(), 2);
        assert_eq!(
            ready.pop_for(CoreClass::Uniform).unwrap().actor.actor_id(),
            high
        );
    }

    #[test]
    fn test_drain_keeps_priority_order() {
        let mut ready = ReadyQueues::default();
        let (low, a) = fake(0, CoreAffinity::OnlyEfficiency);
        let (high, b) = fake(3, CoreAffinity::PreferPerformance);
        ready.push(a);
        ready.push(b);

        let drained: Vec<_> = ready.drain().iter().map(|a| a.actor_id()).collect();
        assert_eq!(drained, vec![high, low]);
        assert!(ready.is_empty());
    }
}
