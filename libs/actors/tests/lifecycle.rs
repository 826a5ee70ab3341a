//! Runtime startup, shutdown, carry-over and fault reporting.
//!
//! The runtime is process-wide, so everything runs in one sequential test.

use actor_runtime::{
    is_running, metrics, remote_cores, shutdown, shutdown_when_idle, startup, startup_with,
    worker_count, Actor, ActorRef, Reply, RuntimeConfig, RuntimeError,
};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Counter {
    value: u32,
}

impl Actor for Counter {}

fn value(counter: &ActorRef<Counter>) -> u32 {
    let (tx, rx) = crossbeam_channel::bounded(1);
    counter.call(
        |c, _| c.value,
        Reply::from_fn(move |v| {
            let _ = tx.send(v);
        }),
    );
    rx.recv_timeout(Duration::from_secs(10)).unwrap()
}

fn two_workers() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.scheduler.worker_threads = Some(2);
    config.scheduler.quiescence_ms = 20;
    config.remote.remote_cores = 2;
    config
}

#[test_log::test]
fn test_runtime_lifecycle() {
    // Explicit startup, repeated startup is ignored.
    startup_with(two_workers()).unwrap();
    assert!(is_running());
    assert_eq!(worker_count(), 2);
    assert_eq!(remote_cores(), 2);
    startup().unwrap();
    assert_eq!(worker_count(), 2);

    let counter = ActorRef::new(Counter::default());
    counter.send(|c, _| c.value += 1);
    assert_eq!(value(&counter), 1);

    // Shutdown from inside a behavior is refused.
    let (tx, rx) = crossbeam_channel::bounded(1);
    counter.send(move |_, _| {
        let _ = tx.send(shutdown().map_err(|e| e.is_contract_violation()));
    });
    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), Err(true));

    shutdown().unwrap();
    assert!(!is_running());
    assert_eq!(worker_count(), 0);
    // Second shutdown is a no-op.
    shutdown().unwrap();

    // Sends while down are carried over to the next startup.
    for _ in 0..3 {
        counter.send(|c, _| c.value += 1);
    }
    thread::sleep(Duration::from_millis(20));
    assert_eq!(counter.pending_count(), 3);

    startup().unwrap();
    counter
        .wait_timeout(0, Duration::from_secs(10))
        .unwrap();
    assert_eq!(value(&counter), 4);

    // Creating an actor restarts a stopped runtime.
    shutdown().unwrap();
    let fresh = ActorRef::new(Counter::default());
    assert!(is_running());
    fresh.send(|c, _| c.value = 7);
    assert_eq!(value(&fresh), 7);

    // Quiescent shutdown waits for in-flight work.
    for _ in 0..100 {
        fresh.send(|c, _| {
            thread::sleep(Duration::from_micros(100));
            c.value += 1;
        });
    }
    shutdown_when_idle(false).unwrap();
    assert!(!is_running());
    assert_eq!(fresh.pending_count(), 0);

    // A panicking behavior kills its worker and is reported at shutdown.
    startup_with(two_workers()).unwrap();
    let faults_before = metrics().worker_faults;
    let doomed = ActorRef::new(Counter::default());
    doomed.send(|_, _| panic!("behavior failure"));

    let deadline = Instant::now() + Duration::from_secs(10);
    while metrics().worker_faults == faults_before {
        assert!(Instant::now() < deadline, "fault was never recorded");
        thread::sleep(Duration::from_millis(5));
    }

    match shutdown() {
        Err(RuntimeError::WorkerFault { faulted }) => assert_eq!(faulted, 1),
        other => panic!("expected a worker fault, got {other:?}"),
    }

    // An actor created by a behavior that is still running while the pool
    // stops does not restart the runtime; its work waits for the next startup.
    let mut config = two_workers();
    config.scheduler.worker_threads = Some(1);
    startup_with(config).unwrap();

    let parent = ActorRef::new(Counter::default());
    let queued = ActorRef::new(Counter::default());
    let (child_tx, child_rx) = crossbeam_channel::bounded(1);
    let (running_tx, running_rx) = crossbeam_channel::bounded(1);
    parent.send(move |_, _| {
        let _ = running_tx.send(());
        thread::sleep(Duration::from_millis(100));
        let child = ActorRef::new(Counter::default());
        child.send(|c, _| c.value = 5);
        let _ = child_tx.send(child);
    });
    running_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    queued.send(|c, _| c.value += 1);

    shutdown().unwrap();
    assert!(!is_running());
    let child = child_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(!is_running());
    assert_eq!(child.pending_count(), 1);

    startup().unwrap();
    assert_eq!(value(&child), 5);
    assert_eq!(value(&queued), 1);
    shutdown().unwrap();
}
