//! Core affinity on a pool split into efficiency and performance workers.

use actor_runtime::{
    current_worker, worker_classes, Actor, ActorBuilder, CoreAffinity, CoreClass, RuntimeConfig,
};
use std::collections::HashSet;
use std::sync::Once;
use std::time::Duration;

static SPLIT_POOL: Once = Once::new();

/// Four workers, the first two efficiency class, whatever the host has.
fn split_pool() {
    SPLIT_POOL.call_once(|| {
        let mut config = RuntimeConfig::default();
        config.scheduler.worker_threads = Some(4);
        config.scheduler.efficiency_workers = Some(2);
        actor_runtime::startup_with(config).expect("runtime should start");
    });
}

#[derive(Default)]
struct Probe {
    classes: HashSet<CoreClass>,
}

impl Actor for Probe {}

fn observed_classes(affinity: CoreAffinity) -> HashSet<CoreClass> {
    let probe = ActorBuilder::new(Probe::default())
        .core_affinity(affinity)
        .batch_size(1)
        .spawn();

    for _ in 0..2000 {
        probe.send(|p, _| {
            if let Some(worker) = current_worker() {
                p.classes.insert(worker.class);
            }
        });
    }

    let (tx, rx) = crossbeam_channel::bounded(1);
    probe.send(move |p, _| {
        let _ = tx.send(std::mem::take(&mut p.classes));
    });
    rx.recv_timeout(Duration::from_secs(10)).unwrap()
}

#[test_log::test]
fn test_pool_is_split() {
    split_pool();
    assert_eq!(
        worker_classes(),
        vec![
            CoreClass::Efficiency,
            CoreClass::Efficiency,
            CoreClass::Performance,
            CoreClass::Performance,
        ]
    );
}

#[test_log::test]
fn test_only_performance_never_runs_on_efficiency() {
    split_pool();
    let classes = observed_classes(CoreAffinity::OnlyPerformance);
    assert!(!classes.is_empty());
    assert!(!classes.contains(&CoreClass::Efficiency), "{classes:?}");
}

#[test_log::test]
fn test_only_efficiency_never_runs_on_performance() {
    split_pool();
    let classes = observed_classes(CoreAffinity::OnlyEfficiency);
    assert!(!classes.is_empty());
    assert!(!classes.contains(&CoreClass::Performance), "{classes:?}");
}

#[test_log::test]
fn test_affinity_change_applies_on_next_queue() {
    split_pool();
    let probe = ActorBuilder::new(Probe::default())
        .core_affinity(CoreAffinity::OnlyPerformance)
        .batch_size(1)
        .spawn();
    probe.send(|_, _| {});
    probe.wait(0);

    probe.set_core_affinity(CoreAffinity::OnlyEfficiency);
    let (tx, rx) = crossbeam_channel::unbounded();
    for _ in 0..100 {
        let tx = tx.clone();
        probe.send(move |_, _| {
            if let Some(worker) = current_worker() {
                let _ = tx.send(worker.class);
            }
        });
    }
    drop(tx);

    let mut seen = 0;
    while let Ok(class) = rx.recv_timeout(Duration::from_secs(10)) {
        assert_eq!(class, CoreClass::Efficiency);
        seen += 1;
    }
    assert_eq!(seen, 100);
}
