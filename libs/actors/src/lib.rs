//! Mailbox-Based Actor Runtime
//!
//! Actors own private state and communicate only by sending behaviors:
//! closures queued on the target's mailbox and executed by a worker thread
//! with exclusive access to that actor's state. Each actor runs on at most
//! one thread at a time, so actor state needs no user-visible locking.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐      ┌─────────────────────────────────────┐
//! │  Callers / actors    │      │           Scheduler                 │
//! │                      │      │                                     │
//! │  ActorRef::send ─────┼──┐   │  ready lanes (by core affinity)     │
//! │  ActorRef::flow      │  │   │  ┌──────────┐ ┌──────────┐          │
//! │  Timer / Group       │  └───┼─►│ Only(E)  │ │ Only(P)  │ ...      │
//! └──────────────────────┘      │  └────┬─────┘ └────┬─────┘          │
//!                               │       ▼            ▼                │
//! ┌──────────────────────┐      │  efficiency   performance workers   │
//! │  Mailbox (per actor) │◄─────┼─ run up to batch_size behaviors     │
//! │  FIFO of behaviors   │      │  then requeue or go idle            │
//! └──────────────────────┘      └─────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - Behaviors sent by one thread to one actor run in send order
//! - An actor's behaviors never run concurrently
//! - Higher-priority runnable actors are picked first; ties are FIFO
//! - `OnlyEfficiency` / `OnlyPerformance` actors never run on the other class
//!
//! # Examples
//!
//! ```rust
//! use actor_runtime::{Actor, ActorRef, Context, Handler, Reply};
//! use std::time::Duration;
//!
//! #[derive(Default)]
//! struct Counter {
//!     value: i64,
//! }
//!
//! impl Actor for Counter {}
//!
//! enum CounterMsg {
//!     Inc(i64),
//!     Dec(i64),
//!     Get,
//! }
//!
//! impl Handler<CounterMsg> for Counter {
//!     type Reply = i64;
//!
//!     fn handle(&mut self, msg: CounterMsg, _ctx: &mut Context<'_, Self>) -> i64 {
//!         match msg {
//!             CounterMsg::Inc(n) => self.value += n,
//!             CounterMsg::Dec(n) => self.value -= n,
//!             CounterMsg::Get => {}
//!         }
//!         self.value
//!     }
//! }
//!
//! let counter = ActorRef::new(Counter::default());
//! let (tx, rx) = crossbeam_channel::bounded(1);
//!
//! counter
//!     .tell(CounterMsg::Inc(1))
//!     .tell(CounterMsg::Inc(10))
//!     .tell(CounterMsg::Inc(20))
//!     .tell(CounterMsg::Dec(1))
//!     .ask(CounterMsg::Get, Reply::from_fn(move |v| { let _ = tx.send(v); }));
//!
//! assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 30);
//! ```

pub mod actor;
pub mod affinity;
pub mod behavior;
pub mod chain;
pub mod error;
pub mod group;
pub mod mailbox;
pub mod metrics;
pub mod remote;
pub mod scheduler;
pub mod timer;

pub use actor::{Actor, ActorBuilder, ActorId, ActorRef};
pub use affinity::{CoreAffinity, CoreClass, CoreTopology};
pub use behavior::{Behavior, Context, Handler, Reply};
pub use chain::{ChainArgs, ChainLink, ChainOutcome, LoadBalance, Passthrough, Pipeline, Sink};
pub use error::{Result, RuntimeError};
pub use group::Group;
pub use metrics::{metrics, MetricsSnapshot, RuntimeMetrics};
pub use remote::{
    active_remotes, complete_reply, decode_payload, encode_payload, Endpoint, EndpointRole,
    RemoteActorRef, RemoteInvocation, RemoteTransport,
};
pub use scheduler::{
    config, current_worker, is_running, ready_count, remote_cores, shutdown, shutdown_when_idle,
    startup, startup_with, wait_until_idle, worker_classes, worker_count, WorkerInfo,
};
pub use timer::{Timer, TimerHandle};

pub use runtime_config::RuntimeConfig;
