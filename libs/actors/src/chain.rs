//! Chaining and Load Balancing
//!
//! Actors can be linked into pipelines. A chained message is a dynamically
//! typed [`ChainArgs`] list; an empty list marks end-of-stream. Each stage
//! runs [`Actor::process_chain`] and forwards the outcome to its targets:
//!
//! ```text
//!                       ┌──► Uppercase ──┐
//!   Passthrough ──(lb)──┼──► Uppercase ──┼──► Concatenate ──► Sink
//!                       └──► Uppercase ──┘
//! ```
//!
//! Data messages go to one target chosen by the stage's [`LoadBalance`]
//! policy. End-of-stream is held back until every target has drained and is
//! then broadcast; a stage fed by several upstream links acts on it once all
//! of them have delivered it.

use crate::actor::{Actor, ActorId, ActorRef};
use crate::behavior::Context;
use crate::error::{fatal, Result, RuntimeError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::{self, Any};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

static ARGUMENT_CHECKS: AtomicBool = AtomicBool::new(cfg!(debug_assertions));

/// Record argument type names on chained messages.
pub(crate) fn set_argument_checks(enabled: bool) {
    ARGUMENT_CHECKS.store(enabled, Ordering::Relaxed);
}

struct ChainArg {
    value: Option<Box<dyn Any + Send>>,
    type_name: Option<&'static str>,
}

impl ChainArg {
    fn describe(&self) -> String {
        match (&self.value, self.type_name) {
            (None, _) => "<taken>".to_string(),
            (Some(_), Some(name)) => name.to_string(),
            (Some(_), None) => "<unrecorded>".to_string(),
        }
    }
}

/// Arguments of a chained message.
#[derive(Default)]
pub struct ChainArgs {
    args: Vec<ChainArg>,
}

impl ChainArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// The end-of-stream marker.
    pub fn end_of_stream() -> Self {
        Self::default()
    }

    pub fn with<T: Any + Send>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    pub fn push<T: Any + Send>(&mut self, value: T) {
        let type_name = ARGUMENT_CHECKS
            .load(Ordering::Relaxed)
            .then(any::type_name::<T>);
        self.args.push(ChainArg {
            value: Some(Box::new(value)),
            type_name,
        });
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.args.is_empty()
    }

    /// Borrow argument `index` as `T`. A missing argument or a type mismatch
    /// is a fatal contract violation.
    #[track_caller]
    pub fn get<T: Any>(&self, index: usize) -> &T {
        match self.try_get(index) {
            Ok(value) => value,
            Err(err) => fatal(err),
        }
    }

    /// Move argument `index` out as `T`, fatal on mismatch like
    /// [`get`](ChainArgs::get).
    #[track_caller]
    pub fn take<T: Any>(&mut self, index: usize) -> T {
        match self.try_take(index) {
            Ok(value) => value,
            Err(err) => fatal(err),
        }
    }

    pub fn try_get<T: Any>(&self, index: usize) -> Result<&T> {
        let arg = self.arg(index)?;
        arg.value
            .as_ref()
            .and_then(|value| value.downcast_ref::<T>())
            .ok_or_else(|| RuntimeError::argument_type(index, any::type_name::<T>(), arg.describe()))
    }

    pub fn try_take<T: Any>(&mut self, index: usize) -> Result<T> {
        let available = self.args.len();
        let arg = self
            .args
            .get_mut(index)
            .ok_or_else(|| RuntimeError::argument_count(index, available))?;

        match arg.value.take() {
            Some(value) => match value.downcast::<T>() {
                Ok(value) => Ok(*value),
                Err(value) => {
                    arg.value = Some(value);
                    Err(RuntimeError::argument_type(
                        index,
                        any::type_name::<T>(),
                        arg.describe(),
                    ))
                }
            },
            None => Err(RuntimeError::argument_type(
                index,
                any::type_name::<T>(),
                arg.describe(),
            )),
        }
    }

    fn arg(&self, index: usize) -> Result<&ChainArg> {
        self.args
            .get(index)
            .ok_or_else(|| RuntimeError::argument_count(index, self.args.len()))
    }
}

impl fmt::Debug for ChainArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.args.iter().map(ChainArg::describe))
            .finish()
    }
}

/// Build a [`ChainArgs`] from a list of values.
///
/// ```rust
/// use actor_runtime::chain_args;
///
/// let args = chain_args!["hello", 42u32];
/// assert_eq!(args.len(), 2);
/// assert_eq!(*args.get::<u32>(1), 42);
/// ```
#[macro_export]
macro_rules! chain_args {
    () => {
        $crate::ChainArgs::new()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::ChainArgs::new()$(.with($value))+
    };
}

/// What a stage does with a chained message after processing it.
#[derive(Debug)]
pub enum ChainOutcome {
    Forward(ChainArgs),
    Consume,
}

/// How a stage with several targets picks one for a data message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalance {
    #[default]
    RoundRobin,
    Random,
    /// Target with the fewest pending behaviors. Counts are sampled racily.
    MinimumQueue,
}

/// A pipeline stage as seen by its upstream: any actor, type-erased.
pub trait ChainLink: Send + Sync {
    fn actor_id(&self) -> ActorId;

    fn flow(&self, args: ChainArgs);

    fn pending_count(&self) -> usize;

    /// Register one more upstream feeding this stage.
    fn link_upstream(&self);

    fn attach_link(&self, target: Arc<dyn ChainLink>);

    fn set_load_balance(&self, policy: LoadBalance);
}

impl<A: Actor> ChainLink for ActorRef<A> {
    fn actor_id(&self) -> ActorId {
        self.id()
    }

    fn flow(&self, args: ChainArgs) {
        ActorRef::flow(self, args);
    }

    fn pending_count(&self) -> usize {
        ActorRef::pending_count(self)
    }

    fn link_upstream(&self) {
        ActorRef::link_upstream(self);
    }

    fn attach_link(&self, target: Arc<dyn ChainLink>) {
        ActorRef::attach_link(self, target);
    }

    fn set_load_balance(&self, policy: LoadBalance) {
        ActorRef::set_load_balance(self, policy);
    }
}

/// Per-actor chain bookkeeping, only touched from the actor's own behaviors.
pub struct ChainState {
    targets: Vec<Arc<dyn ChainLink>>,
    policy: LoadBalance,
    cursor: usize,
    rng: Option<StdRng>,
    end_of_stream_seen: usize,
}

impl ChainState {
    pub(crate) fn new() -> Self {
        Self {
            targets: Vec::new(),
            policy: LoadBalance::default(),
            cursor: 0,
            rng: None,
            end_of_stream_seen: 0,
        }
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn load_balance(&self) -> LoadBalance {
        self.policy
    }

    fn attach(&mut self, target: Arc<dyn ChainLink>) {
        self.targets.push(target);
    }

    fn set_policy(&mut self, policy: LoadBalance) {
        self.policy = policy;
        self.cursor = 0;
    }

    /// Whether end-of-stream should be acted on, given how many upstream
    /// links feed this stage.
    fn arrive_end_of_stream(&mut self, upstream_links: usize) -> bool {
        if upstream_links <= 1 {
            return true;
        }
        self.end_of_stream_seen += 1;
        if self.end_of_stream_seen < upstream_links {
            return false;
        }
        self.end_of_stream_seen = 0;
        true
    }

    fn pick(&mut self) -> usize {
        let count = self.targets.len();
        match self.policy {
            LoadBalance::RoundRobin => {
                let index = self.cursor % count;
                self.cursor = self.cursor.wrapping_add(1);
                index
            }
            LoadBalance::Random => self
                .rng
                .get_or_insert_with(StdRng::from_entropy)
                .gen_range(0..count),
            LoadBalance::MinimumQueue => {
                let start = self.cursor % count;
                self.cursor = self.cursor.wrapping_add(1);
                (0..count)
                    .map(|offset| (start + offset) % count)
                    .min_by_key(|&index| self.targets[index].pending_count())
                    .unwrap_or(start)
            }
        }
    }

    pub(crate) fn forward<A: Actor>(&mut self, myself: &ActorRef<A>, args: ChainArgs) {
        match self.targets.len() {
            0 => trace!(actor_id = %myself.id(), "No chain targets, dropping message"),
            1 => self.targets[0].flow(args),
            _ if args.is_end_of_stream() => {
                if let Some(busy) = self.targets.iter().find(|t| t.pending_count() > 0) {
                    trace!(
                        actor_id = %myself.id(),
                        busy = %busy.actor_id(),
                        "Targets still draining, retrying end-of-stream"
                    );
                    myself.send(|_, ctx| ctx.forward(ChainArgs::end_of_stream()));
                    myself.request_yield();
                    return;
                }
                for target in &self.targets {
                    target.flow(ChainArgs::end_of_stream());
                }
            }
            _ => {
                let index = self.pick();
                self.targets[index].flow(args);
            }
        }
    }
}

impl fmt::Debug for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainState")
            .field(
                "targets",
                &self.targets.iter().map(|t| t.actor_id()).collect::<Vec<_>>(),
            )
            .field("policy", &self.policy)
            .finish()
    }
}

fn deliver<A: Actor>(actor: &mut A, ctx: &mut Context<'_, A>, args: ChainArgs) {
    if args.is_end_of_stream() {
        let links = ctx.myself().upstream_links();
        if !ctx.chain_mut().arrive_end_of_stream(links) {
            return;
        }
    }

    match actor.process_chain(args, ctx) {
        ChainOutcome::Forward(args) => ctx.forward(args),
        ChainOutcome::Consume => {}
    }
}

impl<A: Actor> ActorRef<A> {
    /// Append `target` to this actor's chain targets.
    pub fn attach_target<B: Actor>(&self, target: &ActorRef<B>) -> &Self {
        self.attach_link(Arc::new(target.clone()))
    }

    pub fn attach_targets<B: Actor>(&self, targets: &[ActorRef<B>]) -> &Self {
        for target in targets {
            self.attach_target(target);
        }
        self
    }

    /// Attach a type-erased target. The change is queued behind messages
    /// already sent to this actor.
    pub fn attach_link(&self, target: Arc<dyn ChainLink>) -> &Self {
        target.link_upstream();
        self.send(move |_, ctx| ctx.chain_mut().attach(target))
    }

    pub fn set_load_balance(&self, policy: LoadBalance) -> &Self {
        self.send(move |_, ctx| ctx.chain_mut().set_policy(policy))
    }

    /// Deliver a chained message.
    pub fn flow(&self, args: ChainArgs) -> &Self {
        self.send(move |actor, ctx| deliver(actor, ctx, args))
    }

    pub fn end_flow(&self) -> &Self {
        self.flow(ChainArgs::end_of_stream())
    }
}

/// Builder that links actors into a pipeline.
///
/// ```rust,no_run
/// use actor_runtime::{chain_args, ActorRef, Passthrough, Pipeline, Sink};
///
/// let sink = ActorRef::new(Sink::new(|args| println!("{args:?}")));
/// let pipeline = Pipeline::new(&ActorRef::new(Passthrough)).then(&sink);
/// pipeline.flow(chain_args!["hello"]).end();
/// ```
pub struct Pipeline {
    head: Arc<dyn ChainLink>,
    tails: Vec<Arc<dyn ChainLink>>,
}

impl Pipeline {
    pub fn new<A: Actor>(head: &ActorRef<A>) -> Self {
        let head: Arc<dyn ChainLink> = Arc::new(head.clone());
        Self {
            tails: vec![Arc::clone(&head)],
            head,
        }
    }

    /// Link every current tail to `stage`.
    pub fn then<B: Actor>(self, stage: &ActorRef<B>) -> Self {
        self.fan_out(std::slice::from_ref(stage))
    }

    /// Link every current tail to each of `stages`.
    pub fn fan_out<B: Actor>(mut self, stages: &[ActorRef<B>]) -> Self {
        let links: Vec<Arc<dyn ChainLink>> = stages
            .iter()
            .map(|stage| Arc::new(stage.clone()) as Arc<dyn ChainLink>)
            .collect();
        for tail in &self.tails {
            for link in &links {
                tail.attach_link(Arc::clone(link));
            }
        }
        self.tails = links;
        self
    }

    /// Set the load-balancing policy of the current tails.
    pub fn balance(self, policy: LoadBalance) -> Self {
        for tail in &self.tails {
            tail.set_load_balance(policy);
        }
        self
    }

    pub fn flow(&self, args: ChainArgs) -> &Self {
        self.head.flow(args);
        self
    }

    pub fn end(&self) -> &Self {
        self.flow(ChainArgs::end_of_stream())
    }

    pub fn head(&self) -> &Arc<dyn ChainLink> {
        &self.head
    }
}

/// Stage that forwards everything unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Actor for Passthrough {}

/// Terminal stage invoking a callback for every message, end-of-stream
/// included.
pub struct Sink<F> {
    on_message: F,
}

impl<F> Sink<F>
where
    F: FnMut(ChainArgs) + Send + 'static,
{
    pub fn new(on_message: F) -> Self {
        Self { on_message }
    }
}

impl<F> Actor for Sink<F>
where
    F: FnMut(ChainArgs) + Send + 'static,
{
    fn process_chain(&mut self, args: ChainArgs, _ctx: &mut Context<'_, Self>) -> ChainOutcome {
        (self.on_message)(args);
        ChainOutcome::Consume
    }
}
