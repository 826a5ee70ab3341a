//! Behavior Dispatch
//!
//! A behavior is a closure queued on an actor's mailbox and run with exclusive
//! access to the actor's state. Typed request/response flows use
//! [`Handler`] for message enums and [`Reply`] continuations, which are
//! themselves behaviors on the requesting actor.

use crate::actor::{Actor, ActorRef};
use crate::chain::{ChainArgs, ChainState, LoadBalance};

/// A unit of work for actor `A`. Arguments are moved in at send time.
pub type Behavior<A> = Box<dyn FnOnce(&mut A, &mut Context<'_, A>) + Send + 'static>;

/// Execution context handed to every behavior.
pub struct Context<'a, A: Actor> {
    myself: &'a ActorRef<A>,
    chain: &'a mut ChainState,
}

impl<'a, A: Actor> Context<'a, A> {
    pub(crate) fn new(myself: &'a ActorRef<A>, chain: &'a mut ChainState) -> Self {
        Self { myself, chain }
    }

    /// Handle to the running actor, for sending to self or handing out.
    pub fn myself(&self) -> &ActorRef<A> {
        self.myself
    }

    /// End the current scheduling turn after this behavior.
    pub fn yield_now(&self) {
        self.myself.request_yield();
    }

    /// Pass a chained message on to this actor's targets.
    pub fn forward(&mut self, args: ChainArgs) {
        self.chain.forward(self.myself, args);
    }

    pub fn target_count(&self) -> usize {
        self.chain.target_count()
    }

    pub fn load_balance(&self) -> LoadBalance {
        self.chain.load_balance()
    }

    pub(crate) fn chain_mut(&mut self) -> &mut ChainState {
        self.chain
    }
}

/// Typed message handling for actors that model their protocol as an enum.
pub trait Handler<M: Send + 'static>: Actor {
    type Reply: Send + 'static;

    fn handle(&mut self, msg: M, ctx: &mut Context<'_, Self>) -> Self::Reply;
}

/// Continuation that receives the result of a behavior.
///
/// Built with [`Reply::to`], delivery is a new behavior on the sender's
/// mailbox, so the sender's state is still only touched by the sender.
pub struct Reply<R> {
    deliver: Box<dyn FnOnce(R) + Send + 'static>,
}

impl<R: Send + 'static> Reply<R> {
    /// Deliver the value to `sender` as a behavior.
    pub fn to<S, F>(sender: &ActorRef<S>, callback: F) -> Self
    where
        S: Actor,
        F: FnOnce(&mut S, &mut Context<'_, S>, R) + Send + 'static,
    {
        let sender = sender.clone();
        Self {
            deliver: Box::new(move |value| {
                sender.send(move |state, ctx| callback(state, ctx, value));
            }),
        }
    }

    /// Deliver the value by calling `f` on whichever thread completes the
    /// reply. For callers that are not actors.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce(R) + Send + 'static,
    {
        Self {
            deliver: Box::new(f),
        }
    }

    pub fn send(self, value: R) {
        (self.deliver)(value)
    }
}

impl<R> std::fmt::Debug for Reply<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply").finish_non_exhaustive()
    }
}

impl<A: Actor> ActorRef<A> {
    /// Send a typed message, discarding the reply.
    pub fn tell<M>(&self, msg: M) -> &Self
    where
        A: Handler<M>,
        M: Send + 'static,
    {
        self.send(move |actor, ctx| {
            actor.handle(msg, ctx);
        })
    }

    /// Send a typed message and route the handler's result to `reply`.
    pub fn ask<M>(&self, msg: M, reply: Reply<<A as Handler<M>>::Reply>) -> &Self
    where
        A: Handler<M>,
        M: Send + 'static,
    {
        self.send(move |actor, ctx| reply.send(actor.handle(msg, ctx)))
    }

    /// Run `f` on the actor and route its result to `reply`.
    pub fn call<R, F>(&self, f: F, reply: Reply<R>) -> &Self
    where
        R: Send + 'static,
        F: FnOnce(&mut A, &mut Context<'_, A>) -> R + Send + 'static,
    {
        self.send(move |actor, ctx| reply.send(f(actor, ctx)))
    }
}
