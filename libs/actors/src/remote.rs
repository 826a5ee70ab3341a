//! Remote Actor Interface
//!
//! The runtime does not ship a network layer. It defines what a transport has
//! to carry ([`RemoteInvocation`]), the [`RemoteTransport`] seam a transport
//! implements, and [`RemoteActorRef`], the local proxy for an actor living in
//! another process. Replies come back through [`complete_reply`], which hands
//! the payload to the continuation registered by [`RemoteActorRef::ask`].
//!
//! ```text
//!   RemoteActorRef::ask ──► RemoteInvocation ──► RemoteTransport::deliver ──► node
//!          │                                                                  │
//!          └── Reply registered under message_id ◄── complete_reply ◄─────────┘
//! ```

use crate::behavior::Reply;
use crate::error::{Result, RuntimeError};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use runtime_config::RemoteSettings;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

static NEXT_MESSAGE_ID: AtomicU32 = AtomicU32::new(1);
static ACTIVE_REMOTES: AtomicUsize = AtomicUsize::new(0);

type ReplyHandler = Box<dyn FnOnce(Vec<u8>) + Send + 'static>;

static PENDING_REPLIES: Lazy<Mutex<HashMap<u32, ReplyHandler>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// A behavior call addressed to a remote actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInvocation {
    pub message_id: u32,
    pub actor_uuid: Uuid,
    pub actor_type: String,
    pub behavior: String,
    pub payload: Vec<u8>,
}

impl RemoteInvocation {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| RuntimeError::serialization_with_source("failed to encode invocation", e))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| RuntimeError::serialization_with_source("failed to decode invocation", e))
    }
}

/// Serialize a behavior argument or reply value.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| RuntimeError::serialization_with_source("failed to encode payload", e))
}

pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| RuntimeError::serialization_with_source("failed to decode payload", e))
}

/// Which side of a remote link this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointRole {
    /// Listens for nodes and owns the proxies.
    Root,
    /// Connects to a root and hosts the remote actors.
    Node,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    pub role: EndpointRole,
}

impl Endpoint {
    pub fn root(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            role: EndpointRole::Root,
        }
    }

    pub fn node(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            role: EndpointRole::Node,
        }
    }

    /// Endpoint described by `[remote]` settings, if both address and port
    /// are configured.
    pub fn from_settings(settings: &RemoteSettings, role: EndpointRole) -> Option<Self> {
        let address = settings.listen.clone()?;
        let port = settings.port?;
        Some(Self {
            address,
            port,
            role,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            EndpointRole::Root => "root",
            EndpointRole::Node => "node",
        };
        write!(f, "{}@{}:{}", role, self.address, self.port)
    }
}

/// Carries invocations to remote actors. Implementations must preserve
/// order per sender.
pub trait RemoteTransport: Send + Sync {
    fn endpoint(&self) -> &Endpoint;

    fn is_connected(&self) -> bool;

    fn deliver(&self, invocation: RemoteInvocation) -> Result<()>;
}

/// Local proxy for an actor hosted by another process.
///
/// Counts as an active remote for [`shutdown_when_idle`] while alive.
///
/// [`shutdown_when_idle`]: crate::shutdown_when_idle
pub struct RemoteActorRef {
    uuid: Uuid,
    actor_type: String,
    transport: Arc<dyn RemoteTransport>,
}

impl RemoteActorRef {
    /// Proxy for a fresh remote actor of `actor_type`.
    pub fn new(actor_type: impl Into<String>, transport: Arc<dyn RemoteTransport>) -> Self {
        Self::with_uuid(Uuid::new_v4(), actor_type, transport)
    }

    /// Proxy for a named remote service.
    pub fn with_uuid(
        uuid: Uuid,
        actor_type: impl Into<String>,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        let actor_type = actor_type.into();
        ACTIVE_REMOTES.fetch_add(1, Ordering::AcqRel);
        debug!(
            %uuid,
            actor_type = %actor_type,
            endpoint = %transport.endpoint(),
            "Remote actor proxy created"
        );
        Self {
            uuid,
            actor_type,
            transport,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn actor_type(&self) -> &str {
        &self.actor_type
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Invoke `behavior` with a serialized argument. Returns the message id.
    pub fn send<T: Serialize>(&self, behavior: &str, payload: &T) -> Result<u32> {
        self.send_raw(behavior, encode_payload(payload)?)
    }

    pub fn send_raw(&self, behavior: &str, payload: Vec<u8>) -> Result<u32> {
        let invocation = self.invocation(behavior, payload);
        let message_id = invocation.message_id;
        self.transport.deliver(invocation)?;
        Ok(message_id)
    }

    /// Invoke `behavior` and route the decoded reply to `reply`.
    pub fn ask<T, R>(&self, behavior: &str, payload: &T, reply: Reply<Result<R>>) -> Result<u32>
    where
        T: Serialize,
        R: DeserializeOwned + Send + 'static,
    {
        let invocation = self.invocation(behavior, encode_payload(payload)?);
        let message_id = invocation.message_id;

        PENDING_REPLIES.lock().insert(
            message_id,
            Box::new(move |bytes: Vec<u8>| reply.send(decode_payload(&bytes))),
        );

        if let Err(e) = self.transport.deliver(invocation) {
            PENDING_REPLIES.lock().remove(&message_id);
            return Err(e);
        }
        Ok(message_id)
    }

    fn invocation(&self, behavior: &str, payload: Vec<u8>) -> RemoteInvocation {
        RemoteInvocation {
            message_id: NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed),
            actor_uuid: self.uuid,
            actor_type: self.actor_type.clone(),
            behavior: behavior.to_string(),
            payload,
        }
    }
}

impl Drop for RemoteActorRef {
    fn drop(&mut self) {
        ACTIVE_REMOTES.fetch_sub(1, Ordering::AcqRel);
        debug!(uuid = %self.uuid, "Remote actor proxy dropped");
    }
}

impl fmt::Debug for RemoteActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteActorRef")
            .field("uuid", &self.uuid)
            .field("actor_type", &self.actor_type)
            .field("endpoint", self.transport.endpoint())
            .finish()
    }
}

/// Hand a reply payload to the continuation registered for `message_id`.
/// Returns `false` for unknown or already completed ids.
pub fn complete_reply(message_id: u32, payload: Vec<u8>) -> bool {
    let handler = PENDING_REPLIES.lock().remove(&message_id);
    match handler {
        Some(handler) => {
            handler(payload);
            true
        }
        None => {
            warn!(message_id, "Reply for unknown remote message");
            false
        }
    }
}

/// Live [`RemoteActorRef`]s in this process.
pub fn active_remotes() -> usize {
    ACTIVE_REMOTES.load(Ordering::Acquire)
}

/// Remote asks still waiting for a reply.
pub fn pending_replies() -> usize {
    PENDING_REPLIES.lock().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct RecordingTransport {
        endpoint: Endpoint,
        connected: AtomicBool,
        sent: Mutex<Vec<RemoteInvocation>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                endpoint: Endpoint::root("127.0.0.1", 9090),
                connected: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    impl RemoteTransport for RecordingTransport {
        fn endpoint(&self) -> &Endpoint {
            &self.endpoint
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Acquire)
        }

        fn deliver(&self, invocation: RemoteInvocation) -> Result<()> {
            if !self.is_connected() {
                return Err(RuntimeError::remote_with_source(
                    "not connected",
                    std::io::Error::from(std::io::ErrorKind::NotConnected),
                ));
            }
            // Exercise the wire form.
            let bytes = invocation.encode()?;
            self.sent.lock().push(RemoteInvocation::decode(&bytes)?);
            Ok(())
        }
    }

    #[test]
    fn test_send_carries_invocation() {
        let transport = RecordingTransport::new();
        let remote = RemoteActorRef::new("Counter", transport.clone());
        assert!(active_remotes() >= 1);

        let first = remote.send("inc", &5u64).unwrap();
        let second = remote.send("inc", &7u64).unwrap();
        assert!(second > first);

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].actor_uuid, remote.uuid());
        assert_eq!(sent[0].actor_type, "Counter");
        assert_eq!(sent[0].behavior, "inc");
        assert_eq!(decode_payload::<u64>(&sent[1].payload).unwrap(), 7);
    }

    #[test]
    fn test_ask_completes_once() {
        let transport = RecordingTransport::new();
        let remote = RemoteActorRef::new("Echo", transport.clone());
        let (tx, rx) = crossbeam_channel::bounded(1);

        let message_id = remote
            .ask(
                "echo",
                &"ping".to_string(),
                Reply::from_fn(move |value: Result<String>| {
                    let _ = tx.send(value);
                }),
            )
            .unwrap();
        assert!(pending_replies() >= 1);

        let payload = encode_payload(&"pong".to_string()).unwrap();
        assert!(complete_reply(message_id, payload.clone()));
        assert_eq!(rx.try_recv().unwrap().unwrap(), "pong");
        assert!(!complete_reply(message_id, payload));
    }

    #[test]
    fn test_failed_delivery_drops_registration() {
        let transport = RecordingTransport::new();
        transport.connected.store(false, Ordering::Release);
        let remote = RemoteActorRef::new("Echo", transport);

        let err = remote
            .ask("echo", &1u8, Reply::from_fn(|_: Result<u8>| {}))
            .unwrap_err();
        assert_eq!(err.category(), "remote");
        assert!(std::error::Error::source(&err).is_some());
        assert!(!remote.is_connected());
    }

    #[test]
    fn test_endpoint_from_settings() {
        let mut settings = RemoteSettings::default();
        assert!(Endpoint::from_settings(&settings, EndpointRole::Root).is_none());

        settings.listen = Some("0.0.0.0".to_string());
        settings.port = Some(7000);
        let endpoint = Endpoint::from_settings(&settings, EndpointRole::Node).unwrap();
        assert_eq!(endpoint.to_string(), "node@0.0.0.0:7000");
    }
}
