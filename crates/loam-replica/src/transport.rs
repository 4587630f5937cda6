use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use loam_types::Fingerprint;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{ReplicaError, ReplicaResult};

/// A payload in flight between two identities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub source: Fingerprint,
    pub destination: Fingerprint,
    pub payload: Vec<u8>,
}

/// Delivery of payloads to peer identities.
///
/// Delivery is at least once with no ordering guarantee; receivers must
/// tolerate duplicates.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identity this endpoint sends as.
    fn identity(&self) -> Fingerprint;

    async fn send(&self, target: Fingerprint, payload: Vec<u8>, timeout: Duration) -> ReplicaResult<()>;
}

/// In-process network of mailbox channels, one per registered identity.
#[derive(Default)]
pub struct MemoryNetwork {
    mailboxes: RwLock<HashMap<Fingerprint, mpsc::Sender<Message>>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `identity` and return its inbox. Registering again replaces
    /// the previous inbox.
    pub fn register(&self, identity: Fingerprint, capacity: usize) -> mpsc::Receiver<Message> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        self.mailboxes
            .write()
            .expect("network lock poisoned")
            .insert(identity, sender);
        receiver
    }

    /// A sending endpoint for `identity`.
    pub fn endpoint(self: &Arc<Self>, identity: Fingerprint) -> MemoryTransport {
        MemoryTransport {
            network: Arc::clone(self),
            identity,
        }
    }

    fn mailbox(&self, identity: &Fingerprint) -> Option<mpsc::Sender<Message>> {
        self.mailboxes
            .read()
            .expect("network lock poisoned")
            .get(identity)
            .cloned()
    }
}

/// [`Transport`] over a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    identity: Fingerprint,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn identity(&self) -> Fingerprint {
        self.identity
    }

    async fn send(&self, target: Fingerprint, payload: Vec<u8>, timeout: Duration) -> ReplicaResult<()> {
        let mailbox = self
            .network
            .mailbox(&target)
            .ok_or(ReplicaError::UnknownPeer(target))?;
        let message = Message {
            source: self.identity,
            destination: target,
            payload,
        };
        match tokio::time::timeout(timeout, mailbox.send(message)).await {
            Ok(Ok(())) => {
                trace!(to = %target.short_hex(), "message delivered");
                Ok(())
            }
            Ok(Err(_)) => Err(ReplicaError::Transport(format!("inbox of {target} closed"))),
            Err(_) => Err(ReplicaError::Timeout(target)),
        }
    }
}
