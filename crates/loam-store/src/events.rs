//! Save notifications.
//!
//! Every store owns one [`EventBus`]. Subscribers register a type or tag
//! filter and receive a [`StoreEvent`] for each matching object saved after
//! they subscribed. Delivery goes through a broadcast channel, so a
//! subscriber always runs after `save` has returned and can never re-enter it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use loam_types::Fingerprint;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

/// A newly saved object.
pub struct StoreEvent<O> {
    pub fingerprint: Fingerprint,
    pub type_name: String,
    pub tags: BTreeSet<String>,
    pub object: Arc<O>,
}

impl<O> Clone for StoreEvent<O> {
    fn clone(&self) -> Self {
        Self {
            fingerprint: self.fingerprint,
            type_name: self.type_name.clone(),
            tags: self.tags.clone(),
            object: Arc::clone(&self.object),
        }
    }
}

impl<O> std::fmt::Debug for StoreEvent<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEvent")
            .field("fingerprint", &self.fingerprint)
            .field("type_name", &self.type_name)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Which saves a subscriber is interested in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventFilter {
    Type(String),
    Tag(String),
}

impl EventFilter {
    pub fn matches<O>(&self, event: &StoreEvent<O>) -> bool {
        match self {
            Self::Type(t) => event.type_name == *t,
            Self::Tag(t) => event.tags.contains(t),
        }
    }
}

/// Handle for deregistering a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of a subscription.
pub struct Subscription<O> {
    id: SubscriptionId,
    receiver: broadcast::Receiver<StoreEvent<O>>,
}

impl<O> Subscription<O> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. `None` once the subscription was removed or
    /// the store dropped.
    pub async fn recv(&mut self) -> Option<StoreEvent<O>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged; events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered event, without waiting.
    pub fn try_recv(&mut self) -> Option<StoreEvent<O>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged; events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

struct Subscriber<O> {
    id: SubscriptionId,
    filter: EventFilter,
    sender: broadcast::Sender<StoreEvent<O>>,
}

/// Fan-out router owned by one store instance.
pub(crate) struct EventBus<O> {
    subscribers: RwLock<Vec<Subscriber<O>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl<O> EventBus<O> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn subscribe(&self, filter: EventFilter) -> Subscription<O> {
        let (sender, receiver) = broadcast::channel(self.capacity);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .expect("event bus lock poisoned")
            .push(Subscriber { id, filter, sender });
        Subscription { id, receiver }
    }

    /// Remove a subscription; its receiver observes the end of the stream.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write().expect("event bus lock poisoned");
        let before = subs.len();
        subs.retain(|sub| sub.id != id);
        subs.len() != before
    }

    /// Deliver an event to every matching subscriber. Subscribers whose
    /// receivers are gone are pruned.
    pub(crate) fn publish(&self, event: &StoreEvent<O>) {
        let mut subs = self.subscribers.write().expect("event bus lock poisoned");
        subs.retain(|sub| {
            if sub.filter.matches(event) {
                sub.sender.send(event.clone()).is_ok()
            } else {
                sub.sender.receiver_count() > 0
            }
        });
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("event bus lock poisoned")
            .len()
    }
}
