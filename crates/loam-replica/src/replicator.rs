//! Shipping ops between peers.
//!
//! An op travels as a [`Bundle`]: the serialized literals of the op and of
//! everything it transitively references, key pairs excluded. The receiver
//! treats the bundle as an external pool, so the whole graph is checked for
//! tampering and forged signatures before anything is saved.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use loam_store::{ExternalPool, Literal, ObjectStore, StoreError};
use loam_types::Fingerprint;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ReplicaError, ReplicaResult};
use crate::identity::KeyPair;
use crate::object::Object;
use crate::replica::Replica;
use crate::state::ReplicaState;
use crate::transport::{Message, Transport};

/// Replicator settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicatorConfig {
    /// Per-send timeout, in milliseconds.
    pub send_timeout_ms: u64,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 5_000,
        }
    }
}

impl ReplicatorConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// An op and its reference graph, as shipped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub root: Fingerprint,
    pub literals: BTreeMap<Fingerprint, String>,
}

impl Bundle {
    pub fn to_bytes(&self) -> ReplicaResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ReplicaError::Malformed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> ReplicaResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ReplicaError::Malformed(format!("bundle: {e}")))
    }

    pub fn pool(&self) -> ExternalPool {
        self.literals
            .iter()
            .map(|(fp, literal)| (*fp, literal.clone()))
            .collect()
    }
}

/// Moves ops between a local store and peers.
pub struct Replicator<T> {
    store: Arc<ObjectStore<Object>>,
    transport: T,
    config: ReplicatorConfig,
}

impl<T: Transport> Replicator<T> {
    pub fn new(store: Arc<ObjectStore<Object>>, transport: T, config: ReplicatorConfig) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    pub fn store(&self) -> &Arc<ObjectStore<Object>> {
        &self.store
    }

    /// Collect the stored graph under `root`. Key pairs and keys not held
    /// locally are left out.
    pub fn bundle(&self, root: Fingerprint) -> ReplicaResult<Bundle> {
        let mut literals = BTreeMap::new();
        let mut stack = vec![root];
        while let Some(fingerprint) = stack.pop() {
            if literals.contains_key(&fingerprint) {
                continue;
            }
            let Some(text) = self.store.literal_of(&fingerprint)? else {
                if fingerprint == root {
                    return Err(StoreError::MissingDependency(root).into());
                }
                continue;
            };
            let literal = Literal::parse(&text)?;
            if literal.type_name == KeyPair::TYPE_NAME {
                continue;
            }
            stack.extend(literal.references().copied());
            literals.insert(fingerprint, text);
        }
        Ok(Bundle { root, literals })
    }

    /// Send the stored op `op` to each of `targets`. Returns how many sends
    /// succeeded; failures are logged.
    pub async fn send_op(&self, op: Fingerprint, targets: &[Fingerprint]) -> ReplicaResult<usize> {
        let payload = self.bundle(op)?.to_bytes()?;
        let mut delivered = 0;
        for target in targets {
            if *target == self.transport.identity() {
                continue;
            }
            match self
                .transport
                .send(*target, payload.clone(), self.config.send_timeout())
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) => warn!(op = %op.short_hex(), to = %target.short_hex(), error = %e, "send failed"),
            }
        }
        debug!(op = %op.short_hex(), delivered, "op sent");
        Ok(delivered)
    }

    /// Send the stored op `op` to every receiver of `replica`.
    pub async fn replicate<S: ReplicaState>(&self, replica: &Replica<S>, op: Fingerprint) -> ReplicaResult<usize> {
        let receivers: Vec<Fingerprint> = replica.control().receivers().copied().collect();
        self.send_op(op, &receivers).await
    }

    /// Validate a received bundle and admit it to the local store.
    pub fn receive(&self, message: &Message) -> ReplicaResult<Arc<Object>> {
        let bundle = Bundle::from_bytes(&message.payload)?;
        let object = match self.store.load_with_pool(&bundle.root, &bundle.pool()) {
            Ok(object) => object,
            Err(e) => {
                if e.is_integrity_violation() {
                    warn!(from = %message.source.short_hex(), root = %bundle.root.short_hex(), error = %e, "rejected bundle");
                }
                return Err(e.into());
            }
        };
        self.store.save(&object)?;
        debug!(from = %message.source.short_hex(), root = %bundle.root.short_hex(), "admitted bundle");
        Ok(object)
    }
}
