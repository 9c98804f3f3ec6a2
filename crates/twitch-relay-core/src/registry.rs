//! Registry of authenticated subscriber connections.
//!
//! The registry is the only shared mutable state in the relay. The subscriber
//! gateway registers and deregisters connections. The fan-out dispatcher
//! iterates it and evicts a connection whose outbound queue has overflowed.
//! Entries exist exactly while a connection is authenticated and keeping up.

use crate::ConnectionId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A serialized message queued for a subscriber.
///
/// Shared so that a broadcast serializes once and hands every subscriber the
/// same allocation.
pub type OutboundPayload = Arc<str>;

/// Sending half of a subscriber's outbound queue.
///
/// The receiving half is drained by the connection's writer task. Clones
/// share one shutdown signal, so any holder can ask the transport to close.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<OutboundPayload>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// Wrap an existing sender.
    pub fn new(sender: mpsc::Sender<OutboundPayload>) -> Self {
        Self {
            sender,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a handle together with the queue it feeds.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundPayload>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(sender), receiver)
    }

    /// Queue `payload` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Closed`] if the connection's writer is gone and
    /// [`DeliveryError::Full`] if its queue is at capacity.
    pub fn try_deliver(&self, payload: OutboundPayload) -> Result<(), DeliveryError> {
        self.sender.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
        })
    }

    /// Queue `payload`, waiting for capacity if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Closed`] if the connection's writer is gone.
    pub async fn deliver(&self, payload: OutboundPayload) -> Result<(), DeliveryError> {
        self.sender
            .send(payload)
            .await
            .map_err(|_| DeliveryError::Closed)
    }

    /// Ask the transport owning this connection to disconnect.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Resolves once [`close`](Self::close) has been called on any clone.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await;
    }
}

/// Why a payload could not be queued for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber connection is closed")]
    Closed,

    #[error("subscriber outbound queue is full")]
    Full,
}

/// Errors from registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Connection {id} is already registered")]
    AlreadyRegistered { id: ConnectionId },
}

/// Process-wide map from connection id to outbound channel.
///
/// Starts empty and is never persisted; subscribers reconnect and
/// re-authenticate after a restart.
///
/// # Examples
///
/// ```rust
/// use twitch_relay_core::registry::{ConnectionHandle, ConnectionRegistry};
///
/// let registry = ConnectionRegistry::new();
/// let (handle, _rx) = ConnectionHandle::channel(8);
///
/// let id = registry.next_id();
/// registry.insert(id, handle).unwrap();
/// assert_eq!(registry.len(), 1);
///
/// registry.remove(id);
/// assert!(registry.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    last_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh connection id.
    ///
    /// Ids start at 1, increase monotonically and are never handed out twice.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.last_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register an authenticated connection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] if `id` is present; the
    /// existing entry is left untouched.
    pub fn insert(&self, id: ConnectionId, handle: ConnectionHandle) -> Result<(), RegistryError> {
        let mut connections = self.lock();
        if connections.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered { id });
        }
        connections.insert(id, handle);
        Ok(())
    }

    /// Deregister a connection, returning its handle if it was present.
    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.lock().remove(&id)
    }

    /// Visit every registered connection.
    ///
    /// The registry is locked for the duration of the walk, so the visited set
    /// is exactly the set registered when the call started. `f` must not call
    /// back into the registry.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(ConnectionId, &ConnectionHandle),
    {
        for (id, handle) in self.lock().iter() {
            f(*id, handle);
        }
    }

    /// Returns `true` if `id` is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        // The map holds no invariants a panicking holder could break halfway.
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
