use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::wire::{Envelope, EventType};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Registry of open push connections. Each connection is represented by the
/// sending half of its outbound queue; the socket task owns the receiver.
pub struct BroadcastHub {
    connections: Mutex<HashMap<ConnectionId, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn register(&self, sender: mpsc::Sender<String>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, sender);
        debug!(connection = %id, "push connection registered");
        id
    }

    /// Registers a fresh bounded queue and hands back its receiving half.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        (self.register(tx), rx)
    }

    pub fn unregister(&self, id: ConnectionId) {
        if self.lock().remove(&id).is_some() {
            debug!(connection = %id, "push connection unregistered");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    /// Serializes `{type, data}` once and enqueues it on every open
    /// connection. Returns how many connections accepted the message.
    pub fn publish<T: Serialize + ?Sized>(&self, event_type: EventType, payload: &T) -> usize {
        let text = match serde_json::to_value(payload)
            .and_then(|data| Envelope::new(event_type, data).to_text())
        {
            Ok(text) => text,
            Err(err) => {
                warn!(event_type = %event_type, error = %err, "failed to serialize push payload");
                return 0;
            }
        };

        let mut connections = self.lock();
        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, sender) in connections.iter() {
            match sender.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(connection = %id, event_type = %event_type, "push queue full; dropping message");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in &closed {
            connections.remove(id);
        }
        drop(connections);

        if !closed.is_empty() {
            debug!(removed = closed.len(), "pruned closed push connections");
        }
        debug!(event_type = %event_type, delivered, "published push event");
        delivered
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, mpsc::Sender<String>>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
