//! In-process waiter registry and notification dispatch.
//!
//! Each call that lost the lease race registers a one-shot sender under its
//! notification channel.  The dispatch task drains all waiters for a channel
//! when a message arrives; delivery to one waiter never affects another, and
//! removing an already-removed waiter is a no-op so cleanup can run from any
//! number of exit paths.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::payload::Envelope;

type WaiterMap = HashMap<String, HashMap<Uuid, oneshot::Sender<Envelope>>>;

/// Registry of pending waiters, owned by one `DistributedPromise` instance.
///
/// The inner mutex is never held across an await; pairing registry mutations
/// with SUBSCRIBE/UNSUBSCRIBE calls is the caller's job (see the subscription
/// gate in `wrapper`).
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    waiters: Mutex<WaiterMap>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter.  Returns `true` if this is the first waiter for the
    /// channel, in which case the caller must SUBSCRIBE.
    pub fn add(&self, channel: &str, id: Uuid, tx: oneshot::Sender<Envelope>) -> bool {
        let mut waiters = self.waiters.lock().expect("waiter registry poisoned");
        let entry = waiters.entry(channel.to_string()).or_default();
        let first = entry.is_empty();
        entry.insert(id, tx);
        first
    }

    /// Deregister a waiter.  Returns `true` if no waiters remain for the
    /// channel, in which case the caller should UNSUBSCRIBE.  Removing a
    /// waiter that was already delivered or removed is a no-op.
    pub fn remove(&self, channel: &str, id: Uuid) -> bool {
        let mut waiters = self.waiters.lock().expect("waiter registry poisoned");
        match waiters.get_mut(channel) {
            Some(entry) => {
                entry.remove(&id);
                if entry.is_empty() {
                    waiters.remove(channel);
                    true
                } else {
                    false
                }
            }
            None => true,
        }
    }

    /// Take every waiter registered for `channel`, removing the channel entry.
    pub fn drain(&self, channel: &str) -> Vec<oneshot::Sender<Envelope>> {
        let mut waiters = self.waiters.lock().expect("waiter registry poisoned");
        waiters
            .remove(channel)
            .map(|entry| entry.into_values().collect())
            .unwrap_or_default()
    }

    /// Take every waiter across all channels (shutdown path).  Dropping the
    /// returned senders rejects the corresponding calls.
    pub fn drain_all(&self) -> Vec<oneshot::Sender<Envelope>> {
        let mut waiters = self.waiters.lock().expect("waiter registry poisoned");
        std::mem::take(&mut *waiters)
            .into_values()
            .flat_map(|entry| entry.into_values())
            .collect()
    }

    /// Deliver `envelope` to every waiter on `channel`.  Returns the number
    /// of waiters woken.
    pub fn dispatch(&self, channel: &str, envelope: &Envelope) -> usize {
        let senders = self.drain(channel);
        let count = senders.len();
        for tx in senders {
            // A waiter that timed out between drain and send has dropped its
            // receiver; that is fine.
            let _ = tx.send(envelope.clone());
        }
        count
    }
}
