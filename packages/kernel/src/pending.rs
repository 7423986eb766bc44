//! Reply slots for requests awaiting a correlated response.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bus_core::{Message, MessageId};
use tokio::sync::oneshot;

use crate::error::KernelError;

/// Table of outstanding requests keyed by the request's message id.
///
/// Each entry is resolved at most once: resolving removes it, so a second
/// `complete` for the same id finds nothing and is dropped.
#[derive(Debug, Default)]
pub struct PendingRequests {
    slots: Mutex<HashMap<MessageId, Slot>>,
    next_token: AtomicU64,
}

#[derive(Debug)]
struct Slot {
    token: u64,
    tx: oneshot::Sender<Message>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<MessageId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a reply slot for `id`.
    ///
    /// The returned guard removes the entry when dropped, so the table never
    /// outlives the waiting caller. An id that already has a waiting caller
    /// is rejected and the existing slot is left alone.
    pub fn register(
        self: &Arc<Self>,
        id: MessageId,
    ) -> Result<(PendingGuard, oneshot::Receiver<Message>), KernelError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        match self.slots().entry(id) {
            Entry::Occupied(_) => return Err(KernelError::DuplicateRequest(id)),
            Entry::Vacant(entry) => {
                entry.insert(Slot { token, tx });
            }
        }

        let guard = PendingGuard {
            table: Arc::clone(self),
            id,
            token,
        };
        Ok((guard, rx))
    }

    /// Resolve the slot for `id` with `response`.
    ///
    /// Returns `false` when no caller is waiting any more.
    pub fn complete(&self, id: MessageId, response: Message) -> bool {
        let Some(slot) = self.slots().remove(&id) else {
            tracing::debug!("Dropping reply for {}: no pending request", id);
            return false;
        };
        slot.tx.send(response).is_ok()
    }

    /// Check whether a caller is still waiting on `id`.
    pub fn contains(&self, id: MessageId) -> bool {
        self.slots().contains_key(&id)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every outstanding slot; waiters observe a closed channel.
    pub fn clear(&self) {
        self.slots().clear();
    }

    /// Remove the slot for `id` only if it still belongs to `token`.
    fn release(&self, id: MessageId, token: u64) {
        let mut slots = self.slots();
        if slots.get(&id).is_some_and(|slot| slot.token == token) {
            slots.remove(&id);
        }
    }
}

/// Removes a pending entry when the waiting caller returns or is dropped.
#[derive(Debug)]
pub struct PendingGuard {
    table: Arc<PendingRequests>,
    id: MessageId,
    token: u64,
}

impl PendingGuard {
    pub fn id(&self) -> MessageId {
        self.id
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.release(self.id, self.token);
    }
}
