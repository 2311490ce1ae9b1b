//! Duplicate-processing guard
//!
//! Holds the ids of inbound messages currently being handled. `acquire` is an
//! atomic test-and-set returning a ticket; dropping the ticket releases the
//! id, so every exit path (including unwinding) gives it back.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::ids::MessageId;

#[derive(Debug, Default)]
pub struct ProcessingGuard {
    in_flight: Mutex<HashSet<MessageId>>,
}

impl ProcessingGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `id`. `None` if it is already being handled.
    pub fn acquire(self: &Arc<Self>, id: MessageId) -> Option<GuardTicket> {
        if self.in_flight.lock().insert(id) {
            Some(GuardTicket {
                guard: Arc::clone(self),
                id,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.in_flight.lock().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.lock().is_empty()
    }

    /// Returns false, and logs, when `id` was not held.
    fn release(&self, id: MessageId) -> bool {
        let removed = self.in_flight.lock().remove(&id);
        if !removed {
            error!(message_id = %id, "Invariant violated: released a message id that was not held");
        }
        removed
    }
}

/// Proof that one message id is held. Releases on drop.
#[derive(Debug)]
pub struct GuardTicket {
    guard: Arc<ProcessingGuard>,
    id: MessageId,
}

impl GuardTicket {
    pub fn id(&self) -> MessageId {
        self.id
    }
}

impl Drop for GuardTicket {
    fn drop(&mut self) {
        self.guard.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: MessageId = MessageId::new(7);

    #[test]
    fn test_acquire_is_exclusive() {
        let guard = ProcessingGuard::new();
        let ticket = guard.acquire(ID).unwrap();
        assert!(guard.acquire(ID).is_none());
        assert!(guard.contains(ID));
        assert_eq!(ticket.id(), ID);

        drop(ticket);
        assert!(guard.is_empty());
        assert!(guard.acquire(ID).is_some());
    }

    #[test]
    fn test_release_of_unknown_id_is_reported() {
        let guard = ProcessingGuard::new();
        assert!(!guard.release(MessageId::new(99)));
    }

    #[test]
    fn test_released_on_panic() {
        let guard = ProcessingGuard::new();
        let inner = guard.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _ticket = inner.acquire(ID).unwrap();
            panic!("handler blew up");
        }));
        assert!(result.is_err());
        assert!(!guard.contains(ID));
    }
}
