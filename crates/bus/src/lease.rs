//! Subscription lease: the exclusive, connection-bound right to advance a
//! subscription's checkpoint

use pgbus_core::{EventId, LockNumber};
use pgbus_store::{StoreResult, SubscriberSession};

/// Dedicated session holding a subscription's advisory lock, plus the
/// delivery cursor
///
/// Dropping a lease drops its session, which releases the lock with the
/// connection. [`Lease::release`] unlocks explicitly first.
pub(crate) struct Lease<S: SubscriberSession> {
    pub(crate) session: S,
    pub(crate) lock: LockNumber,
    pub(crate) cursor: Option<EventId>,
}

impl<S: SubscriberSession> Lease<S> {
    pub(crate) fn new(session: S, lock: LockNumber) -> Self {
        Self {
            session,
            lock,
            cursor: None,
        }
    }

    /// Id of the last checkpointed event, `None` before the first batch
    pub(crate) fn cursor(&self) -> Option<&EventId> {
        self.cursor.as_ref()
    }

    /// Unlock, then close the connection
    pub(crate) async fn release(mut self) -> StoreResult<()> {
        let unlocked = self.session.unlock(self.lock).await;
        let closed = self.session.close().await;
        unlocked?;
        closed
    }
}
