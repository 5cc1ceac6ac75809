//! Backend capability traits

use crate::error::StoreResult;
use async_trait::async_trait;
use pgbus_core::{BusConfig, Event, EventId, LockNumber, SubscriptionId};
use std::time::Duration;

/// Outcome of an idle wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake {
    /// A publish was signalled; carries the advisory `<id>:<type>` payload
    Notified(String),
    /// No signal within the bounded wait
    TimedOut,
    /// The wake path lost its connection; signals may have been missed
    Interrupted,
}

/// Shared, stateless side of a store: schema, publishing, session factory
#[async_trait]
pub trait EventBackend: Send + Sync + 'static {
    type Session: SubscriberSession;

    /// Establish connectivity
    async fn open(config: &BusConfig) -> StoreResult<Self>
    where
        Self: Sized;

    /// Create the events and subscriptions tables if missing (idempotent)
    async fn init_schema(&self) -> StoreResult<()>;

    /// Durably insert `event`, then broadcast a wake signal
    ///
    /// Fails with `StoreError::DuplicateId` if the id is already stored.
    async fn append(&self, event: &Event) -> StoreResult<()>;

    /// Open a dedicated session: one session carries at most one lease
    async fn open_session(&self) -> StoreResult<Self::Session>;

    /// Release shared resources
    async fn close(&self);
}

/// A dedicated store connection owned by one subscription loop
///
/// Locks taken through a session live exactly as long as the session's
/// connection. Dropping the session releases them.
#[async_trait]
pub trait SubscriberSession: Send + 'static {
    /// Non-blocking attempt at the exclusive lock `lock`
    async fn try_lock(&mut self, lock: LockNumber) -> StoreResult<bool>;

    /// Explicitly release `lock`; returns whether it was held
    async fn unlock(&mut self, lock: LockNumber) -> StoreResult<bool>;

    /// Last delivered event id, `None` when never checkpointed
    async fn load_checkpoint(&mut self, subscription: &SubscriptionId)
        -> StoreResult<Option<EventId>>;

    /// Idempotent upsert of the checkpoint
    async fn save_checkpoint(
        &mut self,
        subscription: &SubscriptionId,
        id: &EventId,
    ) -> StoreResult<()>;

    /// Up to `limit` events with id strictly greater than `after`, ascending
    async fn fetch_after(&mut self, after: Option<&EventId>, limit: u32)
        -> StoreResult<Vec<Event>>;

    /// Single-shot wait for a publish signal, bounded by `max_wait`
    async fn wait_for_activity(&mut self, max_wait: Duration) -> StoreResult<Wake>;

    /// Gracefully close the underlying connection
    async fn close(self) -> StoreResult<()>
    where
        Self: Sized;
}
