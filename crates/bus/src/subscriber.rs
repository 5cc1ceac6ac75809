//! Event subscriber trait for callback-driven delivery

use crate::error::BusError;
use async_trait::async_trait;
use pgbus_core::Event;

/// Trait for event subscribers
///
/// Delivery is at-least-once: after a crash or a lost lease the last batch
/// may be handed out again, so handlers should be idempotent or dedupe by
/// event id.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Get the subscriber name (for logging)
    fn name(&self) -> &str;

    /// Handle one event
    ///
    /// Returning an error stops delivery; the current batch is not
    /// checkpointed and will be redelivered on the next run.
    async fn handle(&self, event: &Event) -> Result<(), BusError>;
}
