//! Event bus façade
//!
//! Owns the backend: `start` connects and ensures the schema, `publish`
//! appends through the shared pool, `subscribe` hands out subscriptions
//! that each open their own dedicated connection.

use crate::error::{BusError, BusResult};
use crate::subscriber::EventSubscriber;
use crate::subscription::Subscription;
use pgbus_core::{BusConfig, Event, SubscriptionId};
use pgbus_store::{EventBackend, PgBackend};
use std::sync::Arc;
use tracing::{info, warn};

/// Event bus on PostgreSQL
pub type PgEventBus = EventBus<PgBackend>;

/// Publish/subscribe façade over a backend
pub struct EventBus<B: EventBackend> {
    config: BusConfig,
    backend: Option<Arc<B>>,
    started: bool,
}

impl<B: EventBackend> EventBus<B> {
    /// Create a bus that connects on [`EventBus::start`]
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            backend: None,
            started: false,
        }
    }

    /// Create a bus over an already connected backend
    ///
    /// `start` still has to be called to ensure the schema.
    pub fn with_backend(config: BusConfig, backend: Arc<B>) -> Self {
        Self {
            config,
            backend: Some(backend),
            started: false,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Connect to the store and create missing tables
    ///
    /// Calling `start` on a started bus is a no-op.
    pub async fn start(&mut self) -> BusResult<()> {
        if self.started {
            return Ok(());
        }
        self.config.validate()?;

        let backend = match &self.backend {
            Some(backend) => Arc::clone(backend),
            None => {
                let backend = Arc::new(B::open(&self.config).await.map_err(BusError::Connection)?);
                self.backend = Some(Arc::clone(&backend));
                backend
            }
        };
        backend.init_schema().await?;

        self.started = true;
        info!("Event bus started");
        Ok(())
    }

    /// Release the backend; idempotent and safe on a bus never started
    ///
    /// Close subscriptions first: sessions still open keep their own
    /// connections but lose the shared pool.
    pub async fn stop(&mut self) -> BusResult<()> {
        if let Some(backend) = self.backend.take() {
            backend.close().await;
        }
        if self.started {
            self.started = false;
            info!("Event bus stopped");
        }
        Ok(())
    }

    /// Durably append `event` and wake idle subscribers
    pub async fn publish(&self, event: &Event) -> BusResult<()> {
        self.backend()?.append(event).await?;
        info!(event_id = %event.id, event_type = %event.event_type, "Published");
        Ok(())
    }

    /// Subscription for `subscription_id`
    ///
    /// No connection is opened until the first `next()`. Dropping or closing
    /// the subscription releases its connection and lease.
    pub fn subscribe(&self, subscription_id: &str) -> BusResult<Subscription<B>> {
        let backend = Arc::clone(self.backend()?);
        let id = SubscriptionId::new(subscription_id)?;
        Ok(Subscription::new(backend, id, &self.config))
    }

    /// Subscribe, deliver to `subscriber` until it fails, then release
    pub async fn consume<S>(&self, subscription_id: &str, subscriber: &S) -> BusResult<()>
    where
        S: EventSubscriber + ?Sized,
    {
        let mut subscription = self.subscribe(subscription_id)?;
        let result = subscription.run(subscriber).await;
        if let Err(e) = subscription.close().await {
            warn!(subscription = subscription_id, error = %e, "Failed to release lease");
        }
        result
    }

    fn backend(&self) -> BusResult<&Arc<B>> {
        match &self.backend {
            Some(backend) if self.started => Ok(backend),
            _ => Err(BusError::NotStarted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgbus_store::MemoryBackend;

    fn memory_bus() -> EventBus<MemoryBackend> {
        EventBus::new(BusConfig::default())
    }

    #[tokio::test]
    async fn test_publish_requires_start() {
        let bus = memory_bus();
        let result = bus.publish(&Event::new("a1", "t")).await;
        assert!(matches!(result, Err(BusError::NotStarted)));
        assert!(matches!(bus.subscribe("s"), Err(BusError::NotStarted)));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut bus = memory_bus();
        bus.start().await.unwrap();
        bus.start().await.unwrap();
        assert!(bus.is_started());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_safe_when_never_started() {
        let mut bus = memory_bus();
        bus.stop().await.unwrap();

        bus.start().await.unwrap();
        bus.stop().await.unwrap();
        bus.stop().await.unwrap();
        assert!(!bus.is_started());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let mut bus: EventBus<MemoryBackend> = EventBus::new(BusConfig {
            batch_size: 0,
            ..BusConfig::default()
        });
        assert!(matches!(bus.start().await, Err(BusError::Config(_))));
    }

    #[tokio::test]
    async fn test_duplicate_publish_fails() {
        let mut bus = memory_bus();
        bus.start().await.unwrap();

        bus.publish(&Event::new("a1", "t")).await.unwrap();
        let result = bus.publish(&Event::new("a1", "t")).await;
        assert!(matches!(result, Err(BusError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_subscribe_rejects_empty_id() {
        let mut bus = memory_bus();
        bus.start().await.unwrap();
        assert!(matches!(bus.subscribe(""), Err(BusError::Config(_))));
    }
}
