//! PostgreSQL backend
//!
//! Publishing goes through a shared pool. Each subscriber session owns a
//! dedicated `PgConnection` for its advisory lock, checkpoint and fetch
//! queries, plus a `PgListener` on a connection of its own for the wake
//! channel; neither is drawn from the publishing pool. The lock connection
//! is never reconnected behind the caller's back: if it drops, the next
//! query fails and the loop knows its lease is gone.

pub mod lock;
pub mod notify;
pub mod repos;
pub mod schema;

pub use lock::LockCoordinator;
pub use notify::NotificationWaiter;
pub use repos::{CheckpointRepo, EventRepo};
pub use schema::EventRow;

use crate::error::StoreResult;
use crate::traits::{EventBackend, SubscriberSession, Wake};
use async_trait::async_trait;
use pgbus_core::{BusConfig, Event, EventId, LockNumber, SubscriptionId};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Connection, PgConnection};
use std::time::Duration;
use tracing::{debug, info};

/// Production backend on PostgreSQL
pub struct PgBackend {
    pool: PgPool,
    options: PgConnectOptions,
    channel: String,
}

#[async_trait]
impl EventBackend for PgBackend {
    type Session = PgSession;

    async fn open(config: &BusConfig) -> StoreResult<Self> {
        let options: PgConnectOptions = config.database_url.parse()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options.clone())
            .await?;

        info!("Connected to PostgreSQL");

        Ok(Self {
            pool,
            options,
            channel: config.channel.clone(),
        })
    }

    async fn init_schema(&self) -> StoreResult<()> {
        schema::init(&self.pool).await
    }

    async fn append(&self, event: &Event) -> StoreResult<()> {
        // NOTIFY inside the transaction is only delivered on commit
        let mut tx = self.pool.begin().await?;
        EventRepo::insert(&mut *tx, event).await?;
        EventRepo::notify(&mut *tx, &self.channel, &event.wake_payload()).await?;
        tx.commit().await?;

        debug!(event_id = %event.id, event_type = %event.event_type, "Event appended");
        Ok(())
    }

    async fn open_session(&self) -> StoreResult<PgSession> {
        let conn = PgConnection::connect_with(&self.options).await?;
        let waiter = NotificationWaiter::connect(&self.options).await?;

        Ok(PgSession {
            conn,
            waiter,
            channel: self.channel.clone(),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// One subscription's dedicated connection pair
pub struct PgSession {
    conn: PgConnection,
    waiter: NotificationWaiter,
    channel: String,
}

#[async_trait]
impl SubscriberSession for PgSession {
    async fn try_lock(&mut self, lock: LockNumber) -> StoreResult<bool> {
        LockCoordinator::try_acquire(&mut self.conn, lock).await
    }

    async fn unlock(&mut self, lock: LockNumber) -> StoreResult<bool> {
        LockCoordinator::release(&mut self.conn, lock).await
    }

    async fn load_checkpoint(
        &mut self,
        subscription: &SubscriptionId,
    ) -> StoreResult<Option<EventId>> {
        CheckpointRepo::load(&mut self.conn, subscription).await
    }

    async fn save_checkpoint(
        &mut self,
        subscription: &SubscriptionId,
        id: &EventId,
    ) -> StoreResult<()> {
        CheckpointRepo::save(&mut self.conn, subscription, id).await
    }

    async fn fetch_after(
        &mut self,
        after: Option<&EventId>,
        limit: u32,
    ) -> StoreResult<Vec<Event>> {
        EventRepo::fetch_after(&mut self.conn, after, limit).await
    }

    async fn wait_for_activity(&mut self, max_wait: Duration) -> StoreResult<Wake> {
        self.waiter.wait(&self.channel, max_wait).await
    }

    async fn close(self) -> StoreResult<()> {
        self.waiter.close().await;
        self.conn.close().await?;
        Ok(())
    }
}
