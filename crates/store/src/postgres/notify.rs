//! Wake-on-notify waiting

use crate::error::StoreResult;
use crate::traits::Wake;
use sqlx::postgres::{PgConnectOptions, PgListener, PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::debug;

/// Single-shot waiter on a notification channel
///
/// Every wait LISTENs, suspends until the first signal (or `max_wait`), then
/// UNLISTENs. Signals sent while nobody waits are dropped by the server;
/// the caller re-fetches after every wait and the bounded wait caps how
/// long a missed signal can stall delivery.
///
/// The listener sits on a private single-connection pool, never on the
/// publishing pool, so idle subscribers do not starve `publish`.
pub struct NotificationWaiter {
    pool: PgPool,
    listener: PgListener,
}

impl NotificationWaiter {
    pub async fn connect(options: &PgConnectOptions) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy_with(options.clone());
        let listener = PgListener::connect_with(&pool).await?;
        Ok(Self { pool, listener })
    }

    pub async fn wait(&mut self, channel: &str, max_wait: Duration) -> StoreResult<Wake> {
        self.listener.listen(channel).await?;

        let outcome = tokio::time::timeout(max_wait, self.listener.try_recv()).await;
        let deregistered = self.listener.unlisten(channel).await;

        let wake = match outcome {
            Err(_) => Wake::TimedOut,
            Ok(Ok(Some(notification))) => Wake::Notified(notification.payload().to_string()),
            // The listener reconnects on its next use
            Ok(Ok(None)) => Wake::Interrupted,
            Ok(Err(e)) => return Err(e.into()),
        };
        deregistered?;

        debug!(channel, ?wake, "Wait resolved");
        Ok(wake)
    }

    /// Drop the listener and close its connection
    pub async fn close(self) {
        drop(self.listener);
        self.pool.close().await;
    }
}
