//! Session-scoped advisory locks
//!
//! `pg_try_advisory_lock` ties the lock to the connection that took it.
//! Closing (or losing) that connection releases it, so a crashed consumer
//! never blocks the others for longer than the server takes to notice.

use crate::error::StoreResult;
use pgbus_core::LockNumber;
use sqlx::PgConnection;
use tracing::debug;

pub struct LockCoordinator;

impl LockCoordinator {
    /// Non-blocking attempt; true if this connection now holds `lock`
    pub async fn try_acquire(conn: &mut PgConnection, lock: LockNumber) -> StoreResult<bool> {
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(lock.value())
            .fetch_one(conn)
            .await?;

        debug!(lock = %lock, acquired, "Advisory lock attempt");
        Ok(acquired)
    }

    /// Release `lock`; false if this connection did not hold it
    pub async fn release(conn: &mut PgConnection, lock: LockNumber) -> StoreResult<bool> {
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(lock.value())
            .fetch_one(conn)
            .await?;

        debug!(lock = %lock, released, "Advisory lock released");
        Ok(released)
    }
}
