//! Repositories for the events and subscriptions tables

use crate::error::{StoreError, StoreResult};
use crate::postgres::schema::EventRow;
use pgbus_core::{Event, EventId, SubscriptionId};
use sqlx::PgConnection;

// ============================================================================
// Event Repository
// ============================================================================

/// Repository for the append-only `events` table
pub struct EventRepo;

impl EventRepo {
    /// Insert a new event; a colliding id yields `StoreError::DuplicateId`
    pub async fn insert(conn: &mut PgConnection, event: &Event) -> StoreResult<()> {
        sqlx::query("INSERT INTO events (id, type, data) VALUES ($1, $2, $3)")
            .bind(event.id.as_str())
            .bind(&event.event_type)
            .bind(event.data.as_ref())
            .execute(conn)
            .await
            .map_err(|e| StoreError::from_insert(e, &event.id))?;
        Ok(())
    }

    /// Broadcast an advisory wake signal on `channel`
    pub async fn notify(conn: &mut PgConnection, channel: &str, payload: &str) -> StoreResult<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Up to `limit` events after `after` (or from the start), ascending by id
    pub async fn fetch_after(
        conn: &mut PgConnection,
        after: Option<&EventId>,
        limit: u32,
    ) -> StoreResult<Vec<Event>> {
        let limit = i64::from(limit);
        let rows = match after {
            Some(after) => {
                sqlx::query_as::<_, EventRow>(
                    "SELECT id, type, data FROM events WHERE id > $1 ORDER BY id LIMIT $2",
                )
                .bind(after.as_str())
                .bind(limit)
                .fetch_all(conn)
                .await?
            }
            None => {
                sqlx::query_as::<_, EventRow>(
                    "SELECT id, type, data FROM events ORDER BY id LIMIT $1",
                )
                .bind(limit)
                .fetch_all(conn)
                .await?
            }
        };

        Ok(rows.into_iter().map(Event::from).collect())
    }
}

// ============================================================================
// Checkpoint Repository
// ============================================================================

/// Repository for the `subscriptions` checkpoint table
pub struct CheckpointRepo;

impl CheckpointRepo {
    /// Upsert the checkpoint; single-row atomic, last writer wins
    pub async fn save(
        conn: &mut PgConnection,
        subscription: &SubscriptionId,
        id: &EventId,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, checkpoint) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET checkpoint = EXCLUDED.checkpoint
            "#,
        )
        .bind(subscription.as_str())
        .bind(id.as_str())
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Load the checkpoint, `None` if the subscription never checkpointed
    pub async fn load(
        conn: &mut PgConnection,
        subscription: &SubscriptionId,
    ) -> StoreResult<Option<EventId>> {
        let checkpoint = sqlx::query_scalar::<_, String>(
            "SELECT checkpoint FROM subscriptions WHERE id = $1",
        )
        .bind(subscription.as_str())
        .fetch_optional(conn)
        .await?;

        Ok(checkpoint.map(EventId::new))
    }
}
