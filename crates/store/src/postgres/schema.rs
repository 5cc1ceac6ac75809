//! Table definitions and row mapping
//!
//! Ids use the `C` collation so `ORDER BY id` and `id > $1` compare bytes,
//! the same order `EventId` uses in memory.

use crate::error::StoreResult;
use pgbus_core::{Event, EventId};
use serde_json::Value;
use sqlx::PgPool;

/// Row type for the `events` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    pub id: String,
    #[sqlx(rename = "type")]
    pub event_type: String,
    pub data: Option<Value>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Self {
            id: EventId::new(row.id),
            event_type: row.event_type,
            data: row.data,
        }
    }
}

/// Create tables if they do not exist yet
pub async fn init(pool: &PgPool) -> StoreResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id VARCHAR(64) COLLATE "C" PRIMARY KEY,
            type VARCHAR(64) NOT NULL,
            data JSONB
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subscriptions (
            id VARCHAR(64) PRIMARY KEY,
            checkpoint VARCHAR(64) COLLATE "C" NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_into_event() {
        let row = EventRow {
            id: "a1".to_string(),
            event_type: "t".to_string(),
            data: Some(json!({"k": "v"})),
        };

        let event = Event::from(row);
        assert_eq!(event.id, EventId::from("a1"));
        assert_eq!(event.event_type, "t");
        assert_eq!(event.data, Some(json!({"k": "v"})));
    }
}
