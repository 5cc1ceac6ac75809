//! Store errors

use pgbus_core::EventId;
use thiserror::Error;

/// Errors raised by a backing store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Event '{0}' already exists")]
    DuplicateId(EventId),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Store is closed")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Map an insert failure, turning a primary key collision into `DuplicateId`
    pub fn from_insert(err: sqlx::Error, id: &EventId) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::DuplicateId(id.clone()),
            _ => Self::Database(err),
        }
    }

    /// Whether retrying on a fresh connection may succeed
    ///
    /// Connectivity failures, server shutdowns, serialization failures and
    /// deadlocks are transient. Schema, permission and constraint errors
    /// are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionLost(_) => true,
            Self::Database(err) => match err {
                sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db) => db.code().map_or(false, |code| {
                    code.starts_with("08")
                        || code.starts_with("57P")
                        || code == "40001"
                        || code == "40P01"
                }),
                _ => false,
            },
            Self::DuplicateId(_) | Self::Closed => false,
        }
    }
}
