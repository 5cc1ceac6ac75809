//! Event bus errors

use pgbus_core::{CoreError, EventId};
use pgbus_store::StoreError;
use thiserror::Error;

/// Errors that can occur in the event bus
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Failed to connect to the store: {0}")]
    Connection(#[source] StoreError),

    #[error("Event '{0}' already published")]
    DuplicateId(EventId),

    #[error("Failed to write checkpoint for '{subscription}': {source}")]
    CheckpointWrite {
        subscription: String,
        #[source]
        source: StoreError,
    },

    #[error("Store error: {0}")]
    Store(#[source] StoreError),

    #[error("Event bus not started")]
    NotStarted,

    #[error("Subscriber '{name}' failed: {reason}")]
    SubscriberFailed { name: String, reason: String },

    #[error("Subscription '{0}' is closed")]
    SubscriptionClosed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),
}

pub type BusResult<T> = Result<T, BusError>;

impl From<StoreError> for BusError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateId(id) => Self::DuplicateId(id),
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_store_error_maps_to_duplicate_id() {
        let err = BusError::from(StoreError::DuplicateId(EventId::from("a1")));
        assert!(matches!(err, BusError::DuplicateId(id) if id.as_str() == "a1"));
    }

    #[test]
    fn test_other_store_errors_wrap() {
        let err = BusError::from(StoreError::Closed);
        assert!(matches!(err, BusError::Store(StoreError::Closed)));
    }
}
