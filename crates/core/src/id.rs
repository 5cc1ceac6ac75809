//! Identifiers: event ids, subscription ids and advisory lock numbers

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use uuid::Uuid;

/// Globally unique, lexically sortable event identifier
///
/// Ordering is bytewise on the underlying string, which is the order the
/// store uses for range scans. Ids produced by [`EventId::generate`] sort by
/// creation time (millisecond precision).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh time-ordered id (UUIDv7, 32 lowercase hex chars)
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Durable name under which one consumer lineage tracks its checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Create a subscription id, rejecting empty names
    pub fn new(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::EmptySubscriptionId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Advisory lock number all consumers of this subscription contend on
    pub fn lock_number(&self) -> LockNumber {
        LockNumber::for_subscription(self)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for SubscriptionId {
    type Error = CoreError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

/// Key of the session-scoped advisory lock guarding a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockNumber(i64);

impl LockNumber {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// First 8 bytes of SHA-1(subscription id), little-endian, signed.
    ///
    /// Must stay bit-for-bit stable: consumers deployed from other builds
    /// contend on the same number.
    pub fn for_subscription(id: &SubscriptionId) -> Self {
        let digest = Sha1::digest(id.as_str().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self(i64::from_le_bytes(prefix))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_number_known_values() {
        let id = SubscriptionId::new("test_client").unwrap();
        assert_eq!(id.lock_number().value(), -2314597345067834805);

        let id = SubscriptionId::new("orders").unwrap();
        assert_eq!(id.lock_number().value(), 7394418102366132374);
    }

    #[test]
    fn test_lock_number_is_deterministic() {
        let a = SubscriptionId::new("billing").unwrap();
        let b = SubscriptionId::new("billing").unwrap();
        assert_eq!(a.lock_number(), b.lock_number());
        assert_ne!(
            a.lock_number(),
            SubscriptionId::new("billing2").unwrap().lock_number()
        );
    }

    #[test]
    fn test_empty_subscription_id_rejected() {
        assert!(matches!(
            SubscriptionId::new(""),
            Err(CoreError::EmptySubscriptionId)
        ));
    }

    #[test]
    fn test_event_id_ordering_is_bytewise() {
        let mut ids = vec![EventId::from("a2"), EventId::from("B1"), EventId::from("a10")];
        ids.sort();
        let sorted: Vec<&str> = ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(sorted, vec!["B1", "a10", "a2"]);
    }

    #[test]
    fn test_generated_ids_sort_by_creation() {
        let first = EventId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = EventId::generate();

        assert_eq!(first.as_str().len(), 32);
        assert!(first < second);
    }
}
