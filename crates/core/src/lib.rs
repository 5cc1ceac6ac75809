//! PgBus Core - Domain types
//!
//! This crate contains the fundamental types shared by the store, the
//! delivery loop and the CLI:
//! - `Event`: the immutable record exchanged through the bus
//! - `EventId` / `SubscriptionId` / `LockNumber`: identifiers
//! - `BusConfig`: tunables for batching, backoff and idle polling

pub mod config;
pub mod error;
pub mod event;
pub mod id;

pub use config::BusConfig;
pub use error::{CoreError, CoreResult};
pub use event::Event;
pub use id::{EventId, LockNumber, SubscriptionId};
