//! PgBus Store - durable backing for the event bus
//!
//! The bus needs four capabilities from its backing store:
//! - an append-only event log queryable by range after a given id
//! - a checkpoint map from subscription id to last delivered event id
//! - a session-scoped advisory lock keyed by an integer
//! - a best-effort wake channel reaching currently connected listeners
//!
//! [`EventBackend`] / [`SubscriberSession`] describe them; [`PgBackend`] is
//! the production implementation and [`MemoryBackend`] the in-process one
//! used to exercise the delivery loop without a database.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryBackend, MemorySession};
pub use postgres::{PgBackend, PgSession};
pub use traits::{EventBackend, SubscriberSession, Wake};
