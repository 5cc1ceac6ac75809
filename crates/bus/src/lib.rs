//! PgBus Event Bus - durable publish/subscribe without a broker
//!
//! Producers append events to the store; consumers subscribe under a
//! durable subscription id and receive events in id order, resuming from
//! the last checkpoint.
//!
//! # Delivery protocol
//! - One lease per subscription id: an advisory lock held on a dedicated
//!   connection. Competing consumers wait in `AcquiringLock`.
//! - Events are fetched in batches after the checkpoint and handed out one
//!   at a time; the checkpoint advances once the whole batch was consumed.
//! - Between batches the loop sleeps on the wake channel, bounded by the
//!   idle poll interval.
//!
//! Delivery is at-least-once: consumers must tolerate a redelivered batch.

pub mod bus;
pub mod error;
mod lease;
pub mod subscriber;
pub mod subscription;

pub use bus::{EventBus, PgEventBus};
pub use error::{BusError, BusResult};
pub use subscriber::EventSubscriber;
pub use subscription::{DeliveryState, Subscription};

pub use pgbus_core::{BusConfig, Event, EventId, SubscriptionId};
