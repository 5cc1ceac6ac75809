//! Subscription delivery loop
//!
//! ```text
//! AcquiringLock -> Resuming -> Fetching -> Delivering -> Checkpointing -> Fetching
//!                                 |  ^
//!                          (empty)v  | (wake / timeout)
//!                               IdleWaiting
//! ```
//!
//! Every await is a cancellation point. Dropping a `next()` future leaves
//! the state machine where it was, so the following call resumes the same
//! step; dropping the subscription drops its connection and with it the
//! lease.

use crate::error::{BusError, BusResult};
use crate::lease::Lease;
use crate::subscriber::EventSubscriber;
use futures::Stream;
use pgbus_core::{BusConfig, Event, EventId, LockNumber, SubscriptionId};
use pgbus_store::{EventBackend, StoreError, StoreResult, SubscriberSession, Wake};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where the delivery loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Waiting for the subscription's advisory lock
    AcquiringLock,
    /// Lock held; loading the checkpoint
    Resuming,
    /// Reading the next batch after the cursor
    Fetching,
    /// Handing the current batch out one event at a time
    Delivering,
    /// Whole batch consumed; persisting its last id
    Checkpointing,
    /// Nothing new; suspended on the wake channel
    IdleWaiting,
    /// Ended by a fatal error or by `close`
    Closed,
}

/// An ordered, resumable, mutually exclusive stream of events for one
/// subscription id
pub struct Subscription<B: EventBackend> {
    backend: Arc<B>,
    id: SubscriptionId,
    lock: LockNumber,
    batch_size: u32,
    retry_interval: Duration,
    idle_interval: Duration,
    state: DeliveryState,
    /// Session opened while the lock is still contended
    pending: Option<B::Session>,
    lease: Option<Lease<B::Session>>,
    batch: VecDeque<Event>,
    batch_last: Option<EventId>,
}

impl<B: EventBackend> Subscription<B> {
    pub(crate) fn new(backend: Arc<B>, id: SubscriptionId, config: &BusConfig) -> Self {
        let lock = id.lock_number();
        Self {
            backend,
            id,
            lock,
            batch_size: config.batch_size,
            retry_interval: config.lock_retry_interval(),
            idle_interval: config.idle_poll_interval(),
            state: DeliveryState::AcquiringLock,
            pending: None,
            lease: None,
            batch: VecDeque::new(),
            batch_last: None,
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn lock_number(&self) -> LockNumber {
        self.lock
    }

    /// Whether this subscription currently holds its lease
    pub fn holds_lease(&self) -> bool {
        self.lease.is_some()
    }

    /// Last checkpointed event id under the current lease
    pub fn cursor(&self) -> Option<&EventId> {
        self.lease.as_ref().and_then(|lease| lease.cursor())
    }

    /// Next event, in ascending id order
    ///
    /// Calling `next` again after the last event of a batch is what marks
    /// the batch as delivered and advances the checkpoint. Transient store
    /// failures are retried behind the scenes; only fatal errors surface,
    /// after which the subscription is closed.
    pub async fn next(&mut self) -> BusResult<Event> {
        loop {
            if self.state == DeliveryState::Closed {
                return Err(BusError::SubscriptionClosed(self.id.to_string()));
            }

            match self.step().await {
                Ok(Some(event)) => return Ok(event),
                Ok(None) => {}
                Err(err) if err.is_transient() => self.recover(err).await,
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    /// Deliver every event to `subscriber` until it fails or the store does
    ///
    /// A subscriber error rewinds to the last checkpoint, so the failed batch
    /// is redelivered on the next run.
    pub async fn run<S>(&mut self, subscriber: &S) -> BusResult<()>
    where
        S: EventSubscriber + ?Sized,
    {
        loop {
            let event = self.next().await?;
            if let Err(e) = subscriber.handle(&event).await {
                error!(
                    subscription = %self.id,
                    subscriber = subscriber.name(),
                    event_id = %event.id,
                    error = %e,
                    "Subscriber failed"
                );
                self.rewind();
                return Err(BusError::SubscriberFailed {
                    name: subscriber.name().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Discard the rest of the current batch without checkpointing it
    ///
    /// The next call to [`Subscription::next`] starts again from the last
    /// saved checkpoint.
    pub fn rewind(&mut self) {
        self.batch.clear();
        self.batch_last = None;
        if self.lease.is_some() {
            self.state = DeliveryState::Resuming;
        }
    }

    /// Turn the subscription into a stream; it ends after the first error
    pub fn into_stream(self) -> impl Stream<Item = BusResult<Event>> + Send {
        futures::stream::unfold(Some(self), |subscription| async move {
            let mut subscription = subscription?;
            match subscription.next().await {
                Ok(event) => Some((Ok(event), Some(subscription))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Release the lease explicitly and close the connection
    pub async fn close(mut self) -> BusResult<()> {
        self.state = DeliveryState::Closed;
        if let Some(lease) = self.lease.take() {
            lease.release().await?;
            info!(subscription = %self.id, "Lease released");
        }
        if let Some(session) = self.pending.take() {
            session.close().await?;
        }
        Ok(())
    }

    async fn step(&mut self) -> StoreResult<Option<Event>> {
        if self.state == DeliveryState::AcquiringLock {
            if self.try_acquire().await? {
                self.state = DeliveryState::Resuming;
            } else {
                tokio::time::sleep(self.retry_interval).await;
            }
            return Ok(None);
        }

        let Some(lease) = self.lease.as_mut() else {
            self.state = DeliveryState::AcquiringLock;
            return Ok(None);
        };

        match self.state {
            DeliveryState::Resuming => {
                lease.cursor = lease.session.load_checkpoint(&self.id).await?;
                info!(
                    subscription = %self.id,
                    checkpoint = ?lease.cursor.as_ref().map(EventId::as_str),
                    "Resuming delivery"
                );
                self.state = DeliveryState::Fetching;
            }
            DeliveryState::Fetching => {
                let events = lease
                    .session
                    .fetch_after(lease.cursor.as_ref(), self.batch_size)
                    .await?;
                debug!(subscription = %self.id, fetched = events.len(), "Fetched batch");

                match events.last() {
                    Some(last) => {
                        self.batch_last = Some(last.id.clone());
                        self.batch = events.into();
                        self.state = DeliveryState::Delivering;
                    }
                    None => self.state = DeliveryState::IdleWaiting,
                }
            }
            DeliveryState::Delivering => match self.batch.pop_front() {
                Some(event) => {
                    if self.batch.is_empty() {
                        self.state = DeliveryState::Checkpointing;
                    }
                    return Ok(Some(event));
                }
                None => self.state = DeliveryState::Checkpointing,
            },
            DeliveryState::Checkpointing => {
                if let Some(last) = self.batch_last.take() {
                    if let Err(e) = lease.session.save_checkpoint(&self.id, &last).await {
                        self.batch_last = Some(last);
                        return Err(e);
                    }
                    debug!(subscription = %self.id, checkpoint = %last, "Checkpoint saved");
                    lease.cursor = Some(last);
                }
                self.state = DeliveryState::Fetching;
            }
            DeliveryState::IdleWaiting => {
                let wake = lease.session.wait_for_activity(self.idle_interval).await?;
                match wake {
                    Wake::Notified(payload) => {
                        debug!(subscription = %self.id, payload = %payload, "Woken by publish")
                    }
                    Wake::TimedOut => debug!(subscription = %self.id, "Idle poll"),
                    Wake::Interrupted => {
                        warn!(subscription = %self.id, "Wake channel interrupted, re-polling")
                    }
                }
                self.state = DeliveryState::Fetching;
            }
            DeliveryState::AcquiringLock | DeliveryState::Closed => {}
        }
        Ok(None)
    }

    async fn try_acquire(&mut self) -> StoreResult<bool> {
        if self.pending.is_none() {
            let session = self.backend.open_session().await?;
            self.pending = Some(session);
        }
        let Some(session) = self.pending.as_mut() else {
            return Ok(false);
        };

        debug!(subscription = %self.id, lock = %self.lock, "Trying to acquire lock");
        if !session.try_lock(self.lock).await? {
            debug!(subscription = %self.id, "Lock held by another consumer");
            return Ok(false);
        }

        if let Some(session) = self.pending.take() {
            self.lease = Some(Lease::new(session, self.lock));
        }
        info!(subscription = %self.id, lock = %self.lock, "Lease acquired");
        Ok(true)
    }

    /// Drop the connection (and the lease with it), back off, start over
    ///
    /// An uncheckpointed batch is redelivered after the lease is regained.
    async fn recover(&mut self, err: StoreError) {
        warn!(
            subscription = %self.id,
            state = ?self.state,
            error = %err,
            "Transient store error, re-acquiring lease"
        );
        self.lease = None;
        self.pending = None;
        self.batch.clear();
        self.batch_last = None;
        self.state = DeliveryState::AcquiringLock;
        tokio::time::sleep(self.retry_interval).await;
    }

    fn fail(&mut self, err: StoreError) -> BusError {
        let failed_in = self.state;
        error!(subscription = %self.id, state = ?failed_in, error = %err, "Delivery stopped");

        self.state = DeliveryState::Closed;
        self.lease = None;
        self.pending = None;
        self.batch.clear();
        self.batch_last = None;

        if failed_in == DeliveryState::Checkpointing {
            BusError::CheckpointWrite {
                subscription: self.id.to_string(),
                source: err,
            }
        } else {
            BusError::from(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgbus_store::MemoryBackend;

    fn config() -> BusConfig {
        BusConfig {
            batch_size: 2,
            ..BusConfig::default()
        }
    }

    fn subscription(backend: &MemoryBackend, name: &str) -> Subscription<MemoryBackend> {
        Subscription::new(
            Arc::new(backend.clone()),
            SubscriptionId::new(name).unwrap(),
            &config(),
        )
    }

    #[tokio::test]
    async fn test_state_walk_through_one_batch() {
        let backend = MemoryBackend::new();
        backend.append(&Event::new("a1", "t")).await.unwrap();
        backend.append(&Event::new("a2", "t")).await.unwrap();

        let mut sub = subscription(&backend, "walk");
        assert_eq!(sub.state(), DeliveryState::AcquiringLock);

        assert_eq!(sub.next().await.unwrap().id.as_str(), "a1");
        assert_eq!(sub.state(), DeliveryState::Delivering);
        assert!(sub.holds_lease());

        assert_eq!(sub.next().await.unwrap().id.as_str(), "a2");
        assert_eq!(sub.state(), DeliveryState::Checkpointing);
        // Not yet acknowledged by asking for more
        assert_eq!(backend.checkpoint(sub.id()), None);
    }

    #[tokio::test]
    async fn test_checkpoint_written_when_consumer_returns() {
        let backend = MemoryBackend::new();
        backend.append(&Event::new("a1", "t")).await.unwrap();
        backend.append(&Event::new("a2", "t")).await.unwrap();
        backend.append(&Event::new("a3", "t")).await.unwrap();

        let mut sub = subscription(&backend, "ack");
        sub.next().await.unwrap();
        sub.next().await.unwrap();

        assert_eq!(sub.next().await.unwrap().id.as_str(), "a3");
        assert_eq!(backend.checkpoint(sub.id()), Some(EventId::from("a2")));
        assert_eq!(sub.cursor(), Some(&EventId::from("a2")));
    }

    #[tokio::test]
    async fn test_rewind_discards_uncheckpointed_batch() {
        let backend = MemoryBackend::new();
        backend.append(&Event::new("a1", "t")).await.unwrap();
        backend.append(&Event::new("a2", "t")).await.unwrap();

        let mut sub = subscription(&backend, "rewind");
        sub.next().await.unwrap();
        sub.next().await.unwrap();

        sub.rewind();
        assert_eq!(sub.state(), DeliveryState::Resuming);
        assert_eq!(sub.next().await.unwrap().id.as_str(), "a1");
        assert_eq!(backend.checkpoint(sub.id()), None);
    }

    #[tokio::test]
    async fn test_fatal_error_closes_subscription() {
        let backend = MemoryBackend::new();
        backend.close().await;

        let mut sub = subscription(&backend, "fatal");
        let err = sub.next().await.unwrap_err();
        assert!(matches!(err, BusError::Store(StoreError::Closed)));
        assert_eq!(sub.state(), DeliveryState::Closed);
        assert!(matches!(
            sub.next().await,
            Err(BusError::SubscriptionClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_close_releases_lease() {
        let backend = MemoryBackend::new();
        backend.append(&Event::new("a1", "t")).await.unwrap();

        let mut sub = subscription(&backend, "close");
        sub.next().await.unwrap();
        let lock = sub.lock_number();
        assert!(backend.lock_holder(lock).is_some());

        sub.close().await.unwrap();
        assert_eq!(backend.lock_holder(lock), None);
    }
}
