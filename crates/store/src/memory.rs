//! In-memory backend
//!
//! Implements the same capabilities as the PostgreSQL backend inside the
//! process: an ordered event log, a checkpoint map, a lock table owned by
//! sessions and a broadcast wake channel. Cloning the backend shares state,
//! so several "consumer processes" can contend on one instance.

use crate::error::{StoreError, StoreResult};
use crate::traits::{EventBackend, SubscriberSession, Wake};
use async_trait::async_trait;
use pgbus_core::{BusConfig, Event, EventId, LockNumber, SubscriptionId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const WAKE_CAPACITY: usize = 64;

/// Shared in-memory store
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<MemoryState>,
}

struct MemoryState {
    events: Mutex<BTreeMap<EventId, Event>>,
    checkpoints: Mutex<HashMap<SubscriptionId, EventId>>,
    /// lock number -> owning session
    locks: Mutex<HashMap<LockNumber, u64>>,
    live_sessions: Mutex<HashSet<u64>>,
    next_session: AtomicU64,
    wake: broadcast::Sender<String>,
    closed: AtomicBool,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBackend {
    /// Create an empty store
    pub fn new() -> Self {
        let (wake, _) = broadcast::channel(WAKE_CAPACITY);
        Self {
            state: Arc::new(MemoryState {
                events: Mutex::new(BTreeMap::new()),
                checkpoints: Mutex::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
                live_sessions: Mutex::new(HashSet::new()),
                next_session: AtomicU64::new(1),
                wake,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Number of stored events
    pub fn event_count(&self) -> usize {
        guard(&self.state.events).len()
    }

    /// Current checkpoint of a subscription
    pub fn checkpoint(&self, subscription: &SubscriptionId) -> Option<EventId> {
        guard(&self.state.checkpoints).get(subscription).cloned()
    }

    /// Session currently holding `lock`
    pub fn lock_holder(&self, lock: LockNumber) -> Option<u64> {
        guard(&self.state.locks).get(&lock).copied()
    }

    /// Sessions currently suspended in `wait_for_activity`
    pub fn waiting_sessions(&self) -> usize {
        self.state.wake.receiver_count()
    }

    /// Simulate the server dropping every open session
    ///
    /// All locks are released and every later call on an existing session
    /// fails with `StoreError::ConnectionLost`.
    pub fn disconnect_all(&self) {
        guard(&self.state.live_sessions).clear();
        guard(&self.state.locks).clear();
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBackend for MemoryBackend {
    type Session = MemorySession;

    async fn open(_config: &BusConfig) -> StoreResult<Self> {
        Ok(Self::new())
    }

    async fn init_schema(&self) -> StoreResult<()> {
        self.ensure_open()
    }

    async fn append(&self, event: &Event) -> StoreResult<()> {
        self.ensure_open()?;
        {
            let mut events = guard(&self.state.events);
            if events.contains_key(&event.id) {
                return Err(StoreError::DuplicateId(event.id.clone()));
            }
            events.insert(event.id.clone(), event.clone());
        }

        // No receivers just means nobody is idle right now
        let _ = self.state.wake.send(event.wake_payload());
        Ok(())
    }

    async fn open_session(&self) -> StoreResult<MemorySession> {
        self.ensure_open()?;
        let id = self.state.next_session.fetch_add(1, Ordering::SeqCst);
        guard(&self.state.live_sessions).insert(id);

        Ok(MemorySession {
            id,
            backend: self.clone(),
        })
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

/// A simulated dedicated connection
pub struct MemorySession {
    id: u64,
    backend: MemoryBackend,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn ensure_live(&self) -> StoreResult<&MemoryState> {
        let state = &*self.backend.state;
        if !guard(&state.live_sessions).contains(&self.id) {
            return Err(StoreError::ConnectionLost(format!(
                "session {} was disconnected",
                self.id
            )));
        }
        Ok(state)
    }

    fn disconnect(&self) {
        let state = &self.backend.state;
        guard(&state.live_sessions).remove(&self.id);
        guard(&state.locks).retain(|_, owner| *owner != self.id);
    }
}

#[async_trait]
impl SubscriberSession for MemorySession {
    async fn try_lock(&mut self, lock: LockNumber) -> StoreResult<bool> {
        let state = self.ensure_live()?;
        let mut locks = guard(&state.locks);
        let owner = *locks.entry(lock).or_insert(self.id);
        Ok(owner == self.id)
    }

    async fn unlock(&mut self, lock: LockNumber) -> StoreResult<bool> {
        let state = self.ensure_live()?;
        let mut locks = guard(&state.locks);
        if locks.get(&lock) == Some(&self.id) {
            locks.remove(&lock);
            return Ok(true);
        }
        Ok(false)
    }

    async fn load_checkpoint(
        &mut self,
        subscription: &SubscriptionId,
    ) -> StoreResult<Option<EventId>> {
        let state = self.ensure_live()?;
        Ok(guard(&state.checkpoints).get(subscription).cloned())
    }

    async fn save_checkpoint(
        &mut self,
        subscription: &SubscriptionId,
        id: &EventId,
    ) -> StoreResult<()> {
        let state = self.ensure_live()?;
        guard(&state.checkpoints).insert(subscription.clone(), id.clone());
        Ok(())
    }

    async fn fetch_after(
        &mut self,
        after: Option<&EventId>,
        limit: u32,
    ) -> StoreResult<Vec<Event>> {
        let state = self.ensure_live()?;
        let events = guard(&state.events);
        let lower = match after {
            Some(id) => Bound::Excluded(id.clone()),
            None => Bound::Unbounded,
        };

        Ok(events
            .range((lower, Bound::Unbounded))
            .take(limit as usize)
            .map(|(_, event)| event.clone())
            .collect())
    }

    async fn wait_for_activity(&mut self, max_wait: Duration) -> StoreResult<Wake> {
        let mut rx = self.ensure_live()?.wake.subscribe();

        let wake = match tokio::time::timeout(max_wait, rx.recv()).await {
            Err(_) => Wake::TimedOut,
            Ok(Ok(payload)) => Wake::Notified(payload),
            Ok(Err(RecvError::Lagged(_))) => Wake::Notified(String::new()),
            Ok(Err(RecvError::Closed)) => Wake::Interrupted,
        };
        Ok(wake)
    }

    async fn close(self) -> StoreResult<()> {
        // Drop releases locks
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(name: &str) -> SubscriptionId {
        SubscriptionId::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_append_rejects_duplicate_id() {
        let backend = MemoryBackend::new();
        backend.append(&Event::new("a1", "t")).await.unwrap();

        let result = backend.append(&Event::new("a1", "other")).await;
        assert!(matches!(result, Err(StoreError::DuplicateId(id)) if id.as_str() == "a1"));

        let mut session = backend.open_session().await.unwrap();
        let events = session.fetch_after(None, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "t");
    }

    #[tokio::test]
    async fn test_fetch_after_is_ordered_and_bounded() {
        let backend = MemoryBackend::new();
        for id in ["a3", "a1", "a5", "a2", "a4"] {
            backend.append(&Event::new(id, "t")).await.unwrap();
        }
        let mut session = backend.open_session().await.unwrap();

        let first = session.fetch_after(None, 2).await.unwrap();
        let ids: Vec<&str> = first.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2"]);

        let after = EventId::from("a2");
        let next = session.fetch_after(Some(&after), 10).await.unwrap();
        let ids: Vec<&str> = next.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a3", "a4", "a5"]);

        let last = EventId::from("a5");
        assert!(session.fetch_after(Some(&last), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_and_released_on_drop() {
        let backend = MemoryBackend::new();
        let lock = sub("orders").lock_number();

        let mut a = backend.open_session().await.unwrap();
        let mut b = backend.open_session().await.unwrap();

        assert!(a.try_lock(lock).await.unwrap());
        // Re-entrant for the holder
        assert!(a.try_lock(lock).await.unwrap());
        assert!(!b.try_lock(lock).await.unwrap());
        assert_eq!(backend.lock_holder(lock), Some(a.id()));

        drop(a);
        assert!(b.try_lock(lock).await.unwrap());
    }

    #[tokio::test]
    async fn test_unlock_only_by_holder() {
        let backend = MemoryBackend::new();
        let lock = sub("orders").lock_number();
        let mut a = backend.open_session().await.unwrap();
        let mut b = backend.open_session().await.unwrap();

        a.try_lock(lock).await.unwrap();
        assert!(!b.unlock(lock).await.unwrap());
        assert!(a.unlock(lock).await.unwrap());
        assert_eq!(backend.lock_holder(lock), None);
    }

    #[tokio::test]
    async fn test_checkpoint_upsert() {
        let backend = MemoryBackend::new();
        let mut session = backend.open_session().await.unwrap();
        let id = sub("test_client");

        assert_eq!(session.load_checkpoint(&id).await.unwrap(), None);

        session.save_checkpoint(&id, &EventId::from("test_value1")).await.unwrap();
        session.save_checkpoint(&id, &EventId::from("test_value2")).await.unwrap();

        assert_eq!(
            session.load_checkpoint(&id).await.unwrap(),
            Some(EventId::from("test_value2"))
        );
    }

    #[tokio::test]
    async fn test_disconnect_all_invalidates_sessions() {
        let backend = MemoryBackend::new();
        let lock = sub("orders").lock_number();
        let mut session = backend.open_session().await.unwrap();
        session.try_lock(lock).await.unwrap();

        backend.disconnect_all();

        assert_eq!(backend.lock_holder(lock), None);
        let err = session.fetch_after(None, 5).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_resolves_on_publish() {
        let backend = MemoryBackend::new();
        let mut session = backend.open_session().await.unwrap();

        let publisher = backend.clone();
        let waiter = tokio::spawn(async move {
            session.wait_for_activity(Duration::from_secs(3600)).await
        });

        while backend.waiting_sessions() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        publisher.append(&Event::new("a1", "t")).await.unwrap();

        let wake = waiter.await.unwrap().unwrap();
        assert_eq!(wake, Wake::Notified("a1:t".to_string()));
        // Single-shot: interest is dropped once the wait resolves
        assert_eq!(backend.waiting_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_bounded() {
        let backend = MemoryBackend::new();
        let mut session = backend.open_session().await.unwrap();

        let wake = session
            .wait_for_activity(Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(wake, Wake::TimedOut);
    }

    #[tokio::test]
    async fn test_closed_backend_rejects_work() {
        let backend = MemoryBackend::new();
        backend.close().await;

        assert!(matches!(
            backend.append(&Event::new("a1", "t")).await,
            Err(StoreError::Closed)
        ));
        assert!(backend.open_session().await.is_err());
    }
}
