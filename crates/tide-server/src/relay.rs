//! In-process pub/sub relay for per-session update events.
//!
//! Addresses are `todos.updates.<session id>`. Delivery is fan-out, at most
//! once, and best effort: publishing to an address without subscribers is a
//! successful no-op, and a subscriber whose bounded buffer is full misses
//! that event without slowing the publisher or any other subscriber.
//!
//! The address table is a [`DashMap`], so publishers on different sessions
//! never contend on a shared lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use tide_core::{SessionId, SyncError, UpdateEvent};

use crate::metrics::{RELAY_DROPS_TOTAL, RELAY_PUBLISHED_TOTAL};

/// Prefix shared by every update address.
pub const ADDRESS_PREFIX: &str = "todos.updates.";

/// A topic on the relay.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// The update address of a session.
    pub fn for_session(session_id: &SessionId) -> Self {
        Self(format!("{ADDRESS_PREFIX}{session_id}"))
    }

    /// The full address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Relay failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// The relay has been shut down.
    #[error("relay is closed")]
    Closed,
    /// Empty events are never published.
    #[error("refusing to publish an empty update event")]
    EmptyEvent,
}

impl From<RelayError> for SyncError {
    fn from(err: RelayError) -> Self {
        SyncError::Subscription(err.to_string())
    }
}

/// Outcome of one publish.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers the event was queued for.
    pub delivered: usize,
    /// Subscribers that missed it (buffer full or receiver gone).
    pub dropped: usize,
}

/// Lifetime counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Events accepted for publishing.
    pub published: u64,
    /// Per-subscriber deliveries.
    pub delivered: u64,
    /// Per-subscriber drops.
    pub dropped: u64,
    /// Subscriptions created.
    pub subscribed: u64,
    /// Subscriptions removed.
    pub unsubscribed: u64,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Arc<UpdateEvent>>,
}

struct RelayInner {
    topics: DashMap<Address, Vec<Subscriber>>,
    buffer: usize,
    next_id: AtomicU64,
    closed: AtomicBool,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    subscribed: AtomicU64,
    unsubscribed: AtomicU64,
}

impl RelayInner {
    fn remove(&self, address: &Address, id: u64) -> bool {
        let removed = match self.topics.get_mut(address) {
            Some(mut subs) => {
                let before = subs.len();
                subs.retain(|s| s.id != id);
                subs.len() != before
            }
            None => false,
        };
        let _ = self.topics.remove_if(address, |_, subs| subs.is_empty());
        if removed {
            let _ = self.unsubscribed.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    fn prune_closed(&self, address: &Address) {
        if let Some(mut subs) = self.topics.get_mut(address) {
            let before = subs.len();
            subs.retain(|s| !s.tx.is_closed());
            let pruned = before - subs.len();
            if pruned > 0 {
                let _ = self
                    .unsubscribed
                    .fetch_add(pruned as u64, Ordering::Relaxed);
            }
        }
        let _ = self.topics.remove_if(address, |_, subs| subs.is_empty());
    }
}

/// Cloneable handle to a shared relay.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl Relay {
    /// Create a relay whose subscribers buffer up to `buffer` events each.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                topics: DashMap::new(),
                buffer: buffer.max(1),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                subscribed: AtomicU64::new(0),
                unsubscribed: AtomicU64::new(0),
            }),
        }
    }

    /// Register a new subscriber on `address`.
    pub fn subscribe(&self, address: Address) -> Result<Subscription, RelayError> {
        if self.is_closed() {
            return Err(RelayError::Closed);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        self.inner
            .topics
            .entry(address.clone())
            .or_default()
            .push(Subscriber { id, tx });

        // Lost a race with close(): undo.
        if self.is_closed() {
            let _ = self.inner.remove(&address, id);
            return Err(RelayError::Closed);
        }

        let _ = self.inner.subscribed.fetch_add(1, Ordering::Relaxed);
        debug!(%address, subscriber_id = id, "subscribed");
        Ok(Subscription {
            id,
            address,
            rx,
            relay: Arc::downgrade(&self.inner),
            active: true,
        })
    }

    /// Publish to every current subscriber of `address`. Never blocks.
    pub fn publish(
        &self,
        address: &Address,
        event: UpdateEvent,
    ) -> Result<PublishReport, RelayError> {
        if self.is_closed() {
            return Err(RelayError::Closed);
        }
        if !event.is_meaningful() {
            return Err(RelayError::EmptyEvent);
        }

        let event = Arc::new(event);
        let mut report = PublishReport::default();
        let mut stale = false;

        if let Some(subs) = self.inner.topics.get(address) {
            for sub in subs.iter() {
                match sub.tx.try_send(Arc::clone(&event)) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        report.dropped += 1;
                        warn!(%address, subscriber_id = sub.id, "subscriber buffer full, dropping event");
                    }
                    Err(TrySendError::Closed(_)) => {
                        report.dropped += 1;
                        stale = true;
                    }
                }
            }
        }
        if stale {
            self.inner.prune_closed(address);
        }

        let _ = self.inner.published.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .inner
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        let _ = self
            .inner
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        counter!(RELAY_PUBLISHED_TOTAL).increment(1);
        if report.dropped > 0 {
            counter!(RELAY_DROPS_TOTAL).increment(report.dropped as u64);
        }
        trace!(%address, delivered = report.delivered, dropped = report.dropped, "published");
        Ok(report)
    }

    /// Current subscribers on `address`.
    pub fn subscriber_count(&self, address: &Address) -> usize {
        self.inner.topics.get(address).map_or(0, |subs| subs.len())
    }

    /// Whether anyone is listening on `address`.
    pub fn has_subscribers(&self, address: &Address) -> bool {
        self.subscriber_count(address) > 0
    }

    /// Addresses with at least one subscriber.
    pub fn address_count(&self) -> usize {
        self.inner.topics.len()
    }

    /// Snapshot of lifetime counters.
    pub fn stats(&self) -> RelayStats {
        let inner = &self.inner;
        RelayStats {
            published: inner.published.load(Ordering::Relaxed),
            delivered: inner.delivered.load(Ordering::Relaxed),
            dropped: inner.dropped.load(Ordering::Relaxed),
            subscribed: inner.subscribed.load(Ordering::Relaxed),
            unsubscribed: inner.unsubscribed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting publishes and subscriptions and disconnect every
    /// subscriber. Pending buffered events are still readable.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let addresses = self.inner.topics.len();
        self.inner.topics.clear();
        debug!(addresses, "relay closed");
    }

    /// Whether [`Relay::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

/// A live registration on one address.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    id: u64,
    address: Address,
    rx: mpsc::Receiver<Arc<UpdateEvent>>,
    relay: Weak<RelayInner>,
    active: bool,
}

impl Subscription {
    /// Relay-assigned subscriber id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address this subscription listens on.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once unsubscribed or after the relay closes and the
    /// buffer has drained.
    pub async fn recv(&mut self) -> Option<Arc<UpdateEvent>> {
        self.rx.recv().await
    }

    /// Remove this subscriber from the relay.
    ///
    /// Idempotent: only the first call does anything. Returns whether this
    /// call removed a live registration.
    pub fn unsubscribe(&mut self) -> bool {
        if !std::mem::replace(&mut self.active, false) {
            return false;
        }
        self.rx.close();
        let removed = match self.relay.upgrade() {
            Some(inner) => inner.remove(&self.address, self.id),
            None => false,
        };
        debug!(address = %self.address, subscriber_id = self.id, removed, "unsubscribed");
        removed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.unsubscribe();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tide_core::{Intent, Toast, compose};

    fn refresh() -> UpdateEvent {
        compose([Intent::Refresh]).unwrap()
    }

    fn toast(msg: &str) -> UpdateEvent {
        compose([Intent::Notify(Toast::success(msg))]).unwrap()
    }

    fn addr(name: &str) -> Address {
        Address::for_session(&SessionId::parse(name).unwrap())
    }

    #[test]
    fn address_format() {
        assert_eq!(addr("sess_abc").as_str(), "todos.updates.sess_abc");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let relay = Relay::new(4);
        let report = relay.publish(&addr("a"), refresh()).unwrap();
        assert_eq!(report, PublishReport::default());
        assert_eq!(relay.stats().published, 1);
    }

    #[tokio::test]
    async fn fan_out_to_all_subscribers() {
        let relay = Relay::new(4);
        let mut s1 = relay.subscribe(addr("a")).unwrap();
        let mut s2 = relay.subscribe(addr("a")).unwrap();

        let report = relay.publish(&addr("a"), refresh()).unwrap();
        assert_eq!(report.delivered, 2);
        assert!(s1.recv().await.unwrap().refresh);
        assert!(s2.recv().await.unwrap().refresh);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let relay = Relay::new(4);
        let mut a = relay.subscribe(addr("a")).unwrap();
        let mut b = relay.subscribe(addr("b")).unwrap();

        let _ = relay.publish(&addr("a"), toast("for a")).unwrap();
        assert_eq!(a.recv().await.unwrap().toast.as_ref().unwrap().message, "for a");
        assert!(
            tokio::time::timeout(Duration::from_millis(20), b.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let relay = Relay::new(8);
        let mut sub = relay.subscribe(addr("a")).unwrap();
        for i in 0..5 {
            let _ = relay.publish(&addr("a"), toast(&i.to_string())).unwrap();
        }
        for i in 0..5 {
            let event = sub.recv().await.unwrap();
            assert_eq!(event.toast.as_ref().unwrap().message, i.to_string());
        }
    }

    #[tokio::test]
    async fn full_buffer_drops_only_for_slow_subscriber() {
        let relay = Relay::new(2);
        let mut slow = relay.subscribe(addr("a")).unwrap();
        let mut fast = relay.subscribe(addr("a")).unwrap();

        let mut fast_seen = 0;
        for _ in 0..5 {
            let report = relay.publish(&addr("a"), refresh()).unwrap();
            assert!(report.delivered >= 1);
            // fast drains as it goes
            let _ = fast.recv().await.unwrap();
            fast_seen += 1;
        }
        assert_eq!(fast_seen, 5);

        let mut slow_seen = 0;
        while let Ok(event) = tokio::time::timeout(Duration::from_millis(10), slow.recv()).await {
            assert!(event.is_some());
            slow_seen += 1;
        }
        assert_eq!(slow_seen, 2);
        assert_eq!(relay.stats().dropped, 3);
    }

    #[tokio::test]
    async fn empty_event_is_rejected() {
        let relay = Relay::new(4);
        let _sub = relay.subscribe(addr("a")).unwrap();
        assert_eq!(
            relay.publish(&addr("a"), UpdateEvent::default()),
            Err(RelayError::EmptyEvent)
        );
        assert_eq!(relay.stats().published, 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let relay = Relay::new(4);
        let mut sub = relay.subscribe(addr("a")).unwrap();
        assert_eq!(relay.subscriber_count(&addr("a")), 1);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        drop(sub);

        assert_eq!(relay.subscriber_count(&addr("a")), 0);
        assert_eq!(relay.address_count(), 0);
        assert_eq!(relay.stats().unsubscribed, 1);
    }

    #[tokio::test]
    async fn drop_unsubscribes() {
        let relay = Relay::new(4);
        {
            let _sub = relay.subscribe(addr("a")).unwrap();
            assert!(relay.has_subscribers(&addr("a")));
        }
        assert!(!relay.has_subscribers(&addr("a")));
    }

    #[tokio::test]
    async fn unsubscribed_receiver_sees_end_of_stream() {
        let relay = Relay::new(4);
        let mut sub = relay.subscribe(addr("a")).unwrap();
        let _ = sub.unsubscribe();
        assert!(sub.recv().await.is_none());
        let report = relay.publish(&addr("a"), refresh()).unwrap();
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn close_disconnects_subscribers_and_rejects_new_ones() {
        let relay = Relay::new(4);
        let mut sub = relay.subscribe(addr("a")).unwrap();
        let _ = relay.publish(&addr("a"), refresh()).unwrap();
        relay.close();

        // buffered event still drains, then end of stream
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());

        assert_eq!(relay.subscribe(addr("a")).err(), Some(RelayError::Closed));
        assert_eq!(relay.publish(&addr("a"), refresh()), Err(RelayError::Closed));
        assert!(!sub.unsubscribe());
    }

    #[tokio::test]
    async fn unsubscribe_after_relay_dropped_is_harmless() {
        let relay = Relay::new(4);
        let mut sub = relay.subscribe(addr("a")).unwrap();
        drop(relay);
        assert!(!sub.unsubscribe());
    }

    #[tokio::test]
    async fn concurrent_publishers_on_distinct_sessions() {
        let relay = Relay::new(256);
        let mut subs: Vec<_> = (0..8)
            .map(|i| relay.subscribe(addr(&format!("s{i}"))).unwrap())
            .collect();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let relay = relay.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        let _ = relay.publish(&addr(&format!("s{i}")), refresh()).unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        for sub in &mut subs {
            let mut n = 0;
            while let Ok(Some(_)) =
                tokio::time::timeout(Duration::from_millis(10), sub.recv()).await
            {
                n += 1;
            }
            assert_eq!(n, 50);
        }
        assert_eq!(relay.stats().delivered, 400);
    }
}
