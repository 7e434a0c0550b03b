//! Per-connection update streams.
//!
//! A stream runs `Opening → Streaming → Closing`:
//!
//! - **Opening**: read the full state, push it, subscribe to the session's
//!   update address.
//! - **Streaming**: wait for the next event or cancellation. On `refresh`,
//!   re-read and push the whole state; then push the toast, if any. A failed
//!   push ends the stream immediately.
//! - **Closing**: unsubscribe exactly once. Teardown problems are logged.
//!
//! The stream holds no state of its own between events; every refresh reads
//! from the store, so a dropped event costs at most one stale render until
//! the next one arrives.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use tide_core::{SessionId, StreamId, SyncError};

use crate::metrics::{
    STREAM_PUSH_FAILURES_TOTAL, STREAM_PUSHES_TOTAL, STREAMS_ACTIVE, STREAMS_OPENED_TOTAL,
};
use crate::relay::{Address, Relay, Subscription};
use crate::render::{Fragment, Renderer};
use crate::state::StateStore;

/// The connection is no longer writable.
#[derive(Debug, Error)]
#[error("push failed: {0}")]
pub struct PushError(pub String);

impl From<PushError> for SyncError {
    fn from(err: PushError) -> Self {
        SyncError::Push(err.0)
    }
}

/// The push primitive of one client connection.
///
/// `push` may wait on a slow client. That only delays this stream.
#[async_trait]
pub trait PushSink: Send {
    /// Deliver one fragment.
    async fn push(&mut self, fragment: Fragment) -> Result<(), PushError>;
}

#[async_trait]
impl PushSink for mpsc::Sender<Fragment> {
    async fn push(&mut self, fragment: Fragment) -> Result<(), PushError> {
        self.send(fragment)
            .await
            .map_err(|_| PushError("connection closed".into()))
    }
}

/// Why a stream ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Client went away or the server is shutting down.
    Cancelled,
    /// A push failed.
    PushFailed,
    /// Reading state failed.
    ReadFailed,
    /// Subscribing to the update address failed.
    SubscribeFailed,
    /// The relay shut down.
    RelayClosed,
}

impl CloseReason {
    /// Stable label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::PushFailed => "push_failed",
            Self::ReadFailed => "read_failed",
            Self::SubscribeFailed => "subscribe_failed",
            Self::RelayClosed => "relay_closed",
        }
    }
}

/// Summary of a finished stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Identifier assigned when the stream opened.
    pub stream_id: StreamId,
    /// Why it ended.
    pub reason: CloseReason,
    /// Fragments successfully pushed.
    pub pushes: u64,
}

enum Halt {
    Cancelled,
    Push,
}

impl From<Halt> for CloseReason {
    fn from(halt: Halt) -> Self {
        match halt {
            Halt::Cancelled => CloseReason::Cancelled,
            Halt::Push => CloseReason::PushFailed,
        }
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        let now = counter.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!(STREAMS_ACTIVE).set(now as f64);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let now = self.0.fetch_sub(1, Ordering::Relaxed) - 1;
        gauge!(STREAMS_ACTIVE).set(now as f64);
    }
}

struct Connection<'a, S> {
    sink: &'a mut S,
    cancel: &'a CancellationToken,
    pushes: u64,
}

impl<S: PushSink> Connection<'_, S> {
    async fn push(&mut self, fragment: Fragment) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        let kind = fragment.kind.as_str();
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Halt::Cancelled),
            result = self.sink.push(fragment) => result,
        };
        match result {
            Ok(()) => {
                self.pushes += 1;
                counter!(STREAM_PUSHES_TOTAL, "kind" => kind).increment(1);
                Ok(())
            }
            Err(err) => {
                counter!(STREAM_PUSH_FAILURES_TOTAL).increment(1);
                debug!(error = %err, kind, "push failed");
                Err(Halt::Push)
            }
        }
    }

    /// Best effort: the connection may already be gone.
    async fn push_error(&mut self, renderer: &dyn Renderer, err: &SyncError) {
        let _ = self.push(renderer.render_error(&err.to_string())).await;
    }
}

/// Runs update streams against a shared store, relay, and renderer.
#[derive(Clone)]
pub struct StreamManager {
    store: StateStore,
    relay: Relay,
    renderer: Arc<dyn Renderer>,
    active: Arc<AtomicUsize>,
}

impl StreamManager {
    /// Build a manager.
    pub fn new(store: StateStore, relay: Relay, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            store,
            relay,
            renderer,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Streams currently open.
    pub fn active_streams(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Drive one stream until it closes.
    ///
    /// Cancelling `cancel` ends the stream without a further push.
    #[instrument(skip(self, sink, cancel), fields(session_id = %session_id))]
    pub async fn run<S: PushSink>(
        &self,
        session_id: SessionId,
        mut sink: S,
        cancel: CancellationToken,
    ) -> StreamOutcome {
        let stream_id = StreamId::new();
        let _active = ActiveGuard::enter(&self.active);
        counter!(STREAMS_OPENED_TOTAL).increment(1);
        debug!(%stream_id, phase = "opening", "stream opening");

        let mut conn = Connection {
            sink: &mut sink,
            cancel: &cancel,
            pushes: 0,
        };

        let reason = match self.open(&session_id, &mut conn).await {
            Ok(mut subscription) => {
                debug!(%stream_id, phase = "streaming", subscriber_id = subscription.id(), "stream open");
                let reason = self
                    .stream_updates(&session_id, &mut subscription, &mut conn)
                    .await;
                debug!(%stream_id, phase = "closing", "stream closing");
                if !subscription.unsubscribe() {
                    debug!(%stream_id, "subscription was already gone at teardown");
                }
                reason
            }
            Err(reason) => reason,
        };

        info!(
            %stream_id,
            reason = reason.as_str(),
            pushes = conn.pushes,
            "stream closed"
        );
        StreamOutcome {
            stream_id,
            reason,
            pushes: conn.pushes,
        }
    }

    async fn open<S: PushSink>(
        &self,
        session_id: &SessionId,
        conn: &mut Connection<'_, S>,
    ) -> Result<Subscription, CloseReason> {
        let state = tokio::select! {
            biased;
            () = conn.cancel.cancelled() => return Err(CloseReason::Cancelled),
            result = self.store.load(session_id) => result,
        };
        let state = match state {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "initial state read failed");
                conn.push_error(self.renderer.as_ref(), &err).await;
                return Err(CloseReason::ReadFailed);
            }
        };
        conn.push(self.renderer.render_state(&state)).await?;

        match self.relay.subscribe(Address::for_session(session_id)) {
            Ok(subscription) => Ok(subscription),
            Err(err) => {
                let err = SyncError::from(err);
                warn!(error = %err, "subscribe failed");
                conn.push_error(self.renderer.as_ref(), &err).await;
                Err(CloseReason::SubscribeFailed)
            }
        }
    }

    async fn stream_updates<S: PushSink>(
        &self,
        session_id: &SessionId,
        subscription: &mut Subscription,
        conn: &mut Connection<'_, S>,
    ) -> CloseReason {
        loop {
            let event = tokio::select! {
                biased;
                () = conn.cancel.cancelled() => return CloseReason::Cancelled,
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => return CloseReason::RelayClosed,
                },
            };

            if event.refresh {
                let state = tokio::select! {
                    biased;
                    () = conn.cancel.cancelled() => return CloseReason::Cancelled,
                    result = self.store.load(session_id) => result,
                };
                match state {
                    Ok(state) => {
                        if let Err(halt) = conn.push(self.renderer.render_state(&state)).await {
                            return halt.into();
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "state re-read failed");
                        conn.push_error(self.renderer.as_ref(), &err).await;
                        return CloseReason::ReadFailed;
                    }
                }
            }

            if let Some(toast) = &event.toast {
                if let Err(halt) = conn.push(self.renderer.render_toast(toast)).await {
                    return halt.into();
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
