//! Background eviction of idle sessions.
//!
//! A session that has not been saved for the configured TTL is deleted,
//! unless it currently has live update streams.

use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tide_core::SyncError;

use crate::metrics::SESSIONS_EVICTED_TOTAL;
use crate::relay::{Address, Relay};
use crate::state::StateStore;

/// Deletes idle sessions on a fixed interval.
#[derive(Clone)]
pub struct SessionSweeper {
    store: StateStore,
    relay: Relay,
    ttl: Duration,
}

impl SessionSweeper {
    /// Build a sweeper evicting sessions idle for longer than `ttl`.
    pub fn new(store: StateStore, relay: Relay, ttl: Duration) -> Self {
        Self { store, relay, ttl }
    }

    /// Run one pass. Returns how many sessions were deleted.
    pub async fn sweep_once(&self) -> Result<usize, SyncError> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| SyncError::Persistence(format!("invalid ttl: {e}")))?;
        let cutoff = Utc::now() - ttl;
        let candidates = self
            .store
            .blocking(move |store| store.idle_sessions(cutoff))
            .await?;

        let mut evicted = 0;
        for session_id in candidates {
            if self.relay.has_subscribers(&Address::for_session(&session_id)) {
                debug!(%session_id, "idle session still has streams, keeping");
                continue;
            }
            let removed = self
                .store
                .blocking({
                    let session_id = session_id.clone();
                    move |store| store.delete_session(&session_id)
                })
                .await?;
            if removed {
                evicted += 1;
            }
        }
        if evicted > 0 {
            counter!(SESSIONS_EVICTED_TOTAL).increment(evicted as u64);
            info!(evicted, "evicted idle sessions");
        }
        Ok(evicted)
    }

    /// Sweep every `interval` until `cancel` fires.
    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        warn!(error = %err, "session sweep failed");
                    }
                }
            }
        }
        debug!("session sweeper stopped");
    }
}
