//! Mutation service: load → apply → persist → compose → publish.
//!
//! Each session's load-modify-save cycle runs under a per-session async
//! lock, so two concurrent mutations on one session never lose an update.
//! Different sessions never contend. Publishing happens only after the save
//! commits; a failed save publishes nothing.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use metrics::{counter, histogram};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};

use tide_core::{Mutation, SessionId, SyncError, TodoState, UpdateEvent};

use crate::metrics::{MUTATION_DURATION_SECONDS, MUTATION_ERRORS_TOTAL, MUTATIONS_TOTAL};
use crate::relay::{Address, PublishReport, Relay};
use crate::state::StateStore;

const PRUNE_THRESHOLD: usize = 128;

/// Registry of per-session async locks, held only while someone uses them.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<SessionId, Weak<AsyncMutex<()>>>>,
}

impl SessionLocks {
    /// Wait for exclusive access to `session_id`.
    pub async fn acquire(&self, session_id: &SessionId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, weak| weak.strong_count() > 0);
            }
            if let Some(existing) = locks.get(session_id).and_then(Weak::upgrade) {
                existing
            } else {
                let lock = Arc::new(AsyncMutex::new(()));
                let _ = locks.insert(session_id.clone(), Arc::downgrade(&lock));
                lock
            }
        };
        lock.lock_owned().await
    }

    /// Entries currently tracked, live or dead.
    pub fn tracked(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Result of a successful mutation.
#[derive(Clone, Debug)]
pub struct MutationOutcome {
    /// State as persisted.
    pub state: TodoState,
    /// Event published, if any.
    pub event: Option<UpdateEvent>,
    /// Delivery report, when publishing happened.
    pub report: Option<PublishReport>,
}

/// Applies mutations and notifies a session's streams.
#[derive(Clone)]
pub struct MutationService {
    store: StateStore,
    relay: Relay,
    locks: Arc<SessionLocks>,
}

impl MutationService {
    /// Build a service.
    pub fn new(store: StateStore, relay: Relay) -> Self {
        Self {
            store,
            relay,
            locks: Arc::new(SessionLocks::default()),
        }
    }

    /// Apply one mutation to a session.
    ///
    /// Invalid input is rejected before the store is touched. Publishing
    /// failures are logged and do not fail the mutation: the state is
    /// already committed.
    #[instrument(skip(self, mutation), fields(session_id = %session_id, kind = mutation.kind()))]
    pub async fn apply(
        &self,
        session_id: &SessionId,
        mutation: Mutation,
    ) -> Result<MutationOutcome, SyncError> {
        let kind = mutation.kind();
        let started = Instant::now();
        let result = self.apply_inner(session_id, &mutation).await;
        histogram!(MUTATION_DURATION_SECONDS, "kind" => kind).record(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => counter!(MUTATIONS_TOTAL, "kind" => kind).increment(1),
            Err(err) => {
                counter!(MUTATION_ERRORS_TOTAL, "kind" => kind, "error" => err.error_kind())
                    .increment(1);
                warn!(error = %err, "mutation failed");
            }
        }
        result
    }

    async fn apply_inner(
        &self,
        session_id: &SessionId,
        mutation: &Mutation,
    ) -> Result<MutationOutcome, SyncError> {
        mutation.validate()?;

        let state = {
            let _guard = self.locks.acquire(session_id).await;
            let mut state = self.store.load(session_id).await?;
            mutation.apply(&mut state);
            self.store.save(session_id, state.clone()).await?;
            state
        };

        let event = mutation.update_event();
        let report = match &event {
            Some(event) => self.publish(session_id, event.clone()),
            None => None,
        };
        debug!(items = state.items.len(), ?report, "mutation applied");
        Ok(MutationOutcome {
            state,
            event,
            report,
        })
    }

    fn publish(&self, session_id: &SessionId, event: UpdateEvent) -> Option<PublishReport> {
        match self.relay.publish(&Address::for_session(session_id), event) {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(error = %err, "publish after save failed");
                None
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tide_core::{Item, ViewMode};
    use tide_store::TodoStore;

    fn service() -> (MutationService, StateStore, Relay) {
        let store = StateStore::new(TodoStore::in_memory().unwrap());
        let relay = Relay::new(16);
        (
            MutationService::new(store.clone(), relay.clone()),
            store,
            relay,
        )
    }

    #[tokio::test]
    async fn toggle_persists_and_publishes_refresh() {
        let (service, store, relay) = service();
        let id = SessionId::new();
        let mut sub = relay.subscribe(Address::for_session(&id)).unwrap();

        let outcome = service
            .apply(&id, Mutation::Toggle { index: 1 })
            .await
            .unwrap();
        assert!(outcome.state.items[1].completed);
        assert_eq!(outcome.report.unwrap().delivered, 1);

        let event = sub.recv().await.unwrap();
        assert!(event.refresh);
        assert!(event.toast.is_none());
        assert!(store.load(&id).await.unwrap().items[1].completed);
    }

    #[tokio::test]
    async fn reset_publishes_toast() {
        let (service, _store, relay) = service();
        let id = SessionId::new();
        let mut sub = relay.subscribe(Address::for_session(&id)).unwrap();
        let _ = service.apply(&id, Mutation::Reset).await.unwrap();
        let event = sub.recv().await.unwrap();
        assert_eq!(event.toast.as_ref().unwrap().message, "Todos reset");
    }

    #[tokio::test]
    async fn malformed_input_touches_nothing() {
        let (service, store, relay) = service();
        let id = SessionId::new();
        let err = service
            .apply(
                &id,
                Mutation::Edit {
                    index: -1,
                    text: String::new(),
                },
            )
            .await
            .unwrap_err();
        assert_matches!(err, SyncError::MalformedInput(_));
        let exists = store
            .blocking({
                let id = id.clone();
                move |s| s.session_exists(&id)
            })
            .await
            .unwrap();
        assert!(!exists);
        assert_eq!(relay.stats().published, 0);
    }

    #[tokio::test]
    async fn failed_save_publishes_nothing() {
        let (service, store, relay) = service();
        let id = SessionId::new();
        let _ = store.load(&id).await.unwrap();
        let mut sub = relay.subscribe(Address::for_session(&id)).unwrap();

        // Break the schema so the next save fails inside its transaction.
        store
            .blocking(|s| {
                s.pool()
                    .get()?
                    .execute_batch("DROP TABLE todos;")
                    .map_err(Into::into)
            })
            .await
            .unwrap();

        let err = service
            .apply(&id, Mutation::Toggle { index: 0 })
            .await
            .unwrap_err();
        assert_matches!(err, SyncError::Persistence(_));
        assert_eq!(relay.stats().published, 0);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), sub.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn publish_failure_does_not_fail_mutation() {
        let (service, store, relay) = service();
        let id = SessionId::new();
        relay.close();
        let outcome = service
            .apply(&id, Mutation::Delete { index: -1 })
            .await
            .unwrap();
        assert!(outcome.report.is_none());
        assert_eq!(store.load(&id).await.unwrap().items.len(), 4);
    }

    #[tokio::test]
    async fn clearing_every_item_reseeds_on_next_load() {
        let (service, store, _relay) = service();
        let id = SessionId::new();
        let _ = service
            .apply(&id, Mutation::Toggle { index: -1 })
            .await
            .unwrap();
        let _ = service
            .apply(&id, Mutation::Delete { index: -1 })
            .await
            .unwrap();
        assert_eq!(store.load(&id).await.unwrap(), TodoState::seeded());
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let (service, store, _relay) = service();
        let id = SessionId::new();
        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let service = service.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    service
                        .apply(
                            &id,
                            Mutation::Edit {
                                index: -1,
                                text: format!("task {i}"),
                            },
                        )
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            let _ = task.await.unwrap();
        }
        let state = store.load(&id).await.unwrap();
        assert_eq!(state.items.len(), 15);
        for i in 0..10 {
            assert!(state.items.contains(&Item::new(format!("task {i}"), false)));
        }
    }

    #[tokio::test]
    async fn set_mode_and_editing_round_trip() {
        let (service, _store, _relay) = service();
        let id = SessionId::new();
        let _ = service
            .apply(
                &id,
                Mutation::SetMode {
                    mode: ViewMode::Completed,
                },
            )
            .await
            .unwrap();
        let outcome = service
            .apply(&id, Mutation::StartEdit { index: 2 })
            .await
            .unwrap();
        assert_eq!(outcome.state.mode, ViewMode::Completed);
        assert_eq!(outcome.state.editing_index, 2);

        let outcome = service.apply(&id, Mutation::CancelEdit).await.unwrap();
        assert_eq!(outcome.state.editing_index, -1);
    }

    #[tokio::test]
    async fn session_locks_are_released() {
        let locks = SessionLocks::default();
        let id = SessionId::new();
        {
            let _guard = locks.acquire(&id).await;
        }
        // Re-acquire without deadlock.
        let _guard = locks.acquire(&id).await;
        assert_eq!(locks.tracked(), 1);
    }

    #[tokio::test]
    async fn session_locks_prune_dead_entries() {
        let locks = SessionLocks::default();
        for _ in 0..=PRUNE_THRESHOLD + 1 {
            let _guard = locks.acquire(&SessionId::new()).await;
        }
        assert!(locks.tracked() <= PRUNE_THRESHOLD + 1);
    }
}
