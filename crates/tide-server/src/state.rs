//! Async access to the blocking [`TodoStore`].
//!
//! Every call runs on the blocking thread pool and maps store failures to
//! [`SyncError::Persistence`].

use tide_core::{SessionId, SyncError, TodoState};
use tide_store::TodoStore;

/// Async facade over [`TodoStore`].
#[derive(Clone)]
pub struct StateStore {
    inner: TodoStore,
}

impl StateStore {
    /// Wrap a store.
    pub fn new(inner: TodoStore) -> Self {
        Self { inner }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &TodoStore {
        &self.inner
    }

    /// Load a session, seeding on first contact.
    pub async fn load(&self, session_id: &SessionId) -> Result<TodoState, SyncError> {
        let session_id = session_id.clone();
        self.blocking(move |store| store.load_session(&session_id))
            .await
    }

    /// Replace a session's state.
    pub async fn save(&self, session_id: &SessionId, state: TodoState) -> Result<(), SyncError> {
        let session_id = session_id.clone();
        self.blocking(move |store| store.save_session(&session_id, &state))
            .await
    }

    /// Run `f` against the store on the blocking pool.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&TodoStore) -> tide_store::Result<T> + Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| SyncError::Persistence(format!("store task failed: {e}")))?
            .map_err(SyncError::from)
    }
}
