//! Transactional per-session state store.
//!
//! A session's state is the ordered item list plus its view state (mode and
//! editing index). Saves replace the whole state in one transaction: delete
//! items, re-insert, upsert the view row. Loading a session with no persisted
//! items (never seen, or emptied) seeds the default list inside a write
//! transaction, so concurrent loads seed exactly once.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info, instrument};

use tide_core::{Item, SessionId, TodoState, ViewMode};

use crate::connection::{self, ConnectionConfig, ConnectionPool};
use crate::errors::{Result, StoreError};
use crate::migrations;

/// `SQLite`-backed session state store.
#[derive(Clone)]
pub struct TodoStore {
    pool: ConnectionPool,
}

impl TodoStore {
    /// Wrap an existing pool, applying pending migrations.
    pub fn new(pool: ConnectionPool) -> Result<Self> {
        {
            let conn = pool.get()?;
            let applied = migrations::run_migrations(&conn)?;
            if applied > 0 {
                info!(applied, "store schema migrated");
            }
        }
        Ok(Self { pool })
    }

    /// Open (or create) a file-backed store.
    pub fn open(path: &Path, config: &ConnectionConfig) -> Result<Self> {
        Self::new(connection::new_file(path, config)?)
    }

    /// Open a private in-memory store.
    pub fn in_memory() -> Result<Self> {
        Self::new(connection::new_in_memory(&ConnectionConfig::default())?)
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Load a session's state, seeding the defaults when it has no items.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn load_session(&self, session_id: &SessionId) -> Result<TodoState> {
        let mut conn = self.pool.get()?;

        {
            let tx = conn.transaction()?;
            if let Some(state) = read_state(&tx, session_id)?.filter(|s| !s.items.is_empty()) {
                tx.commit()?;
                return Ok(state);
            }
        }

        // Unknown or empty session. Re-check under the write lock so only
        // one concurrent load seeds.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = read_state(&tx, session_id)?;
        if let Some(state) = existing.as_ref().filter(|s| !s.items.is_empty()) {
            tx.commit()?;
            return Ok(state.clone());
        }
        let state = TodoState::seeded();
        write_state(&tx, session_id, &state, Utc::now())?;
        tx.commit()?;
        info!(items = state.items.len(), reseeded = existing.is_some(), "seeded session");
        Ok(state)
    }

    /// Replace a session's full state atomically.
    ///
    /// On error nothing is committed and the previous state stays intact.
    #[instrument(skip(self, state), fields(session_id = %session_id, items = state.items.len()))]
    pub fn save_session(&self, session_id: &SessionId, state: &TodoState) -> Result<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        write_state(&tx, session_id, state, Utc::now())?;
        tx.commit()?;
        debug!("session saved");
        Ok(())
    }

    /// Whether a session row exists.
    pub fn session_exists(&self, session_id: &SessionId) -> Result<bool> {
        let conn = self.pool.get()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM sessions WHERE id = ?1",
                params![session_id.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Number of stored sessions.
    pub fn session_count(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Sessions whose last save is older than `cutoff`, oldest first.
    pub fn idle_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionId>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT id FROM sessions WHERE updated_at < ?1 ORDER BY updated_at")?;
        let rows = stmt.query_map(params![timestamp(cutoff)], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for raw in rows {
            let raw = raw?;
            let id = SessionId::parse(&raw).ok_or_else(|| StoreError::CorruptRow {
                table: "sessions",
                message: format!("invalid id {raw:?}"),
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Delete a session and its items. Returns whether a row was removed.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn delete_session(&self, session_id: &SessionId) -> Result<bool> {
        let conn = self.pool.get()?;
        let removed = conn.execute(
            "DELETE FROM sessions WHERE id = ?1",
            params![session_id.as_str()],
        )?;
        Ok(removed > 0)
    }

    #[cfg(test)]
    fn backdate(&self, session_id: &SessionId, at: DateTime<Utc>) {
        let conn = self.pool.get().unwrap();
        let _ = conn
            .execute(
                "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
                params![session_id.as_str(), timestamp(at)],
            )
            .unwrap();
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn read_state(conn: &Connection, session_id: &SessionId) -> Result<Option<TodoState>> {
    let view = conn
        .query_row(
            "SELECT mode, editing_index FROM sessions WHERE id = ?1",
            params![session_id.as_str()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    let Some((mode_code, editing_index)) = view else {
        return Ok(None);
    };
    let mode = ViewMode::from_code(mode_code).ok_or_else(|| StoreError::CorruptRow {
        table: "sessions",
        message: format!("unknown mode {mode_code}"),
    })?;

    let mut stmt = conn.prepare_cached(
        "SELECT task, completed FROM todos WHERE session_id = ?1 ORDER BY position",
    )?;
    let items = stmt
        .query_map(params![session_id.as_str()], |row| {
            Ok(Item::new(row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(TodoState {
        items,
        mode,
        editing_index,
    }))
}

fn write_state(
    conn: &Connection,
    session_id: &SessionId,
    state: &TodoState,
    now: DateTime<Utc>,
) -> Result<()> {
    let now = timestamp(now);
    let _ = conn.execute(
        "INSERT INTO sessions (id, mode, editing_index, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(id) DO UPDATE SET
           mode = excluded.mode,
           editing_index = excluded.editing_index,
           updated_at = excluded.updated_at",
        params![
            session_id.as_str(),
            state.mode.code(),
            state.editing_index,
            now
        ],
    )?;
    let _ = conn.execute(
        "DELETE FROM todos WHERE session_id = ?1",
        params![session_id.as_str()],
    )?;
    let mut insert = conn.prepare_cached(
        "INSERT INTO todos (session_id, position, task, completed) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (position, item) in state.items.iter().enumerate() {
        let position = i64::try_from(position).map_err(|e| StoreError::Internal(e.to_string()))?;
        let _ = insert.execute(params![
            session_id.as_str(),
            position,
            item.text,
            item.completed
        ])?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
