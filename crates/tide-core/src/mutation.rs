//! Client-requested changes to a session's state.
//!
//! A [`Mutation`] is validated before the store is touched, applied to a
//! freshly loaded [`TodoState`], and then describes which update event its
//! receivers should see.

use crate::errors::{Result, SyncError};
use crate::todo::{TodoState, ViewMode};
use crate::update::{Intent, Toast, UpdateEvent, compose};

/// One state-changing request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    /// Invert an item; negative index toggles all.
    Toggle {
        /// Item position or negative.
        index: i64,
    },
    /// Replace an item's text; negative index appends.
    Edit {
        /// Item position or negative.
        index: i64,
        /// New text.
        text: String,
    },
    /// Remove an item; negative index removes all completed.
    Delete {
        /// Item position or negative.
        index: i64,
    },
    /// Change the view filter.
    SetMode {
        /// New filter.
        mode: ViewMode,
    },
    /// Start editing an item.
    StartEdit {
        /// Item position.
        index: i64,
    },
    /// Stop editing.
    CancelEdit,
    /// Restore the seed state.
    Reset,
}

impl Mutation {
    /// Parse a path segment as an item index.
    pub fn parse_index(raw: &str) -> Result<i64> {
        raw.trim()
            .parse::<i64>()
            .map_err(|_| SyncError::malformed(format!("invalid index: {raw:?}")))
    }

    /// Parse a path segment as a view mode code.
    pub fn parse_mode(raw: &str) -> Result<ViewMode> {
        raw.trim()
            .parse::<i64>()
            .ok()
            .and_then(ViewMode::from_code)
            .ok_or_else(|| SyncError::malformed(format!("invalid mode: {raw:?}")))
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Toggle { .. } => "toggle",
            Self::Edit { .. } => "edit",
            Self::Delete { .. } => "delete",
            Self::SetMode { .. } => "set_mode",
            Self::StartEdit { .. } => "start_edit",
            Self::CancelEdit => "cancel_edit",
            Self::Reset => "reset",
        }
    }

    /// Reject requests that can be judged without the stored state.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Edit { text, .. } if text.trim().is_empty() => {
                Err(SyncError::malformed("todo text must not be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Apply to a loaded state.
    pub fn apply(&self, state: &mut TodoState) {
        match self {
            Self::Toggle { index } => state.toggle(*index),
            Self::Edit { index, text } => state.edit(*index, text.trim()),
            Self::Delete { index } => state.delete(*index),
            Self::SetMode { mode } => state.set_mode(*mode),
            Self::StartEdit { index } => state.start_editing(*index),
            Self::CancelEdit => state.cancel_editing(),
            Self::Reset => state.reset(),
        }
    }

    /// Intents receivers should act on once the change is persisted.
    pub fn intents(&self) -> Vec<Intent> {
        let toast = match self {
            Self::Reset => Some("Todos reset"),
            Self::Edit { index, .. } if *index < 0 => Some("Todo created"),
            Self::Edit { .. } => Some("Todo updated"),
            Self::Delete { .. } => Some("Todo deleted"),
            Self::Toggle { .. }
            | Self::SetMode { .. }
            | Self::StartEdit { .. }
            | Self::CancelEdit => None,
        };
        let mut intents = vec![Intent::Refresh];
        if let Some(message) = toast {
            intents.push(Intent::Notify(Toast::success(message)));
        }
        intents
    }

    /// The update event to publish after a successful save.
    pub fn update_event(&self) -> Option<UpdateEvent> {
        compose(self.intents())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
