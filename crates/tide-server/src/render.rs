//! Renderer seam: turns state and toasts into opaque client payloads.
//!
//! The stream manager never looks inside a [`Fragment`]; it only pushes
//! them. [`JsonRenderer`] is the default and emits JSON view models.

use serde::Serialize;

use tide_core::{TodoState, Toast};

/// What a fragment represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    /// Full rendering of the session state.
    State,
    /// A transient notification.
    Toast,
    /// An error shown to the user.
    Error,
}

impl FragmentKind {
    /// Lowercase label, used as the SSE event name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Toast => "toast",
            Self::Error => "error",
        }
    }
}

/// How the client should apply a fragment to its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchMode {
    /// Replace the target's content.
    Replace,
    /// Append to the target.
    Append,
}

/// One renderable payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    /// What this is.
    pub kind: FragmentKind,
    /// Client-side element the fragment applies to.
    pub target: String,
    /// How to apply it.
    pub mode: PatchMode,
    /// Rendered body.
    pub body: String,
}

impl Fragment {
    /// Serialize as the data line of an SSE event.
    pub fn to_sse_data(&self) -> String {
        #[derive(Serialize)]
        struct Envelope<'a> {
            target: &'a str,
            mode: PatchMode,
            body: &'a str,
        }
        serde_json::to_string(&Envelope {
            target: &self.target,
            mode: self.mode,
            body: &self.body,
        })
        .unwrap_or_default()
    }
}

/// Produces fragments for the stream manager.
pub trait Renderer: Send + Sync {
    /// Render the whole session view.
    fn render_state(&self, state: &TodoState) -> Fragment;
    /// Render a toast.
    fn render_toast(&self, toast: &Toast) -> Fragment;
    /// Render an error message for the user.
    fn render_error(&self, message: &str) -> Fragment;
}

/// Target of state fragments.
pub const TODOS_TARGET: &str = "todos-container";
/// Target of toast fragments.
pub const TOAST_TARGET: &str = "toast-container";
/// Target of error fragments.
pub const ERROR_TARGET: &str = "error-container";

/// Renders JSON view models.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRenderer;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemView<'a> {
    index: usize,
    text: &'a str,
    completed: bool,
    visible: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StateView<'a> {
    mode: &'static str,
    editing_index: i64,
    remaining: usize,
    completed: usize,
    items: Vec<ItemView<'a>>,
}

impl Renderer for JsonRenderer {
    fn render_state(&self, state: &TodoState) -> Fragment {
        let view = StateView {
            mode: state.mode.as_str(),
            editing_index: state.editing_index,
            remaining: state.remaining(),
            completed: state.completed_count(),
            items: state
                .items
                .iter()
                .enumerate()
                .map(|(index, item)| ItemView {
                    index,
                    text: &item.text,
                    completed: item.completed,
                    visible: state.mode.shows(item),
                })
                .collect(),
        };
        Fragment {
            kind: FragmentKind::State,
            target: TODOS_TARGET.to_string(),
            mode: PatchMode::Replace,
            body: serde_json::to_string(&view).unwrap_or_default(),
        }
    }

    fn render_toast(&self, toast: &Toast) -> Fragment {
        Fragment {
            kind: FragmentKind::Toast,
            target: TOAST_TARGET.to_string(),
            mode: PatchMode::Append,
            body: serde_json::to_string(toast).unwrap_or_default(),
        }
    }

    fn render_error(&self, message: &str) -> Fragment {
        Fragment {
            kind: FragmentKind::Error,
            target: ERROR_TARGET.to_string(),
            mode: PatchMode::Append,
            body: serde_json::json!({ "message": message }).to_string(),
        }
    }
}
