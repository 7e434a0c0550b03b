//! Update events and the composer that builds them.
//!
//! An [`UpdateEvent`] is a doorbell: it says "re-read the state" and/or
//! "show this toast". It never carries state. An event with neither part is
//! meaningless, and [`compose`] refuses to produce one.

use serde::{Deserialize, Serialize};

/// Severity of a transient notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    /// Neutral information.
    #[default]
    Info,
    /// The operation succeeded.
    Success,
    /// Something needs attention.
    Warning,
    /// The operation failed.
    Error,
}

impl ToastKind {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// A transient user-visible notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    /// Text shown to the user.
    pub message: String,
    /// Severity.
    pub kind: ToastKind,
}

impl Toast {
    /// Build a toast.
    pub fn new(message: impl Into<String>, kind: ToastKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Shorthand for a [`ToastKind::Success`] toast.
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(message, ToastKind::Success)
    }
}

/// Message published to a session's update address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    /// Receivers should re-read state and re-render.
    #[serde(default)]
    pub refresh: bool,
    /// Optional notification to show after any refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toast: Option<Toast>,
}

impl UpdateEvent {
    /// Whether the event asks for anything at all.
    pub fn is_meaningful(&self) -> bool {
        self.refresh || self.toast.is_some()
    }
}

/// One thing a mutation wants receivers to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    /// Re-read and re-render.
    Refresh,
    /// Show a toast.
    Notify(Toast),
}

/// Fold intents into a single event.
///
/// Returns `None` when there is nothing to publish. If several toasts are
/// given the last one wins.
pub fn compose<I>(intents: I) -> Option<UpdateEvent>
where
    I: IntoIterator<Item = Intent>,
{
    let event = intents
        .into_iter()
        .fold(UpdateEvent::default(), |mut event, intent| {
            match intent {
                Intent::Refresh => event.refresh = true,
                Intent::Notify(toast) => event.toast = Some(toast),
            }
            event
        });
    event.is_meaningful().then_some(event)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
