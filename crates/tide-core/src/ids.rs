//! Branded ID newtypes.
//!
//! Session identifiers cross a trust boundary (they come back from the
//! client in a cookie), so besides generation there is a strict parser that
//! only accepts the character set this module itself produces.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Longest raw value [`SessionId::parse`] accepts.
pub const MAX_ID_LEN: usize = 128;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix every generated value starts with.
            pub const PREFIX: &'static str = $prefix;

            /// Create a new random ID (`<prefix>_<uuid v7>`).
            #[must_use]
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7().simple()))
            }

            /// Accept an externally supplied value.
            ///
            /// Returns `None` for empty values, values longer than
            /// [`MAX_ID_LEN`], or values containing anything outside
            /// `[A-Za-z0-9_-]`.
            #[must_use]
            pub fn parse(raw: &str) -> Option<Self> {
                let valid = !raw.is_empty()
                    && raw.len() <= MAX_ID_LEN
                    && raw
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
                valid.then(|| Self(raw.to_owned()))
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

branded_id! {
    /// Opaque identifier scoping one client's todo list and update channel.
    SessionId, "sess"
}

branded_id! {
    /// Identifier of one open update stream (one client connection).
    StreamId, "strm"
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
