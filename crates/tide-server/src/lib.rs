//! # tide-server
//!
//! The live-update pipeline and its HTTP boundary.
//!
//! - [`relay`]: per-session pub/sub addresses with bounded subscriber queues
//! - [`stream`]: the `Opening → Streaming → Closing` update stream
//! - [`mutations`]: validate, apply, persist, then publish, one session at a time
//! - [`render`]: fragments pushed to clients
//! - [`session`]: cookie-based session resolution
//! - [`routes`] and [`server`]: axum router, SSE endpoint, graceful shutdown
//! - [`sweeper`]: idle session eviction

#![deny(unsafe_code)]

pub mod health;
pub mod metrics;
pub mod mutations;
pub mod relay;
pub mod render;
pub mod routes;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod stream;
pub mod sweeper;

pub use mutations::{MutationOutcome, MutationService};
pub use relay::{Address, Relay, Subscription};
pub use render::{Fragment, FragmentKind, JsonRenderer, Renderer};
pub use server::{AppState, TideServer};
pub use session::{CookieSessionResolver, SessionResolver};
pub use shutdown::ShutdownCoordinator;
pub use state::StateStore;
pub use stream::{CloseReason, PushSink, StreamManager, StreamOutcome};
