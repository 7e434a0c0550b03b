//! # tide-core
//!
//! Shared vocabulary for the tide sync pipeline:
//!
//! - **Branded IDs**: [`SessionId`] and [`StreamId`] newtypes
//! - **Todo model**: [`Item`], [`ViewMode`], [`TodoState`] and its transitions
//! - **Mutations**: [`Mutation`] validation, application, and the update it
//!   produces
//! - **Update events**: [`UpdateEvent`], [`Toast`], and the [`compose`]
//!   function that refuses to build empty events
//! - **Errors**: the [`SyncError`] taxonomy

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod mutation;
pub mod todo;
pub mod update;

pub use errors::{Result, SyncError};
pub use ids::{SessionId, StreamId};
pub use mutation::Mutation;
pub use todo::{DEFAULT_ITEMS, Item, NOT_EDITING, TodoState, ViewMode};
pub use update::{Intent, Toast, ToastKind, UpdateEvent, compose};
