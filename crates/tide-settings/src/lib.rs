//! # tide-settings
//!
//! Configuration with layered sources:
//! 1. **Compiled defaults** ([`TideSettings::default()`])
//! 2. **Settings file** (`tide.json` by default, deep-merged over defaults)
//! 3. **Environment variables** (`TIDE_*` overrides, highest priority)
//!
//! The binary applies its command-line flags on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
