//! # peeper-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PeeperSettings::default()`]
//! 2. **Settings file**: an explicit path, else `~/.peeper/settings.json`
//!    if it exists (deep-merged over defaults)
//! 3. **Environment variables**: `PEEPER_*` overrides (highest priority)
//!
//! There is no global instance: the binary loads once and hands each
//! component the section it needs.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
