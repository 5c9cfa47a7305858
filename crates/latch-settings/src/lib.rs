//! # latch-settings
//!
//! Configuration for the Latch relay, loaded once at startup and passed down
//! explicitly.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`LatchSettings::default()`]
//! 2. **Settings file** — `~/.latch/settings.json` or `--config <path>`
//! 3. **Environment variables** — `LATCH_*` / `PORT` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
