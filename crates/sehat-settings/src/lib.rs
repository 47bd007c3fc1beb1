//! # sehat-settings
//!
//! Layered configuration for the Sehat diagnosis client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SehatSettings::default()`]
//! 2. **User file**: `~/.sehat/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SEHAT_*` overrides (highest priority)
//!
//! Library types in `sehat-client` take explicit configs built from these
//! values. The global [`get_settings`] cache exists for the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<SehatSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.sehat/settings.json` with env var
/// overrides. If loading fails the compiled defaults are used and the error is
/// logged.
pub fn get_settings() -> &'static SehatSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            SehatSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: SehatSettings) -> std::result::Result<(), SehatSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
