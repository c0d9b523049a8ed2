//! # tether-settings
//!
//! Layered configuration for the tether server, client, and agent binary.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = TetherSettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = TetherSettings::default();
        assert_eq!(settings.server.port, 8787);
        assert_eq!(settings.server.ping_interval_ms, 30_000);
        assert_eq!(settings.client.request_timeout_ms, 30_000);
        assert_eq!(settings.client.reconnect_delay_ms, 3_000);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
    }
}
