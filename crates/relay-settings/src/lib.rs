//! # relay-settings
//!
//! Configuration with layered sources for the relay hub.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`RelaySettings::default()`]
//! 2. **User file** — `~/.relay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `RELAY_*` overrides (highest priority)
//!
//! The binary applies its CLI flags on top of the loaded value.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = RelaySettings::default();
        let _path = settings_path();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = RelaySettings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.hub.queue_capacity, 64);
        assert!(settings.hub.echo_to_sender);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.validate().is_ok());
    }
}
