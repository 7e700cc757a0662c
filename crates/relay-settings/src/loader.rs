//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{LogFormat, MIN_HEARTBEAT_INTERVAL_MS, RelaySettings};

/// Resolve the path to the settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or out-of-range values, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
fn load_file_layer(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Split out from [`apply_env_overrides`] so tests do not have to mutate the
/// process environment.
pub fn apply_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = read("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("RELAY_PORT").and_then(|v| checked("RELAY_PORT", &v, |s| {
        parse_u16_range(s, 1, 65535)
    })) {
        settings.server.port = v;
    }
    if let Some(v) = read("RELAY_TEMPLATE_PATH") {
        settings.server.template_path = v;
    }
    if let Some(v) = read("RELAY_MAX_MESSAGE_SIZE").and_then(|v| {
        checked("RELAY_MAX_MESSAGE_SIZE", &v, |s| {
            parse_usize_range(s, 1, 64 * 1024 * 1024)
        })
    }) {
        settings.server.max_message_size = v;
    }

    // ── Hub settings ────────────────────────────────────────────────
    if let Some(v) = read("RELAY_QUEUE_CAPACITY").and_then(|v| {
        checked("RELAY_QUEUE_CAPACITY", &v, |s| parse_usize_range(s, 1, 1_000_000))
    }) {
        settings.hub.queue_capacity = v;
    }
    if let Some(v) = read("RELAY_MAX_CONNECTIONS").and_then(|v| {
        checked("RELAY_MAX_CONNECTIONS", &v, |s| parse_usize_range(s, 1, 1_000_000))
    }) {
        settings.hub.max_connections = v;
    }
    if let Some(v) = read("RELAY_ECHO_TO_SENDER")
        .and_then(|v| checked("RELAY_ECHO_TO_SENDER", &v, parse_bool))
    {
        settings.hub.echo_to_sender = v;
    }
    if let Some(v) = read("RELAY_HEARTBEAT_INTERVAL_MS").and_then(|v| {
        checked("RELAY_HEARTBEAT_INTERVAL_MS", &v, |s| {
            parse_u64_range(s, MIN_HEARTBEAT_INTERVAL_MS, 600_000)
        })
    }) {
        settings.hub.heartbeat_interval_ms = v;
    }
    if let Some(v) = read("RELAY_HEARTBEAT_TIMEOUT_MS").and_then(|v| {
        checked("RELAY_HEARTBEAT_TIMEOUT_MS", &v, |s| {
            parse_u64_range(s, MIN_HEARTBEAT_INTERVAL_MS, 3_600_000)
        })
    }) {
        settings.hub.heartbeat_timeout_ms = v;
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = read("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("RELAY_LOG_FORMAT") {
        match serde_json::from_value::<LogFormat>(Value::String(v.to_lowercase())) {
            Ok(format) => settings.logging.format = format,
            Err(_) => tracing::warn!(key = "RELAY_LOG_FORMAT", value = %v, "unknown log format, ignoring"),
        }
    }
}

fn checked<T>(name: &str, val: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let result = parse(val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_simple_override() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": 10});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 10);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "server": {"port": 8080, "host": "localhost"}
        });
        let source = serde_json::json!({
            "server": {"port": 9090}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replaced() {
        let target = serde_json::json!({"a": [1, 2, 3]});
        let source = serde_json::json!({"a": [9]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], serde_json::json!([9]));
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_file_layer(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.hub.queue_capacity, 64);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"port":9000},"hub":{"echoToSender":false}}"#)
            .unwrap();
        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert!(!settings.hub.echo_to_sender);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_file_layer(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn invalid_value_in_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"hub":{"queueCapacity":0}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    #[test]
    fn zero_heartbeat_interval_in_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"hub":{"heartbeatIntervalMs":0,"heartbeatTimeoutMs":0}}"#,
        )
        .unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = RelaySettings::default();
        apply_overrides(
            &mut settings,
            lookup_from(&[
                ("RELAY_HOST", "127.0.0.1"),
                ("RELAY_PORT", "9999"),
                ("RELAY_QUEUE_CAPACITY", "4"),
                ("RELAY_ECHO_TO_SENDER", "off"),
                ("RELAY_LOG_LEVEL", "debug"),
                ("RELAY_LOG_FORMAT", "JSON"),
            ]),
        );
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9999);
        assert_eq!(settings.hub.queue_capacity, 4);
        assert!(!settings.hub.echo_to_sender);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_overrides_ignored() {
        let mut settings = RelaySettings::default();
        apply_overrides(
            &mut settings,
            lookup_from(&[
                ("RELAY_PORT", "0"),
                ("RELAY_QUEUE_CAPACITY", "lots"),
                ("RELAY_ECHO_TO_SENDER", "maybe"),
                ("RELAY_LOG_FORMAT", "xml"),
            ]),
        );
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.hub.queue_capacity, 64);
        assert!(settings.hub.echo_to_sender);
        assert_eq!(settings.logging.format, LogFormat::Compact);
    }

    #[test]
    fn empty_override_ignored() {
        let mut settings = RelaySettings::default();
        apply_overrides(&mut settings, lookup_from(&[("RELAY_HOST", "")]));
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("80", 1, 65535), Some(80));
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("50", 100, 200), None);
        assert_eq!(parse_usize_range("-1", 0, 10), None);
    }
}
