//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If `~/.tether/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the intervals and limits that must be non-zero

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::TetherSettings;

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, or a value fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value =
            serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
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
/// Invalid values are ignored with a warning (falling back to file/default).
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("TETHER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_in_range("TETHER_PORT", 0_u16, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_in_range("TETHER_PING_INTERVAL_MS", 100_u64, 3_600_000) {
        settings.server.ping_interval_ms = v;
    }
    if let Some(v) = read_env_in_range("TETHER_MAX_CONNECTIONS", 1_usize, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = read_env_in_range("TETHER_HANDLER_TIMEOUT_MS", 100_u64, 3_600_000) {
        settings.server.handler_timeout_ms = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("TETHER_SERVER_URL") {
        settings.client.server_url = v;
    }
    if let Some(v) = read_env_in_range("TETHER_REQUEST_TIMEOUT_MS", 100_u64, 3_600_000) {
        settings.client.request_timeout_ms = v;
    }
    if let Some(v) = read_env_in_range("TETHER_RECONNECT_DELAY_MS", 10_u64, 3_600_000) {
        settings.client.reconnect_delay_ms = v;
    }

    // ── Auth / logging ──────────────────────────────────────────────
    if let Some(v) = read_env_string("TETHER_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = read_env_string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("TETHER_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Reject settings that would make a timer spin or the server unusable.
pub fn validate(settings: &TetherSettings) -> Result<()> {
    let checks = [
        (settings.server.ping_interval_ms == 0, "server.pingIntervalMs must be > 0"),
        (settings.server.handler_timeout_ms == 0, "server.handlerTimeoutMs must be > 0"),
        (settings.server.max_connections == 0, "server.maxConnections must be > 0"),
        (settings.client.request_timeout_ms == 0, "client.requestTimeoutMs must be > 0"),
        (settings.client.reconnect_delay_ms == 0, "client.reconnectDelayMs must be > 0"),
        (settings.auth.jwt_secret.is_empty(), "auth.jwtSecret must not be empty"),
    ];
    match checks.iter().find(|(bad, _)| *bad) {
        Some((_, message)) => Err(SettingsError::Invalid((*message).to_string())),
        None => Ok(()),
    }
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

/// Parse `val` as a `T` inside `min..=max`.
pub fn parse_in_range<T: FromStr + PartialOrd>(val: &str, min: T, max: T) -> Option<T> {
    let n: T = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "env var is not a boolean, ignoring");
    }
    result
}

fn read_env_in_range<T>(name: &str, min: T, max: T) -> Option<T>
where
    T: FromStr + PartialOrd + Copy + std::fmt::Display,
{
    let val = std::env::var(name).ok()?;
    let result = parse_in_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, %min, %max, "env var out of range, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
