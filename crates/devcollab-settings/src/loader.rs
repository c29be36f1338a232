//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::Settings;

/// `~/.devcollab`, falling back to `/tmp/.devcollab` without a home.
pub fn data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".devcollab")
}

pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Resolve a configured path against the data directory.
pub fn resolve_path(configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir().join(path)
    }
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

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

/// Apply `DEVCOLLAB_*` overrides. Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut Settings) {
    // ── Shared server settings ──────────────────────────────────────
    if let Some(v) = read_env_string("DEVCOLLAB_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_string("DEVCOLLAB_CORS_ORIGINS") {
        settings.server.cors_origins = parse_list(&v);
    }
    if let Some(v) = read_env_usize("DEVCOLLAB_MAX_SEND_QUEUE", 1, 65_536) {
        settings.server.max_send_queue = v;
    }

    // ── Board service ───────────────────────────────────────────────
    if let Some(v) = read_env_u16("DEVCOLLAB_BOARD_PORT", 0, 65535) {
        settings.board.port = v;
    }
    if let Some(v) = read_env_string("DEVCOLLAB_BOARD_DB") {
        settings.board.database_path = v;
    }
    if let Some(v) = read_env_bool("DEVCOLLAB_SEED") {
        settings.board.seed_demo_data = v;
    }
    if let Some(v) = read_env_u64("DEVCOLLAB_SESSION_TTL_SECS", 60, 30 * 24 * 60 * 60) {
        settings.board.session_ttl_secs = v;
    }

    // ── Habitus service ─────────────────────────────────────────────
    if let Some(v) = read_env_u16("DEVCOLLAB_HABITUS_PORT", 0, 65535) {
        settings.habitus.port = v;
    }
    if let Some(v) = read_env_string("DEVCOLLAB_HABITUS_DB") {
        settings.habitus.database_path = v;
    }
    if let Some(v) = read_env_string("DEVCOLLAB_JWT_SECRET") {
        settings.habitus.jwt_secret = Some(v);
    }
    if let Some(v) = read_env_u64("DEVCOLLAB_TOKEN_TTL_MINUTES", 1, 60 * 24 * 30) {
        settings.habitus.token_ttl_minutes = v;
    }

    // ── Telemetry ───────────────────────────────────────────────────
    if let Some(v) = read_env_string("DEVCOLLAB_LOG_LEVEL") {
        settings.telemetry.log_level = v;
    }
    if let Some(v) = read_env_bool("DEVCOLLAB_LOG_TO_SQLITE") {
        settings.telemetry.log_to_sqlite = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Comma-separated list, blanks dropped.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
