//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SehatSettings::default()`]
//! 2. If `~/.sehat/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `SEHAT_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::SehatSettings;

/// Resolve the path to the settings file (`~/.sehat/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".sehat").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SehatSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an unusable value is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<SehatSettings> {
    load_with_lookup(path, |name| std::env::var(name).ok())
}

/// [`load_settings_from_path`] with an explicit variable lookup.
pub fn load_with_lookup<F>(path: &Path, lookup: F) -> Result<SehatSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(SehatSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SehatSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `SEHAT_*` overrides read through `lookup`.
///
/// Numbers must parse and fall inside the documented range; anything else is
/// logged and ignored so the file/default value stays in effect.
pub fn apply_overrides<F>(settings: &mut SehatSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Endpoints ───────────────────────────────────────────────────
    if let Some(v) = env.string("SEHAT_API_URL") {
        settings.api.base_url = v;
    }
    if let Some(v) = env.string("SEHAT_WS_URL") {
        settings.api.ws_url = Some(v);
    }
    if let Some(v) = env.string("SEHAT_CHAT_URL") {
        settings.api.chat_url = v;
    }
    if let Some(v) = env.u64("SEHAT_REQUEST_TIMEOUT_MS", 100, 600_000) {
        settings.api.request_timeout_ms = v;
    }

    // ── Retry ───────────────────────────────────────────────────────
    if let Some(v) = env.u32("SEHAT_MAX_RETRIES", 0, 10) {
        settings.retry.max_retries = v;
    }
    if let Some(v) = env.u64("SEHAT_RETRY_BASE_DELAY_MS", 0, 60_000) {
        settings.retry.base_delay_ms = v;
    }

    // ── Link ────────────────────────────────────────────────────────
    if let Some(v) = env.u64("SEHAT_CONNECT_TIMEOUT_MS", 100, 120_000) {
        settings.link.connect_timeout_ms = v;
    }
    if let Some(v) = env.u64("SEHAT_HEARTBEAT_INTERVAL_MS", 1000, 600_000) {
        settings.link.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u32("SEHAT_MAX_RECONNECT_ATTEMPTS", 0, 50) {
        settings.link.max_reconnect_attempts = v;
    }

    // ── Logging / output ────────────────────────────────────────────
    if let Some(v) = env.string("SEHAT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("SEHAT_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = env.string("SEHAT_REPORT_DIR") {
        settings.report.output_dir = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u32` within an inclusive range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Variable readers ────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.parsed(name, "u32", |v| parse_u32_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn no_vars(_: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"api": {"baseUrl": "a", "chatUrl": "c"}});
        let source = serde_json::json!({"api": {"baseUrl": "b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["api"]["baseUrl"], "b");
        assert_eq!(merged["api"]["chatUrl"], "c");
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(
            serde_json::json!({"a": 1, "b": 2}),
            serde_json::json!({"a": null}),
        );
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/settings.json");
        let settings = load_with_lookup(path, no_vars).unwrap();
        assert_eq!(settings, SehatSettings::default());
    }

    #[test]
    fn load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"api": {"baseUrl": "https://dx.example.org"}, "link": {"maxReconnectAttempts": 8}}"#,
        )
        .unwrap();

        let settings = load_with_lookup(&path, no_vars).unwrap();
        assert_eq!(settings.api.base_url, "https://dx.example.org");
        assert_eq!(settings.link.max_reconnect_attempts, 8);
        assert_eq!(settings.link.heartbeat_interval_ms, 15_000);
    }

    #[test]
    fn load_invalid_json_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_matches!(load_with_lookup(&path, no_vars), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_unusable_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"api": {"requestTimeoutMs": 0}}"#).unwrap();
        assert_matches!(
            load_with_lookup(&path, no_vars),
            Err(SettingsError::InvalidValue { key: "api.requestTimeoutMs", .. })
        );
    }

    #[test]
    fn env_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"retry": {"maxRetries": 1}}"#).unwrap();

        let settings = load_with_lookup(&path, vars(&[("SEHAT_MAX_RETRIES", "5")])).unwrap();
        assert_eq!(settings.retry.max_retries, 5);
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut s = SehatSettings::default();
        apply_overrides(
            &mut s,
            vars(&[
                ("SEHAT_API_URL", "https://dx.example.org"),
                ("SEHAT_WS_URL", "wss://ws.example.org"),
                ("SEHAT_CONNECT_TIMEOUT_MS", "2500"),
                ("SEHAT_MAX_RECONNECT_ATTEMPTS", "3"),
                ("SEHAT_LOG_LEVEL", "sehat_client=debug"),
                ("SEHAT_LOG_JSON", "yes"),
                ("SEHAT_REPORT_DIR", "/tmp/reports"),
            ]),
        );
        assert_eq!(s.api.base_url, "https://dx.example.org");
        assert_eq!(s.api.ws_url.as_deref(), Some("wss://ws.example.org"));
        assert_eq!(s.link.connect_timeout_ms, 2500);
        assert_eq!(s.link.max_reconnect_attempts, 3);
        assert_eq!(s.logging.level, "sehat_client=debug");
        assert!(s.logging.json);
        assert_eq!(s.report.output_dir, "/tmp/reports");
    }

    #[test]
    fn out_of_range_override_ignored() {
        let mut s = SehatSettings::default();
        apply_overrides(
            &mut s,
            vars(&[
                ("SEHAT_MAX_RETRIES", "99"),
                ("SEHAT_HEARTBEAT_INTERVAL_MS", "5"),
                ("SEHAT_REQUEST_TIMEOUT_MS", "soon"),
            ]),
        );
        assert_eq!(s, SehatSettings::default());
    }

    #[test]
    fn blank_string_override_ignored() {
        let mut s = SehatSettings::default();
        apply_overrides(&mut s, vars(&[("SEHAT_API_URL", "  ")]));
        assert_eq!(s.api.base_url, "http://127.0.0.1:8000");
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "ON"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "No", "off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u32_range("3", 0, 10), Some(3));
        assert_eq!(parse_u32_range("11", 0, 10), None);
        assert_eq!(parse_u64_range(" 1000 ", 1000, 600_000), Some(1000));
        assert_eq!(parse_u64_range("999", 1000, 600_000), None);
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }

    #[test]
    fn settings_path_under_home() {
        assert!(settings_path().ends_with(".sehat/settings.json"));
    }
}
