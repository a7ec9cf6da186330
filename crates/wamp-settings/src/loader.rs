//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WampSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `WAMP_*` environment overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};
use wamp_logging::LogFormat;

use crate::errors::Result;
use crate::types::WampSettings;

/// Resolve the path to the settings file (`~/.wamp/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wamp").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WampSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final
/// combination is an error.
pub fn load_settings_from_path(path: &Path) -> Result<WampSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<WampSettings> {
    let defaults = serde_json::to_value(WampSettings::default())?;

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

/// Apply `WAMP_*` environment overrides.
pub fn apply_env_overrides(settings: &mut WampSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` (env var name to raw value).
///
/// Invalid values are ignored with a warning and the file/default value is
/// kept. A timeout of `0` clears the timeout.
pub fn apply_overrides_from<F>(settings: &mut WampSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("WAMP_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("WAMP_PORT", |s| parse_u16_range(s, 0, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = env.parsed("WAMP_MAX_CONNECTIONS", |s| parse_usize_range(s, 1, 100_000)) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.parsed("WAMP_HEARTBEAT_INTERVAL_MS", |s| {
        parse_u64_range(s, 1_000, 600_000)
    }) {
        settings.server.heartbeat_interval_ms = v;
        // keep the timeout at three intervals unless that would shrink it
        settings.server.heartbeat_timeout_ms = settings.server.heartbeat_timeout_ms.max(v * 3);
    }

    // ── RPC ─────────────────────────────────────────────────────────
    if let Some(v) = env.parsed("WAMP_CALL_TIMEOUT_MS", parse_timeout_ms) {
        settings.rpc.call_timeout_ms = v;
    }
    if let Some(v) = env.parsed("WAMP_HANDLER_TIMEOUT_MS", parse_timeout_ms) {
        settings.rpc.handler_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("WAMP_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("WAMP_LOG_FORMAT", LogFormat::parse) {
        settings.logging.format = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a timeout in milliseconds; `0` means no timeout.
pub fn parse_timeout_ms(val: &str) -> Option<Option<u64>> {
    match parse_u64_range(val, 0, 86_400_000)? {
        0 => Some(None),
        ms => Some(Some(ms)),
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::errors::SettingsError;

    fn overrides(pairs: &[(&str, &str)]) -> WampSettings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut settings = WampSettings::default();
        apply_overrides_from(&mut settings, |name| vars.get(name).cloned());
        settings
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = json!({"server": {"port": 9090, "host": "127.0.0.1"}});
        let source = json!({"server": {"port": 7000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 7000);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({"a": 1, "b": 2}), json!({"a": null}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(json!({"items": [1, 2, 3]}), json!({"items": [4]}));
        assert_eq!(merged["items"], json!([4]));
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(json!({"a": 1}), json!({"b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(json!({"a": {"nested": true}}), json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = read_settings_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, WampSettings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 7001, "maxConnections": 3}, "rpc": {"callTimeoutMs": 250}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.port, 7001);
        assert_eq!(settings.server.max_connections, 3);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.rpc.call_timeout_ms, Some(250));
        assert!(settings.rpc.fail_pending_on_close);
    }

    #[test]
    fn null_in_file_keeps_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"host": null}}"#).unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let err = read_settings_file(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn invalid_combination_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"maxConnections": 0}}"#).unwrap();

        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let settings = overrides(&[
            ("WAMP_HOST", "0.0.0.0"),
            ("WAMP_PORT", "8081"),
            ("WAMP_MAX_CONNECTIONS", "5"),
            ("WAMP_CALL_TIMEOUT_MS", "1500"),
            ("WAMP_HANDLER_TIMEOUT_MS", "2500"),
            ("WAMP_LOG_LEVEL", "debug"),
            ("WAMP_LOG_FORMAT", "json"),
        ]);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8081);
        assert_eq!(settings.server.max_connections, 5);
        assert_eq!(settings.rpc.call_timeout_ms, Some(1500));
        assert_eq!(settings.rpc.handler_timeout_ms, Some(2500));
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let settings = overrides(&[
            ("WAMP_PORT", "99999"),
            ("WAMP_MAX_CONNECTIONS", "0"),
            ("WAMP_LOG_FORMAT", "xml"),
            ("WAMP_HOST", ""),
        ]);
        assert_eq!(settings, WampSettings::default());
    }

    #[test]
    fn invalid_env_value_warns() {
        let (logs, _guard) = wamp_logging::capture_logs();
        let _ = overrides(&[("WAMP_PORT", "not-a-port")]);
        assert!(logs.has_event(tracing::Level::WARN, "invalid env var"));
    }

    #[test]
    fn zero_timeout_clears() {
        let mut settings = WampSettings::default();
        settings.rpc.call_timeout_ms = Some(100);
        apply_overrides_from(&mut settings, |name| {
            (name == "WAMP_CALL_TIMEOUT_MS").then(|| "0".to_string())
        });
        assert_eq!(settings.rpc.call_timeout_ms, None);
    }

    #[test]
    fn heartbeat_interval_keeps_timeout_valid() {
        let settings = overrides(&[("WAMP_HEARTBEAT_INTERVAL_MS", "60000")]);
        assert_eq!(settings.server.heartbeat_interval_ms, 60_000);
        assert_eq!(settings.server.heartbeat_timeout_ms, 180_000);
        settings.validate().unwrap();
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("abc", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_u64_range(" 30000 ", 1000, 600_000), Some(30_000));
        assert_eq!(parse_usize_range("50", 1, 10_000), Some(50));
        assert_eq!(parse_usize_range("20000", 1, 10_000), None);
    }

    #[test]
    fn parse_timeouts() {
        assert_eq!(parse_timeout_ms("0"), Some(None));
        assert_eq!(parse_timeout_ms("1500"), Some(Some(1500)));
        assert_eq!(parse_timeout_ms("-1"), None);
    }
}
