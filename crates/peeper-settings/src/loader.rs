//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PeeperSettings::default()`]
//! 2. Deep-merge the settings file over defaults: an explicit `--config`
//!    path must exist, `~/.peeper/settings.json` is optional
//! 3. Apply `PEEPER_*` environment variable overrides (highest priority)
//! 4. [`PeeperSettings::validate`] clamps anything out of range
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::PeeperSettings;

/// Resolve the default settings file path (`~/.peeper/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".peeper").join("settings.json")
}

/// Load settings with env var overrides.
///
/// With `Some(path)` the file must exist. With `None` the default path is
/// used and a missing file means defaults.
pub fn load_settings(explicit: Option<&Path>) -> Result<PeeperSettings> {
    match explicit {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            debug!(?path, "loading settings from explicit path");
            settings_from_str(&content)
        }
        None => load_settings_from_path(&settings_path()),
    }
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<PeeperSettings> {
    if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        settings_from_str(&content)
    } else {
        debug!(?path, "settings file not found, using defaults");
        let mut settings = PeeperSettings::default();
        apply_env_overrides(&mut settings);
        settings.validate();
        Ok(settings)
    }
}

fn settings_from_str(content: &str) -> Result<PeeperSettings> {
    let defaults = serde_json::to_value(PeeperSettings::default())?;
    let user: Value = serde_json::from_str(content)?;
    let mut settings: PeeperSettings = serde_json::from_value(deep_merge(defaults, user))?;
    apply_env_overrides(&mut settings);
    settings.validate();
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

/// Apply `PEEPER_*` environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut PeeperSettings) {
    apply_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup. Keeps env handling testable
/// without mutating the process environment.
pub(crate) fn apply_overrides_with<F>(settings: &mut PeeperSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PEEPER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("PEEPER_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.u64("PEEPER_SEND_INTERVAL_MS", 10, 60_000) {
        settings.server.send_interval_ms = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PEEPER_SERVER_HOST") {
        settings.client.server_host = v;
    }
    if let Some(v) = env.u16("PEEPER_SERVER_PORT", 1, 65535) {
        settings.client.server_port = v;
    }
    if let Some(v) = env.u64("PEEPER_RECONNECT_DELAY_MS", 1, 3_600_000) {
        settings.client.reconnect_delay_ms = v;
    }
    if let Some(v) = env.bool("PEEPER_VERIFY_ACCEPT") {
        settings.client.verify_accept = v;
    }

    // ── Sound ───────────────────────────────────────────────────────
    if let Some(v) = env.unit("PEEPER_SOUND_THRESHOLD") {
        settings.sound.threshold = v;
    }
    if let Some(v) = env.u64("PEEPER_SOUND_COOLDOWN_MS", 0, 3_600_000) {
        settings.sound.cooldown_ms = v;
    }

    // ── Startup / logging ───────────────────────────────────────────
    if let Some(v) = env.bool("PEEPER_STARTUP_RAMP") {
        settings.startup.enabled = v;
    }
    if let Some(v) = env.string("PEEPER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("PEEPER_LOG_JSON") {
        settings.logging.json = v;
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

/// Parse a string as an `f64` in [0.0, 1.0].
pub fn parse_f64_unit(val: &str) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (0.0..=1.0).contains(&n).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

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

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid {kind} env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "boolean", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn unit(&self, name: &str) -> Option<f64> {
        self.parsed(name, "ratio", parse_f64_unit)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 6789, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9000);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": ["bottle", "laptop"]});
        let source = serde_json::json!({"items": ["book"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!(["book"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let merged = deep_merge(target, serde_json::json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.sound.fade_in_ms, 100);
        assert_eq!(settings.startup.steps, 100);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"sound": {"cooldownMs": 8000}, "detection": {"interestingObjects": ["book"]}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.sound.cooldown_ms, 8000);
        assert_eq!(settings.sound.sustain_ms, 2000);
        assert_eq!(settings.detection.interesting_objects, vec!["book".to_string()]);
        assert_eq!(settings.detection.markers.len(), 2);
    }

    #[test]
    fn load_clamps_out_of_range_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"detection": {"personScale": 3.0}}"#).unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert!((settings.detection.person_scale - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let result = load_settings(Some(Path::new("/nonexistent/peeper.json")));
        assert!(matches!(result.unwrap_err(), SettingsError::Io(_)));
    }

    #[test]
    fn explicit_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{"client": {"serverHost": "10.0.0.5"}}"#).unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.client.server_host, "10.0.0.5");
    }

    #[test]
    fn settings_path_ends_with_peeper_dir() {
        let path = settings_path();
        assert!(path.ends_with(".peeper/settings.json"));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = PeeperSettings::default();
        apply_overrides_with(
            &mut settings,
            lookup(&[
                ("PEEPER_PORT", "7000"),
                ("PEEPER_SERVER_HOST", "192.168.1.20"),
                ("PEEPER_RECONNECT_DELAY_MS", "250"),
                ("PEEPER_SOUND_THRESHOLD", "0.65"),
                ("PEEPER_STARTUP_RAMP", "off"),
                ("PEEPER_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.client.server_host, "192.168.1.20");
        assert_eq!(settings.client.reconnect_delay_ms, 250);
        assert!((settings.sound.threshold - 0.65).abs() < f64::EPSILON);
        assert!(!settings.startup.enabled);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = PeeperSettings::default();
        apply_overrides_with(
            &mut settings,
            lookup(&[
                ("PEEPER_PORT", "0"),
                ("PEEPER_SOUND_THRESHOLD", "1.5"),
                ("PEEPER_VERIFY_ACCEPT", "maybe"),
                ("PEEPER_SERVER_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 6789);
        assert!((settings.sound.threshold - 0.5).abs() < f64::EPSILON);
        assert!(settings.client.verify_accept);
        assert_eq!(settings.client.server_host, "peeper.local");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("yes"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("Off"), Some(false));
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("6789", 1, 65535), Some(6789));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 10, 1000), Some(500));
        assert_eq!(parse_u64_range("-1", 0, 10), None);
    }

    #[test]
    fn parse_unit_bounds() {
        assert_eq!(parse_f64_unit("0"), Some(0.0));
        assert_eq!(parse_f64_unit(" 1.0 "), Some(1.0));
        assert_eq!(parse_f64_unit("1.01"), None);
        assert_eq!(parse_f64_unit("NaN"), None);
        assert_eq!(parse_f64_unit("abc"), None);
    }
}
