//! Settings loading from configuration files.
//!
//! This module provides functions to load [`Settings`] from TOML files, JSON
//! files, and to apply environment variable overrides.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `CENTRALMIG_DEBUG` | `debug` |
//! | `CENTRALMIG_LOG_LEVEL` | `log_level` |
//! | `CENTRALMIG_NAMESPACES` | `namespaces` (comma-separated) |
//! | `CENTRALMIG_MIGRATIONS_DIR` | `migrations.directory` |
//! | `CENTRALMIG_RETRO_DIR` | `migrations.retro_directory` |
//! | `CENTRALMIG_LEDGER_TABLE` | `migrations.ledger_table` |
//! | `CENTRALMIG_DATABASE_NAME` | `databases.default.name` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use centralmig_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file("centralmig.toml").unwrap();
//! let settings = settings_loader::from_file_with_env("centralmig.json").unwrap();
//! ```

use std::path::{Path, PathBuf};

use crate::error::MigrationError;
use crate::settings::Settings;

/// Loads settings from a TOML string.
///
/// Any fields not present in the TOML keep their default values.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or cannot be deserialized.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, MigrationError> {
    // Deserialize into a JSON value first so it can be merged over the
    // serialized defaults.
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| MigrationError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;

    merge_over_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, MigrationError> {
    let content = read_config(path.as_ref(), "TOML")?;
    from_toml_str(&content)
}

/// Loads settings from a JSON string.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or cannot be deserialized.
pub fn from_json_str(json_str: &str) -> Result<Settings, MigrationError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| MigrationError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;

    merge_over_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is malformed.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<Settings, MigrationError> {
    let content = read_config(path.as_ref(), "JSON")?;
    from_json_str(&content)
}

/// Loads settings from a TOML or JSON file (picked by extension) and then
/// applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read, has an unsupported
/// extension, or is malformed.
pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Settings, MigrationError> {
    let path = path.as_ref();
    let mut settings = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => from_toml_file(path)?,
        Some("json") => from_json_file(path)?,
        _ => {
            return Err(MigrationError::ConfigurationError(format!(
                "Unsupported settings file '{}': expected .toml or .json",
                path.display()
            )))
        }
    };
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies environment variable overrides to a settings struct.
///
/// `CENTRALMIG_DEBUG` accepts "true"/"1"/"yes"; anything else is false.
/// `CENTRALMIG_RETRO_DIR` set to an empty string clears the retro directory.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(val) = std::env::var("CENTRALMIG_DEBUG") {
        settings.debug = matches!(val.to_lowercase().as_str(), "true" | "1" | "yes");
    }

    if let Ok(val) = std::env::var("CENTRALMIG_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Ok(val) = std::env::var("CENTRALMIG_NAMESPACES") {
        settings.namespaces = val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    if let Ok(val) = std::env::var("CENTRALMIG_MIGRATIONS_DIR") {
        settings.migrations.directory = PathBuf::from(val);
    }

    if let Ok(val) = std::env::var("CENTRALMIG_RETRO_DIR") {
        settings.migrations.retro_directory = if val.is_empty() {
            None
        } else {
            Some(PathBuf::from(val))
        };
    }

    if let Ok(val) = std::env::var("CENTRALMIG_LEDGER_TABLE") {
        settings.migrations.ledger_table = val;
    }

    if let Ok(val) = std::env::var("CENTRALMIG_DATABASE_NAME") {
        settings
            .databases
            .entry("default".to_string())
            .or_default()
            .name = val;
    }
}

// ============================================================
// Helpers
// ============================================================

fn read_config(path: &Path, kind: &str) -> Result<String, MigrationError> {
    std::fs::read_to_string(path).map_err(|e| {
        MigrationError::ConfigurationError(format!(
            "Failed to read {kind} file '{}': {e}",
            path.display()
        ))
    })
}

fn merge_over_defaults(
    value: serde_json::Value,
    kind: &str,
) -> Result<Settings, MigrationError> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        MigrationError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    serde_json::from_value(merged).map_err(|e| {
        MigrationError::ConfigurationError(format!("Failed to deserialize settings from {kind}: {e}"))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, serde_json::Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            debug = false
            namespaces = ["billing", "collections"]
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.namespaces, vec!["billing", "collections"]);
        // Defaults preserved
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.migrations.ledger_table, "centralized_migrations");
    }

    #[test]
    fn test_from_toml_str_migrations_section() {
        let toml = r#"
            [migrations]
            directory = "db/units"
            retro_directory = "db/retro"
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.migrations.directory, PathBuf::from("db/units"));
        assert_eq!(
            settings.migrations.retro_directory,
            Some(PathBuf::from("db/retro"))
        );
        // Untouched keys in the same table keep their defaults
        assert_eq!(settings.migrations.ledger_table, "centralized_migrations");
        assert_eq!(settings.migrations.name_description_limit, 100);
    }

    #[test]
    fn test_from_toml_str_swappable() {
        let toml = r#"
            [swappable]
            USER_NAMESPACE = "accounts"
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(
            settings.swappable.get("USER_NAMESPACE").map(String::as_str),
            Some("accounts")
        );
    }

    #[test]
    fn test_from_toml_str_databases() {
        let toml = r#"
            [databases.default]
            engine = "postgresql"
            name = "lending"
            user = "svc"
            password = "secret"
            host = "localhost"
            port = 5432
        "#;

        let settings = from_toml_str(toml).unwrap();
        let db = settings.database("default").unwrap();
        assert_eq!(db.engine, "postgresql");
        assert_eq!(db.name, "lending");
        assert_eq!(db.port, 5432);
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert!(settings.debug);
        assert!(settings.namespaces.is_empty());
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let result = from_toml_str("[[invalid toml content");
        assert!(result.is_err());
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{
            "debug": false,
            "log_level": "debug",
            "migrations": {"ledger_table": "unit_ledger"}
        }"#;

        let settings = from_json_str(json).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.migrations.ledger_table, "unit_ledger");
        assert_eq!(settings.migrations.directory, PathBuf::from("migrations"));
    }

    #[test]
    fn test_from_json_str_invalid() {
        let result = from_json_str("{invalid json");
        assert!(result.is_err());
    }

    // ── File loading ────────────────────────────────────────────────

    #[test]
    fn test_from_file_with_env_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("centralmig.toml");
        std::fs::write(&path, "namespaces = [\"billing\"]\n").unwrap();

        let settings = from_file_with_env(&path).unwrap();
        assert_eq!(settings.namespaces, vec!["billing"]);
    }

    #[test]
    fn test_from_file_with_env_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("centralmig.json");
        std::fs::write(&path, r#"{"log_level": "warn"}"#).unwrap();

        let settings = from_file_with_env(&path).unwrap();
        assert_eq!(settings.log_level, "warn");
    }

    #[test]
    fn test_from_file_with_env_unsupported_extension() {
        let result = from_file_with_env("settings.yaml");
        assert!(matches!(result, Err(MigrationError::ConfigurationError(_))));
    }

    #[test]
    fn test_from_toml_file_missing() {
        let result = from_toml_file("/nonexistent/path/settings.toml");
        assert!(result.is_err());
    }

    // ── Environment variable overrides ──────────────────────────────
    // Each test touches a distinct variable so they can run in parallel.

    #[test]
    fn test_apply_env_overrides_namespaces() {
        let mut settings = Settings::default();
        std::env::set_var("CENTRALMIG_NAMESPACES", "billing, collections,,fraud");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.namespaces, vec!["billing", "collections", "fraud"]);
        std::env::remove_var("CENTRALMIG_NAMESPACES");
    }

    #[test]
    fn test_apply_env_overrides_retro_dir() {
        let mut settings = Settings::default();
        std::env::set_var("CENTRALMIG_RETRO_DIR", "retro");
        apply_env_overrides(&mut settings);
        assert_eq!(
            settings.migrations.retro_directory,
            Some(PathBuf::from("retro"))
        );

        std::env::set_var("CENTRALMIG_RETRO_DIR", "");
        apply_env_overrides(&mut settings);
        assert!(settings.migrations.retro_directory.is_none());
        std::env::remove_var("CENTRALMIG_RETRO_DIR");
    }

    #[test]
    fn test_apply_env_overrides_ledger_table() {
        let mut settings = Settings::default();
        std::env::set_var("CENTRALMIG_LEDGER_TABLE", "ledger_v2");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.migrations.ledger_table, "ledger_v2");
        std::env::remove_var("CENTRALMIG_LEDGER_TABLE");
    }

    #[test]
    fn test_apply_env_overrides_database_name() {
        let mut settings = Settings::default();
        std::env::set_var("CENTRALMIG_DATABASE_NAME", ":memory:");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.database("default").unwrap().name, ":memory:");
        std::env::remove_var("CENTRALMIG_DATABASE_NAME");
    }

    // ── merge_json helper ───────────────────────────────────────────

    #[test]
    fn test_merge_json_nested() {
        let base = serde_json::json!({"outer": {"a": 1, "b": 2}});
        let over = serde_json::json!({"outer": {"b": 3}});
        let merged = merge_json(base, over);
        assert_eq!(merged["outer"]["a"], 1);
        assert_eq!(merged["outer"]["b"], 3);
    }

    #[test]
    fn test_merge_json_array_override() {
        let base = serde_json::json!({"list": [1, 2, 3]});
        let over = serde_json::json!({"list": [4, 5]});
        let merged = merge_json(base, over);
        // Arrays are replaced, not merged
        assert_eq!(merged["list"], serde_json::json!([4, 5]));
    }

    #[test]
    fn test_toml_to_json() {
        let toml_val: toml::Value = toml::from_str(
            r#"
            name = "test"
            count = 42
            flag = true
            items = [1, 2, 3]
            [nested]
            key = "value"
        "#,
        )
        .unwrap();

        let json = toml_to_json(toml_val);
        assert_eq!(json["name"], "test");
        assert_eq!(json["count"], 42);
        assert_eq!(json["flag"], true);
        assert_eq!(json["items"], serde_json::json!([1, 2, 3]));
        assert_eq!(json["nested"]["key"], "value");
    }
}
