//! Settings system for centralmig.
//!
//! This module provides the [`Settings`] struct, which holds all configuration
//! for a planning/execution run, and [`LazySettings`], a globally-accessible,
//! lazily-initialized settings instance used by the binary. Library code
//! always receives settings explicitly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// The database engine (`sqlite` or `postgresql`).
    pub engine: String,
    /// The database name (or file path for `SQLite`).
    pub name: String,
    /// The database user.
    pub user: String,
    /// The database password.
    pub password: String,
    /// The database host.
    pub host: String,
    /// The database port.
    pub port: u16,
    /// Additional engine-specific options.
    pub options: HashMap<String, String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: "sqlite".to_string(),
            name: "db.sqlite3".to_string(),
            user: String::new(),
            password: String::new(),
            host: String::new(),
            port: 0,
            options: HashMap::new(),
        }
    }
}

/// Where migration units live and how they are recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// The primary unit directory. Loaded strictly: any malformed file aborts.
    pub directory: PathBuf,
    /// The secondary "retro" directory. Loaded tolerantly: malformed files
    /// are reported and skipped.
    pub retro_directory: Option<PathBuf>,
    /// The name of the ledger table.
    pub ledger_table: String,
    /// Maximum length of the description part of a generated unit name.
    pub name_description_limit: usize,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("migrations"),
            retro_directory: None,
            ledger_table: "centralized_migrations".to_string(),
            name_description_limit: 100,
        }
    }
}

/// The complete set of settings.
///
/// # Examples
///
/// ```
/// use centralmig_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert_eq!(settings.migrations.ledger_table, "centralized_migrations");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // ── Core ─────────────────────────────────────────────────────────

    /// Whether debug mode is enabled.
    pub debug: bool,
    /// Known namespaces, in registration order. Namespaces listed here without
    /// any unit are reported as unmigrated.
    pub namespaces: Vec<String>,

    // ── Database ─────────────────────────────────────────────────────

    /// Database configurations, keyed by alias (e.g. "default").
    pub databases: HashMap<String, DatabaseSettings>,

    // ── Migrations ───────────────────────────────────────────────────

    /// Unit discovery and ledger configuration.
    pub migrations: MigrationSettings,
    /// Values for `("__setting__", KEY)` dependencies: setting key to the
    /// namespace it names.
    pub swappable: HashMap<String, String>,

    // ── Logging ──────────────────────────────────────────────────────

    /// The log level (e.g. "info", "debug", "warn").
    pub log_level: String,

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Custom settings that don't fit into the above categories.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut databases = HashMap::new();
        databases.insert("default".to_string(), DatabaseSettings::default());

        Self {
            debug: true,
            namespaces: Vec::new(),
            databases,
            migrations: MigrationSettings::default(),
            swappable: HashMap::new(),
            log_level: "info".to_string(),
            extra: HashMap::new(),
        }
    }
}

impl Settings {
    /// Returns the database settings for an alias.
    pub fn database(&self, alias: &str) -> Option<&DatabaseSettings> {
        self.databases.get(alias)
    }
}

/// A lazily-initialized, globally-accessible settings container.
///
/// Call [`configure`](LazySettings::configure) once at startup to set the
/// settings, then use [`get`](LazySettings::get) to access them.
///
/// # Panics
///
/// [`get`](LazySettings::get) panics if settings have not been configured.
/// [`configure`](LazySettings::configure) panics if called more than once.
pub struct LazySettings {
    inner: OnceLock<Settings>,
}

impl Default for LazySettings {
    fn default() -> Self {
        Self::new()
    }
}

impl LazySettings {
    /// Creates a new, unconfigured `LazySettings`.
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    /// Configures the global settings. Must be called exactly once.
    ///
    /// # Panics
    ///
    /// Panics if settings have already been configured.
    pub fn configure(&self, settings: Settings) {
        self.inner
            .set(settings)
            .expect("Settings have already been configured");
    }

    /// Returns a reference to the configured settings.
    ///
    /// # Panics
    ///
    /// Panics if settings have not been configured.
    pub fn get(&self) -> &Settings {
        self.inner
            .get()
            .expect("Settings have not been configured. Call SETTINGS.configure() first.")
    }

    /// Returns `true` if settings have been configured.
    pub fn is_configured(&self) -> bool {
        self.inner.get().is_some()
    }
}

/// The global settings instance.
pub static SETTINGS: LazySettings = LazySettings::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert!(s.debug);
        assert!(s.namespaces.is_empty());
        assert!(s.swappable.is_empty());
        assert_eq!(s.log_level, "info");
    }

    #[test]
    fn test_default_migration_settings() {
        let s = Settings::default();
        assert_eq!(s.migrations.directory, PathBuf::from("migrations"));
        assert!(s.migrations.retro_directory.is_none());
        assert_eq!(s.migrations.ledger_table, "centralized_migrations");
        assert_eq!(s.migrations.name_description_limit, 100);
    }

    #[test]
    fn test_default_database() {
        let s = Settings::default();
        let db = s.database("default").expect("default db should exist");
        assert_eq!(db.engine, "sqlite");
        assert_eq!(db.name, "db.sqlite3");
        assert!(s.database("replica").is_none());
    }

    #[test]
    fn test_lazy_settings_configure_and_get() {
        let lazy = LazySettings::new();
        assert!(!lazy.is_configured());

        let mut settings = Settings::default();
        settings.debug = false;
        settings.namespaces = vec!["billing".to_string()];

        lazy.configure(settings);
        assert!(lazy.is_configured());
        assert!(!lazy.get().debug);
        assert_eq!(lazy.get().namespaces, vec!["billing".to_string()]);
    }

    #[test]
    #[should_panic(expected = "already been configured")]
    fn test_lazy_settings_double_configure_panics() {
        let lazy = LazySettings::new();
        lazy.configure(Settings::default());
        lazy.configure(Settings::default());
    }

    #[test]
    #[should_panic(expected = "not been configured")]
    fn test_lazy_settings_get_before_configure_panics() {
        let lazy = LazySettings::new();
        let _ = lazy.get();
    }
}
