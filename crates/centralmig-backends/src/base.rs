//! Base database backend trait and common types.
//!
//! This module defines the [`DatabaseBackend`] trait that all backend
//! implementations must satisfy, along with [`DatabaseConfig`] for building
//! a backend from settings.

use std::collections::HashMap;

use centralmig_core::settings::DatabaseSettings;
use centralmig_core::{MigrationError, MigrationResult};

use crate::value::{Row, Value};

/// The supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackendType {
    /// `PostgreSQL` via `tokio-postgres`.
    PostgreSQL,
    /// `SQLite` via `rusqlite`.
    SQLite,
}

impl DatabaseBackendType {
    /// Parses an engine name from settings.
    pub fn from_engine(engine: &str) -> MigrationResult<Self> {
        match engine.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::SQLite),
            "postgres" | "postgresql" => Ok(Self::PostgreSQL),
            other => Err(MigrationError::ConfigurationError(format!(
                "Unsupported database engine '{other}'"
            ))),
        }
    }

    /// Returns a parameter placeholder for the given 1-based index.
    ///
    /// - `PostgreSQL`: `$1, $2, $3, ...`
    /// - `SQLite`: `?, ?, ?, ...`
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Self::PostgreSQL => format!("${index}"),
            Self::SQLite => "?".to_string(),
        }
    }
}

/// The core trait for database backends.
///
/// All methods are async because database operations are I/O-bound. Backends
/// that use synchronous drivers (like `rusqlite`) wrap operations in
/// `spawn_blocking` to keep the async interface.
#[async_trait::async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Returns the vendor name (e.g., "postgresql", "sqlite").
    fn vendor(&self) -> &str;

    /// Returns the backend type, used to pick placeholder style.
    fn backend_type(&self) -> DatabaseBackendType;

    /// Executes a SQL statement that does not return rows.
    ///
    /// Returns the number of rows affected.
    async fn execute(&self, sql: &str, params: &[Value]) -> MigrationResult<u64>;

    /// Executes a SQL query and returns all result rows.
    async fn query(&self, sql: &str, params: &[Value]) -> MigrationResult<Vec<Row>>;

    /// Executes a SQL query and returns exactly one row.
    ///
    /// Returns [`MigrationError::DoesNotExist`] if no rows are returned, or
    /// [`MigrationError::MultipleObjectsReturned`] if more than one row is
    /// returned.
    async fn query_one(&self, sql: &str, params: &[Value]) -> MigrationResult<Row> {
        let mut rows = self.query(sql, params).await?;
        match rows.len() {
            0 => Err(MigrationError::DoesNotExist("No rows returned".to_string())),
            1 => Ok(rows.remove(0)),
            n => Err(MigrationError::MultipleObjectsReturned(format!(
                "Expected 1 row, got {n}"
            ))),
        }
    }

    /// Returns `true` if a table with the given name exists.
    async fn has_table(&self, table: &str) -> MigrationResult<bool>;

    /// Begins a new database transaction.
    async fn begin_transaction(&self) -> MigrationResult<()>;

    /// Commits the current transaction.
    async fn commit(&self) -> MigrationResult<()>;

    /// Rolls back the current transaction.
    async fn rollback(&self) -> MigrationResult<()>;
}

/// Configuration for connecting to a database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// The backend type.
    pub backend: DatabaseBackendType,
    /// The database name or file path.
    pub name: String,
    /// The database host (for network-based backends).
    pub host: Option<String>,
    /// The database port.
    pub port: Option<u16>,
    /// The database user.
    pub user: Option<String>,
    /// The database password.
    pub password: Option<String>,
    /// Additional connection options.
    pub options: HashMap<String, String>,
}

impl DatabaseConfig {
    /// Creates a configuration for an in-memory `SQLite` database.
    pub fn sqlite_memory() -> Self {
        Self::sqlite_file(":memory:")
    }

    /// Creates a configuration for a `SQLite` file database.
    pub fn sqlite_file(path: impl Into<String>) -> Self {
        Self {
            backend: DatabaseBackendType::SQLite,
            name: path.into(),
            host: None,
            port: None,
            user: None,
            password: None,
            options: HashMap::new(),
        }
    }

    /// Creates a configuration for a `PostgreSQL` database.
    pub fn postgres(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            backend: DatabaseBackendType::PostgreSQL,
            name: name.into(),
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            options: HashMap::new(),
        }
    }

    /// Builds a configuration from database settings.
    pub fn from_settings(settings: &DatabaseSettings) -> MigrationResult<Self> {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Ok(Self {
            backend: DatabaseBackendType::from_engine(&settings.engine)?,
            name: settings.name.clone(),
            host: non_empty(&settings.host),
            port: (settings.port != 0).then_some(settings.port),
            user: non_empty(&settings.user),
            password: non_empty(&settings.password),
            options: settings.options.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_sqlite_memory() {
        let cfg = DatabaseConfig::sqlite_memory();
        assert_eq!(cfg.backend, DatabaseBackendType::SQLite);
        assert_eq!(cfg.name, ":memory:");
        assert!(cfg.host.is_none());
    }

    #[test]
    fn test_database_config_postgres() {
        let cfg = DatabaseConfig::postgres("lending", "localhost", 5432, "svc", "pass");
        assert_eq!(cfg.backend, DatabaseBackendType::PostgreSQL);
        assert_eq!(cfg.host.as_deref(), Some("localhost"));
        assert_eq!(cfg.port, Some(5432));
    }

    #[test]
    fn test_database_config_from_default_settings() {
        let cfg = DatabaseConfig::from_settings(&DatabaseSettings::default()).unwrap();
        assert_eq!(cfg.backend, DatabaseBackendType::SQLite);
        assert_eq!(cfg.name, "db.sqlite3");
        assert!(cfg.port.is_none());
        assert!(cfg.user.is_none());
    }

    #[test]
    fn test_database_config_unknown_engine() {
        let settings = DatabaseSettings {
            engine: "oracle".into(),
            ..DatabaseSettings::default()
        };
        let err = DatabaseConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, MigrationError::ConfigurationError(_)));
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(DatabaseBackendType::PostgreSQL.placeholder(2), "$2");
        assert_eq!(DatabaseBackendType::SQLite.placeholder(2), "?");
    }
}
