//! # centralmig-backends
//!
//! Database backend implementations for centralmig. Provides query execution,
//! transactions, and table introspection for the ledger and for the SQL
//! operations carried by migration units.
//!
//! Supported backends (each behind a cargo feature):
//! - `PostgreSQL` (`postgres`)
//! - `SQLite` (`sqlite`)

pub mod base;
#[cfg(feature = "postgres")]
pub mod postgresql;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod value;

use std::sync::Arc;

use centralmig_core::settings::DatabaseSettings;
use centralmig_core::{MigrationError, MigrationResult};

pub use base::{DatabaseBackend, DatabaseBackendType, DatabaseConfig};
#[cfg(feature = "postgres")]
pub use postgresql::PostgresBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
pub use value::{FromValue, Row, Value};

/// Opens a backend for the given database settings.
///
/// Returns [`MigrationError::ConfigurationError`] if the engine is unknown or
/// its cargo feature is not enabled.
pub fn connect(settings: &DatabaseSettings) -> MigrationResult<Arc<dyn DatabaseBackend>> {
    let config = DatabaseConfig::from_settings(settings)?;
    tracing::debug!(engine = %settings.engine, name = %config.name, "connecting to database");
    match config.backend {
        #[cfg(feature = "sqlite")]
        DatabaseBackendType::SQLite => Ok(Arc::new(SqliteBackend::open(&config.name)?)),
        #[cfg(feature = "postgres")]
        DatabaseBackendType::PostgreSQL => Ok(Arc::new(PostgresBackend::from_config(&config)?)),
        #[allow(unreachable_patterns)]
        other => Err(MigrationError::ConfigurationError(format!(
            "Database engine {other:?} is not enabled in this build"
        ))),
    }
}
