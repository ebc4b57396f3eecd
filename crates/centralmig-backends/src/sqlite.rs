//! SQLite database backend using `rusqlite`.
//!
//! This module provides the [`SqliteBackend`] which implements the
//! [`DatabaseBackend`](crate::base::DatabaseBackend) trait using `rusqlite`
//! wrapped in `tokio::task::spawn_blocking` for async compatibility.
//!
//! Features:
//! - WAL mode enabled by default for file databases
//! - In-memory database support via `:memory:` path (great for testing)
//! - Simple `Mutex`-based concurrency control

use std::path::PathBuf;
use std::sync::Arc;

use centralmig_core::{MigrationError, MigrationResult};
use tokio::sync::Mutex;

use crate::base::{DatabaseBackend, DatabaseBackendType};
use crate::value::{Row, Value};

/// A SQLite database backend.
///
/// Uses `rusqlite` for database access with a `Mutex`-based concurrency
/// model. All operations are run via `tokio::task::spawn_blocking` to
/// avoid blocking the async runtime. A single connection is shared, so
/// `BEGIN`/`COMMIT` issued through [`execute`](DatabaseBackend::execute)
/// bracket everything in between.
pub struct SqliteBackend {
    /// The path to the database file (or ":memory:").
    path: PathBuf,
    /// The connection, guarded by an async mutex.
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteBackend {
    /// Opens a new SQLite database at the given path.
    ///
    /// If the path is `:memory:`, an in-memory database is created.
    pub fn open(path: impl Into<PathBuf>) -> MigrationResult<Self> {
        let path = path.into();
        let in_memory = path.to_str() == Some(":memory:");
        let conn = if in_memory {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| MigrationError::OperationalError(format!("SQLite open failed: {e}")))?;

        let pragmas = if in_memory {
            "PRAGMA foreign_keys=ON;"
        } else {
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;"
        };
        conn.execute_batch(pragmas).map_err(|e| {
            MigrationError::OperationalError(format!("Failed to set pragmas: {e}"))
        })?;

        tracing::debug!(path = %path.display(), "opened sqlite database");

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database (convenience constructor).
    pub fn memory() -> MigrationResult<Self> {
        Self::open(":memory:")
    }

    /// Returns the database file path.
    pub const fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Binds `Value` parameters to a `rusqlite` statement.
    fn bind_params(
        stmt: &mut rusqlite::Statement<'_>,
        params: &[Value],
    ) -> MigrationResult<()> {
        for (i, param) in params.iter().enumerate() {
            let idx = i + 1;
            match param {
                Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
                Value::Int(v) => stmt.raw_bind_parameter(idx, v),
                Value::Float(v) => stmt.raw_bind_parameter(idx, v),
                Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::DateTimeTz(dt) => stmt.raw_bind_parameter(idx, dt.to_rfc3339().as_str()),
                Value::Json(j) => stmt.raw_bind_parameter(idx, j.to_string().as_str()),
            }
            .map_err(|e| MigrationError::DatabaseError(format!("Bind error: {e}")))?;
        }
        Ok(())
    }

    /// Converts a `rusqlite::Row` to our generic `Row`.
    fn convert_row(sqlite_row: &rusqlite::Row<'_>, column_names: &[String]) -> Row {
        let values: Vec<Value> = (0..column_names.len())
            .map(|i| {
                match sqlite_row.get_ref(i).unwrap_or(rusqlite::types::ValueRef::Null) {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(v) => Value::Int(v),
                    rusqlite::types::ValueRef::Real(v) => Value::Float(v),
                    rusqlite::types::ValueRef::Text(b) => {
                        Value::String(String::from_utf8_lossy(b).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
                }
            })
            .collect();

        Row::new(column_names.to_vec(), values)
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::ToSqlOutput;
        Ok(match self {
            Self::Null => ToSqlOutput::from(rusqlite::types::Null),
            Self::Bool(b) => ToSqlOutput::from(*b),
            Self::Int(v) => ToSqlOutput::from(*v),
            Self::Float(v) => ToSqlOutput::from(*v),
            Self::String(s) => ToSqlOutput::from(s.as_str()),
            Self::Bytes(b) => ToSqlOutput::from(b.as_slice()),
            Self::DateTimeTz(dt) => ToSqlOutput::from(dt.to_rfc3339()),
            Self::Json(j) => ToSqlOutput::from(j.to_string()),
        })
    }
}

#[async_trait::async_trait]
impl DatabaseBackend for SqliteBackend {
    fn vendor(&self) -> &str {
        "sqlite"
    }

    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> MigrationResult<u64> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params = params.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            // Unparameterized SQL may hold several statements; run them all.
            if params.is_empty() {
                conn.execute_batch(&sql)
                    .map_err(|e| MigrationError::DatabaseError(format!("{e}")))?;
                return Ok(conn.changes());
            }
            // A trailing statement after a parameterized one is rejected.
            let count = conn
                .execute(&sql, rusqlite::params_from_iter(params.iter()))
                .map_err(|e| MigrationError::DatabaseError(format!("{e}")))?;
            Ok(count as u64)
        })
        .await
        .map_err(|e| MigrationError::DatabaseError(format!("Task join error: {e}")))?
    }

    async fn query(&self, sql: &str, params: &[Value]) -> MigrationResult<Vec<Row>> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params = params.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| MigrationError::DatabaseError(format!("{e}")))?;

            let column_names: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(String::from)
                .collect();

            Self::bind_params(&mut stmt, &params)?;

            let mut raw_rows = stmt.raw_query();
            let mut rows = Vec::new();
            while let Some(row) = raw_rows
                .next()
                .map_err(|e| MigrationError::DatabaseError(format!("{e}")))?
            {
                rows.push(Self::convert_row(row, &column_names));
            }

            Ok(rows)
        })
        .await
        .map_err(|e| MigrationError::DatabaseError(format!("Task join error: {e}")))?
    }

    async fn has_table(&self, table: &str) -> MigrationResult<bool> {
        let rows = self
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[Value::from(table)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn begin_transaction(&self) -> MigrationResult<()> {
        self.execute("BEGIN", &[]).await?;
        Ok(())
    }

    async fn commit(&self) -> MigrationResult<()> {
        self.execute("COMMIT", &[]).await?;
        Ok(())
    }

    async fn rollback(&self) -> MigrationResult<()> {
        self.execute("ROLLBACK", &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_memory_open() {
        let backend = SqliteBackend::memory().unwrap();
        assert_eq!(backend.vendor(), "sqlite");
        assert_eq!(backend.backend_type(), DatabaseBackendType::SQLite);
        assert_eq!(backend.path(), &PathBuf::from(":memory:"));
    }

    #[tokio::test]
    async fn test_sqlite_insert_and_query() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute(
                "CREATE TABLE loans (id INTEGER PRIMARY KEY, borrower TEXT, amount INTEGER)",
                &[],
            )
            .await
            .unwrap();

        backend
            .execute(
                "INSERT INTO loans (borrower, amount) VALUES (?, ?)",
                &[Value::from("Alice"), Value::from(3000)],
            )
            .await
            .unwrap();

        let rows = backend
            .query("SELECT id, borrower, amount FROM loans", &[])
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<String>("borrower").unwrap(), "Alice");
        assert_eq!(rows[0].get::<i64>("amount").unwrap(), 3000);
    }

    #[tokio::test]
    async fn test_sqlite_query_one_not_found() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE test (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();

        let result = backend
            .query_one("SELECT id FROM test WHERE id = ?", &[Value::from(999)])
            .await;

        assert!(matches!(result, Err(MigrationError::DoesNotExist(_))));
    }

    #[tokio::test]
    async fn test_sqlite_query_one_multiple() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE test (id INTEGER PRIMARY KEY, val TEXT)", &[])
            .await
            .unwrap();
        for val in ["a", "b"] {
            backend
                .execute("INSERT INTO test (val) VALUES (?)", &[Value::from(val)])
                .await
                .unwrap();
        }

        let result = backend.query_one("SELECT val FROM test", &[]).await;
        assert!(matches!(result, Err(MigrationError::MultipleObjectsReturned(_))));
    }

    #[tokio::test]
    async fn test_sqlite_null_and_timestamp() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE t (note TEXT, at TEXT)", &[])
            .await
            .unwrap();

        let now = chrono::Utc::now();
        backend
            .execute(
                "INSERT INTO t (note, at) VALUES (?, ?)",
                &[Value::Null, Value::from(now)],
            )
            .await
            .unwrap();

        let row = backend.query_one("SELECT note, at FROM t", &[]).await.unwrap();
        assert_eq!(row.get::<Option<String>>("note").unwrap(), None);
        let at = row.get::<chrono::DateTime<chrono::Utc>>("at").unwrap();
        assert_eq!(at.timestamp(), now.timestamp());
    }

    #[tokio::test]
    async fn test_sqlite_has_table() {
        let backend = SqliteBackend::memory().unwrap();
        assert!(!backend.has_table("ledger").await.unwrap());
        backend
            .execute("CREATE TABLE ledger (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
        assert!(backend.has_table("ledger").await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_transaction_rollback() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();

        backend.begin_transaction().await.unwrap();
        backend.execute("INSERT INTO t (id) VALUES (1)", &[]).await.unwrap();
        backend.rollback().await.unwrap();

        let rows = backend.query("SELECT id FROM t", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_transaction_commit() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();

        backend.begin_transaction().await.unwrap();
        backend.execute("INSERT INTO t (id) VALUES (1)", &[]).await.unwrap();
        backend.commit().await.unwrap();

        let rows = backend.query("SELECT id FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_execute_runs_every_statement() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute(
                "CREATE TABLE a (x INTEGER); CREATE TABLE b (x INTEGER);\n\
                 INSERT INTO b (x) VALUES (7);",
                &[],
            )
            .await
            .unwrap();
        assert!(backend.has_table("a").await.unwrap());
        assert!(backend.has_table("b").await.unwrap());
        let row = backend.query_one("SELECT x FROM b", &[]).await.unwrap();
        assert_eq!(row.get::<i64>("x").unwrap(), 7);
    }

    #[tokio::test]
    async fn test_sqlite_execute_rejects_trailing_statement_with_params() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
        let result = backend
            .execute(
                "INSERT INTO t (id) VALUES (?); DROP TABLE t",
                &[Value::from(1)],
            )
            .await;
        assert!(matches!(result, Err(MigrationError::DatabaseError(_))));
        assert!(backend.has_table("t").await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_invalid_sql() {
        let backend = SqliteBackend::memory().unwrap();
        let result = backend.execute("NOT SQL AT ALL", &[]).await;
        assert!(matches!(result, Err(MigrationError::DatabaseError(_))));
    }

    #[tokio::test]
    async fn test_sqlite_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.sqlite3");
        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend
                .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
                .await
                .unwrap();
        }
        let reopened = SqliteBackend::open(&path).unwrap();
        assert!(reopened.has_table("t").await.unwrap());
    }
}
