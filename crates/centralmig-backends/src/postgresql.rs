//! PostgreSQL database backend using `tokio-postgres` and `deadpool-postgres`.
//!
//! This module provides the [`PostgresBackend`] which implements the
//! [`DatabaseBackend`](crate::base::DatabaseBackend) trait using connection
//! pooling via `deadpool-postgres`.

use centralmig_core::{MigrationError, MigrationResult};
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;

use crate::base::{DatabaseBackend, DatabaseBackendType, DatabaseConfig};
use crate::value::{Row, Value};

/// A PostgreSQL database backend.
///
/// Statements run on any pooled connection, except while a transaction is
/// open: [`begin_transaction`](DatabaseBackend::begin_transaction) pins one
/// connection and every statement goes through it until commit or rollback.
pub struct PostgresBackend {
    pool: deadpool_postgres::Pool,
    pinned: Mutex<Option<deadpool_postgres::Object>>,
}

impl PostgresBackend {
    /// Creates a new `PostgresBackend` from a `deadpool-postgres` pool.
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self {
            pool,
            pinned: Mutex::new(None),
        }
    }

    /// Creates a new backend from a [`DatabaseConfig`].
    pub fn from_config(config: &DatabaseConfig) -> MigrationResult<Self> {
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.dbname = Some(config.name.clone());
        pg_config.host.clone_from(&config.host);
        pg_config.port = config.port;
        pg_config.user.clone_from(&config.user);
        pg_config.password.clone_from(&config.password);

        let pool = pg_config
            .create_pool(
                Some(deadpool_postgres::Runtime::Tokio1),
                tokio_postgres::NoTls,
            )
            .map_err(|e| {
                MigrationError::OperationalError(format!("Failed to create pool: {e}"))
            })?;

        Ok(Self::new(pool))
    }

    async fn client(&self) -> MigrationResult<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrationError::OperationalError(format!("Pool error: {e}")))
    }

    /// Converts `Value` parameters to `tokio-postgres` parameters.
    fn value_to_sql_params(params: &[Value]) -> Vec<Box<dyn ToSql + Sync + Send>> {
        params
            .iter()
            .map(|v| -> Box<dyn ToSql + Sync + Send> {
                match v {
                    Value::Null => Box::new(Option::<String>::None),
                    Value::Bool(b) => Box::new(*b),
                    Value::Int(i) => Box::new(*i),
                    Value::Float(f) => Box::new(*f),
                    Value::String(s) => Box::new(s.clone()),
                    Value::Bytes(b) => Box::new(b.clone()),
                    Value::DateTimeTz(dt) => Box::new(*dt),
                    Value::Json(j) => Box::new(j.clone()),
                }
            })
            .collect()
    }

    /// Converts a `tokio_postgres::Row` to our generic `Row`.
    fn convert_row(pg_row: &tokio_postgres::Row) -> Row {
        use tokio_postgres::types::Type;

        let columns: Vec<String> = pg_row
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let values: Vec<Value> = pg_row
            .columns()
            .iter()
            .enumerate()
            .map(|(i, col)| match *col.type_() {
                Type::BOOL => pg_row
                    .try_get::<_, Option<bool>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Bool),
                Type::INT2 => pg_row
                    .try_get::<_, Option<i16>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |v| Value::Int(i64::from(v))),
                Type::INT4 => pg_row
                    .try_get::<_, Option<i32>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |v| Value::Int(i64::from(v))),
                Type::INT8 => pg_row
                    .try_get::<_, Option<i64>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Int),
                Type::FLOAT8 => pg_row
                    .try_get::<_, Option<f64>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Float),
                Type::BYTEA => pg_row
                    .try_get::<_, Option<Vec<u8>>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Bytes),
                Type::TIMESTAMPTZ => pg_row
                    .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::DateTimeTz),
                Type::JSON | Type::JSONB => pg_row
                    .try_get::<_, Option<serde_json::Value>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::Json),
                // Fall back to string representation for everything else
                _ => pg_row
                    .try_get::<_, Option<String>>(i)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::String),
            })
            .collect();

        Row::new(columns, values)
    }
}

#[async_trait::async_trait]
impl DatabaseBackend for PostgresBackend {
    fn vendor(&self) -> &str {
        "postgresql"
    }

    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> MigrationResult<u64> {
        if params.is_empty() {
            // The simple query protocol runs every statement in the string.
            let pinned = self.pinned.lock().await;
            let result = match pinned.as_ref() {
                Some(client) => client.batch_execute(sql).await,
                None => self.client().await?.batch_execute(sql).await,
            };
            result.map_err(|e| MigrationError::DatabaseError(format!("{e}")))?;
            return Ok(0);
        }

        let sql_params = Self::value_to_sql_params(params);
        let param_refs: Vec<&(dyn ToSql + Sync)> = sql_params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let pinned = self.pinned.lock().await;
        let result = match pinned.as_ref() {
            Some(client) => client.execute(sql, &param_refs).await,
            None => self.client().await?.execute(sql, &param_refs).await,
        };
        result.map_err(|e| MigrationError::DatabaseError(format!("{e}")))
    }

    async fn query(&self, sql: &str, params: &[Value]) -> MigrationResult<Vec<Row>> {
        let sql_params = Self::value_to_sql_params(params);
        let param_refs: Vec<&(dyn ToSql + Sync)> = sql_params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let pinned = self.pinned.lock().await;
        let rows = match pinned.as_ref() {
            Some(client) => client.query(sql, &param_refs).await,
            None => self.client().await?.query(sql, &param_refs).await,
        }
        .map_err(|e| MigrationError::DatabaseError(format!("{e}")))?;

        Ok(rows.iter().map(Self::convert_row).collect())
    }

    async fn has_table(&self, table: &str) -> MigrationResult<bool> {
        let rows = self
            .query(
                "SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1",
                &[Value::from(table)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn begin_transaction(&self) -> MigrationResult<()> {
        let mut pinned = self.pinned.lock().await;
        if pinned.is_some() {
            return Err(MigrationError::DatabaseError(
                "A transaction is already open".to_string(),
            ));
        }
        let client = self.client().await?;
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| MigrationError::DatabaseError(format!("{e}")))?;
        *pinned = Some(client);
        Ok(())
    }

    async fn commit(&self) -> MigrationResult<()> {
        let client = self.pinned.lock().await.take().ok_or_else(|| {
            MigrationError::DatabaseError("No transaction is open".to_string())
        })?;
        client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| MigrationError::DatabaseError(format!("{e}")))
    }

    async fn rollback(&self) -> MigrationResult<()> {
        let client = self.pinned.lock().await.take().ok_or_else(|| {
            MigrationError::DatabaseError("No transaction is open".to_string())
        })?;
        client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| MigrationError::DatabaseError(format!("{e}")))
    }
}
