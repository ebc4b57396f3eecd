//! The ledger of applied units.
//!
//! One row per applied `(namespace, name)`. Rows are deleted on unapply, not
//! flagged. The backing table is created lazily on first use; uniqueness is
//! left to the storage layer.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use centralmig_backends::{DatabaseBackend, DatabaseBackendType, Value};
use centralmig_core::{MigrationError, MigrationResult};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::migration::UnitKey;

/// The default ledger table name.
pub const DEFAULT_LEDGER_TABLE: &str = "centralized_migrations";

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRecord {
    /// The unit namespace.
    pub namespace: String,
    /// The unit name.
    pub name: String,
    /// When the unit was recorded.
    pub applied_at: DateTime<Utc>,
}

impl AppliedRecord {
    /// Returns the identity this row records.
    pub fn key(&self) -> UnitKey {
        UnitKey::new(&self.namespace, &self.name)
    }
}

/// Durable record of applied units.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Creates the backing store if it does not exist.
    ///
    /// Idempotent. Fails with [`MigrationError::SchemaMissing`] if the store
    /// could not be created.
    async fn ensure_schema(&self) -> MigrationResult<()>;

    /// Returns every row, ordered by application.
    async fn applied_records(&self) -> MigrationResult<Vec<AppliedRecord>>;

    /// Returns the set of applied identities. Calls
    /// [`ensure_schema`](Ledger::ensure_schema) first.
    async fn applied_units(&self) -> MigrationResult<BTreeSet<UnitKey>> {
        self.ensure_schema().await?;
        Ok(self
            .applied_records()
            .await?
            .iter()
            .map(AppliedRecord::key)
            .collect())
    }

    /// Inserts one row for `key`.
    async fn record_applied(&self, key: &UnitKey) -> MigrationResult<()>;

    /// Deletes every row for `key`.
    async fn record_unapplied(&self, key: &UnitKey) -> MigrationResult<()>;

    /// Deletes every row. Reset tooling only.
    async fn flush(&self) -> MigrationResult<()>;
}

/// A ledger stored in a database table.
pub struct DatabaseLedger {
    backend: Arc<dyn DatabaseBackend>,
    table: String,
    has_schema: AtomicBool,
}

impl DatabaseLedger {
    /// Creates a ledger in the default table.
    pub fn new(backend: Arc<dyn DatabaseBackend>) -> Self {
        Self::with_table(backend, DEFAULT_LEDGER_TABLE)
    }

    /// Creates a ledger in a custom table.
    pub fn with_table(backend: Arc<dyn DatabaseBackend>, table: impl Into<String>) -> Self {
        Self {
            backend,
            table: table.into(),
            has_schema: AtomicBool::new(false),
        }
    }

    /// Returns the table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    fn quoted_table(&self) -> String {
        format!("\"{}\"", self.table.replace('"', "\"\""))
    }

    fn create_table_sql(&self) -> String {
        let (id, applied_at) = match self.backend.backend_type() {
            DatabaseBackendType::PostgreSQL => ("SERIAL PRIMARY KEY", "TIMESTAMPTZ"),
            DatabaseBackendType::SQLite => ("INTEGER PRIMARY KEY AUTOINCREMENT", "TEXT"),
        };
        format!(
            "CREATE TABLE {} (\"id\" {id}, \"namespace\" VARCHAR(255) NOT NULL, \
             \"name\" VARCHAR(255) NOT NULL, \"applied_at\" {applied_at} NOT NULL)",
            self.quoted_table()
        )
    }

    fn placeholders(&self) -> (String, String, String) {
        let kind = self.backend.backend_type();
        (kind.placeholder(1), kind.placeholder(2), kind.placeholder(3))
    }
}

#[async_trait]
impl Ledger for DatabaseLedger {
    async fn ensure_schema(&self) -> MigrationResult<()> {
        if self.has_schema.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.backend.has_table(&self.table).await? {
            self.has_schema.store(true, Ordering::Release);
            return Ok(());
        }
        self.backend
            .execute(&self.create_table_sql(), &[])
            .await
            .map_err(|e| MigrationError::SchemaMissing(e.to_string()))?;
        tracing::info!(table = %self.table, "created migration ledger table");
        self.has_schema.store(true, Ordering::Release);
        Ok(())
    }

    async fn applied_records(&self) -> MigrationResult<Vec<AppliedRecord>> {
        if !self.has_schema.load(Ordering::Acquire) && !self.backend.has_table(&self.table).await? {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT \"namespace\", \"name\", \"applied_at\" FROM {} ORDER BY \"id\"",
            self.quoted_table()
        );
        self.backend
            .query(&sql, &[])
            .await?
            .iter()
            .map(|row| -> MigrationResult<AppliedRecord> {
                Ok(AppliedRecord {
                    namespace: row.get("namespace")?,
                    name: row.get("name")?,
                    applied_at: row.get("applied_at")?,
                })
            })
            .collect()
    }

    async fn record_applied(&self, key: &UnitKey) -> MigrationResult<()> {
        self.ensure_schema().await?;
        let (p1, p2, p3) = self.placeholders();
        let sql = format!(
            "INSERT INTO {} (\"namespace\", \"name\", \"applied_at\") VALUES ({p1}, {p2}, {p3})",
            self.quoted_table()
        );
        self.backend
            .execute(
                &sql,
                &[
                    Value::from(key.namespace.as_str()),
                    Value::from(key.name.as_str()),
                    Value::from(Utc::now()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn record_unapplied(&self, key: &UnitKey) -> MigrationResult<()> {
        self.ensure_schema().await?;
        let (p1, p2, _) = self.placeholders();
        let sql = format!(
            "DELETE FROM {} WHERE \"namespace\" = {p1} AND \"name\" = {p2}",
            self.quoted_table()
        );
        self.backend
            .execute(
                &sql,
                &[
                    Value::from(key.namespace.as_str()),
                    Value::from(key.name.as_str()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn flush(&self) -> MigrationResult<()> {
        self.ensure_schema().await?;
        let sql = format!("DELETE FROM {}", self.quoted_table());
        self.backend.execute(&sql, &[]).await?;
        Ok(())
    }
}

/// An in-memory ledger for tests and dry runs.
#[derive(Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<AppliedRecord>>,
    fail_schema: bool,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger whose schema creation always fails.
    pub fn with_failing_schema() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail_schema: true,
        }
    }

    /// Creates a ledger pre-populated with the given identities.
    pub fn with_applied<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<UnitKey>,
    {
        let now = Utc::now();
        let records = keys
            .into_iter()
            .map(Into::into)
            .map(|key: UnitKey| AppliedRecord {
                namespace: key.namespace,
                name: key.name,
                applied_at: now,
            })
            .collect();
        Self {
            records: Mutex::new(records),
            fail_schema: false,
        }
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn ensure_schema(&self) -> MigrationResult<()> {
        if self.fail_schema {
            return Err(MigrationError::SchemaMissing(
                "in-memory ledger configured to fail".into(),
            ));
        }
        Ok(())
    }

    async fn applied_records(&self) -> MigrationResult<Vec<AppliedRecord>> {
        Ok(self.records.lock().await.clone())
    }

    async fn record_applied(&self, key: &UnitKey) -> MigrationResult<()> {
        self.ensure_schema().await?;
        self.records.lock().await.push(AppliedRecord {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            applied_at: Utc::now(),
        });
        Ok(())
    }

    async fn record_unapplied(&self, key: &UnitKey) -> MigrationResult<()> {
        self.ensure_schema().await?;
        self.records
            .lock()
            .await
            .retain(|r| r.namespace != key.namespace || r.name != key.name);
        Ok(())
    }

    async fn flush(&self) -> MigrationResult<()> {
        self.records.lock().await.clear();
        Ok(())
    }
}
