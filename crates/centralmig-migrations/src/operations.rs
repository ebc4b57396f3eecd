//! Operations carried by migration units.
//!
//! The graph treats operations as opaque payloads; only the executor looks
//! inside them. Each operation knows how to produce its forward and backward
//! SQL, and may optionally expose a probe used by `--fake-initial` to detect
//! that its effect is already present.

use centralmig_core::{MigrationError, MigrationResult};

use crate::serializer::SerializableOperation;

/// A single operation that can be applied forwards or backwards.
pub trait Operation: Send + Sync {
    /// Returns a human-readable description of this operation.
    fn describe(&self) -> String;

    /// Returns the SQL statements that apply this operation.
    fn database_forwards(&self, namespace: &str) -> MigrationResult<Vec<String>>;

    /// Returns the SQL statements that reverse this operation.
    fn database_backwards(&self, namespace: &str) -> MigrationResult<Vec<String>>;

    /// Returns whether this operation is reversible.
    fn reversible(&self) -> bool;

    /// A query that returns at least one row when this operation's effect is
    /// already present in the database. `None` means the operation cannot
    /// tell, and is ignored when detecting soft-applied initial units.
    fn probe_sql(&self) -> Option<&str> {
        None
    }

    /// Returns the unit-file form of this operation, if it has one.
    fn to_serializable(&self) -> Option<SerializableOperation> {
        None
    }
}

/// Runs raw SQL.
///
/// An empty `sql_backwards` makes the operation irreversible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSQL {
    /// SQL to run in the forward direction.
    pub sql_forwards: String,
    /// SQL to run in the backward direction (empty string = irreversible).
    pub sql_backwards: String,
    /// Optional existence probe for `--fake-initial`.
    pub probe: Option<String>,
}

impl RunSQL {
    /// Creates a new raw SQL operation without a probe.
    pub fn new(sql_forwards: impl Into<String>, sql_backwards: impl Into<String>) -> Self {
        Self {
            sql_forwards: sql_forwards.into(),
            sql_backwards: sql_backwards.into(),
            probe: None,
        }
    }

    /// Attaches an existence probe.
    pub fn with_probe(mut self, probe: impl Into<String>) -> Self {
        self.probe = Some(probe.into());
        self
    }
}

impl Operation for RunSQL {
    fn describe(&self) -> String {
        const PREVIEW: usize = 60;
        let sql = self.sql_forwards.trim();
        if sql.chars().count() > PREVIEW {
            let preview: String = sql.chars().take(PREVIEW).collect();
            format!("Raw SQL: {preview}...")
        } else {
            format!("Raw SQL: {sql}")
        }
    }

    fn database_forwards(&self, _namespace: &str) -> MigrationResult<Vec<String>> {
        Ok(vec![self.sql_forwards.clone()])
    }

    fn database_backwards(&self, _namespace: &str) -> MigrationResult<Vec<String>> {
        if self.sql_backwards.is_empty() {
            Err(MigrationError::DatabaseError(
                "RunSQL operation is not reversible (no backwards SQL provided)".into(),
            ))
        } else {
            Ok(vec![self.sql_backwards.clone()])
        }
    }

    fn reversible(&self) -> bool {
        !self.sql_backwards.is_empty()
    }

    fn probe_sql(&self) -> Option<&str> {
        self.probe.as_deref()
    }

    fn to_serializable(&self) -> Option<SerializableOperation> {
        Some(SerializableOperation::RunSql {
            sql_forwards: self.sql_forwards.clone(),
            sql_backwards: self.sql_backwards.clone(),
            probe: self.probe.clone(),
        })
    }
}

/// Type alias for the closure type used in [`RunRust`] operations.
///
/// The closure receives the unit's namespace.
pub type RustMigrationFn = Box<dyn Fn(&str) -> MigrationResult<()> + Send + Sync>;

/// Runs arbitrary Rust code in a unit.
///
/// The closures run while the executor collects the unit's SQL, so they
/// execute at the point the operation is reached.
pub struct RunRust {
    /// A description of what this code does.
    pub description: String,
    /// The forward closure.
    pub forwards: RustMigrationFn,
    /// The backward closure (None = irreversible).
    pub backwards: Option<RustMigrationFn>,
}

impl RunRust {
    /// Creates an irreversible Rust operation.
    pub fn new(
        description: impl Into<String>,
        forwards: impl Fn(&str) -> MigrationResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            forwards: Box::new(forwards),
            backwards: None,
        }
    }

    /// Adds a backward closure, making the operation reversible.
    pub fn with_backwards(
        mut self,
        backwards: impl Fn(&str) -> MigrationResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.backwards = Some(Box::new(backwards));
        self
    }
}

impl Operation for RunRust {
    fn describe(&self) -> String {
        format!("Run Rust: {}", self.description)
    }

    fn database_forwards(&self, namespace: &str) -> MigrationResult<Vec<String>> {
        (self.forwards)(namespace)?;
        Ok(vec![])
    }

    fn database_backwards(&self, namespace: &str) -> MigrationResult<Vec<String>> {
        match &self.backwards {
            Some(f) => {
                f(namespace)?;
                Ok(vec![])
            }
            None => Err(MigrationError::DatabaseError(
                "RunRust operation is not reversible".into(),
            )),
        }
    }

    fn reversible(&self) -> bool {
        self.backwards.is_some()
    }
}
