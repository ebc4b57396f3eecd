//! Core error types for centralmig.
//!
//! This module provides the [`MigrationError`] enum shared by every crate in
//! the workspace. It covers the failures a planning/execution run can raise
//! (malformed units, missing dependencies, mixed plans, ledger problems) as
//! well as the ambient storage, configuration and I/O errors underneath them.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A `(namespace, name)` pair rendered for error messages.
///
/// Errors live below the migration crate, so they carry a plain display
/// form of the unit identity rather than the richer `UnitKey` type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    /// The namespace the unit belongs to.
    pub namespace: String,
    /// The unit name within the namespace.
    pub name: String,
}

impl NodeRef {
    /// Creates a new node reference.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// The primary error type for centralmig.
///
/// Every error is raised synchronously and unwound to the top-level command.
/// Nothing in the workspace retries; the operator re-invokes the command
/// after fixing the underlying condition. Each variant maps to a process exit
/// code via [`MigrationError::exit_code`].
#[derive(Error, Debug)]
pub enum MigrationError {
    // ── Loader ───────────────────────────────────────────────────────

    /// A discovered unit file does not expose the expected shape.
    #[error("Malformed migration unit {}: {reason}", .path.display())]
    MalformedUnit {
        /// The offending file (or registry entry).
        path: PathBuf,
        /// Why the file was rejected.
        reason: String,
    },

    /// Two sources declared the same `(namespace, name)` identity.
    #[error("Duplicate migration unit {0}")]
    DuplicateUnit(NodeRef),

    // ── Graph ────────────────────────────────────────────────────────

    /// A declared parent or child could not be resolved in the graph.
    #[error("Migration {origin} depends on nonexistent node {node}{}", message_suffix(.message))]
    MissingDependency {
        /// The unit whose declaration could not be resolved.
        origin: String,
        /// The node that is missing.
        node: NodeRef,
        /// Extra diagnostic, e.g. which squash could have accounted for it.
        message: Option<String>,
    },

    /// The dependency graph contains a cycle.
    #[error("Circular dependency in migration graph: {0}")]
    CircularDependency(String),

    /// An applied unit has a parent that is not applied.
    #[error("Inconsistent migration history: {applied} is applied before its dependency {dependency}")]
    InconsistentHistory {
        /// The applied unit.
        applied: NodeRef,
        /// Its unapplied parent.
        dependency: NodeRef,
    },

    /// A dependency named a namespace the registry does not know.
    #[error("Dependency on unknown namespace: {0}")]
    UnknownNamespace(String),

    // ── Planner / executor ───────────────────────────────────────────

    /// A plan mixes forward and backward steps.
    #[error("Migration plans with both forwards and backwards migrations are not supported. Please split your command into multiple commands.")]
    InvalidPlan,

    /// A backward plan contains a unit that cannot be reversed.
    #[error("Migration {unit} is not reversible: {reason}")]
    IrreversibleUnit {
        /// The unit that cannot be unapplied.
        unit: NodeRef,
        /// Which operation blocked it.
        reason: String,
    },

    /// A target name prefix matched more than one unit.
    #[error("More than one migration matches '{prefix}' in namespace '{namespace}': {candidates}")]
    AmbiguousTarget {
        /// The namespace searched.
        namespace: String,
        /// The prefix the caller gave.
        prefix: String,
        /// Comma separated list of matches.
        candidates: String,
    },

    /// A target name prefix matched no unit.
    #[error("Cannot find a migration matching '{prefix}' in namespace '{namespace}'")]
    UnknownTarget {
        /// The namespace searched.
        namespace: String,
        /// The prefix the caller gave.
        prefix: String,
    },

    // ── Ledger ───────────────────────────────────────────────────────

    /// The ledger table could not be created.
    #[error("Unable to create the migration ledger table ({0})")]
    SchemaMissing(String),

    // ── Storage ──────────────────────────────────────────────────────

    /// A generic database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// An operational database error (connection failure, etc.).
    #[error("Operational error: {0}")]
    OperationalError(String),

    /// A query expected exactly one row but found none.
    #[error("Object does not exist: {0}")]
    DoesNotExist(String),

    /// A query expected exactly one row but found several.
    #[error("Multiple objects returned when one expected: {0}")]
    MultipleObjectsReturned(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MigrationError {
    /// Returns the process exit code associated with this error.
    ///
    /// - `UnknownNamespace` -> 2 (usage error)
    /// - Everything else -> 1
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::UnknownNamespace(_) => 2,
            _ => 1,
        }
    }

    /// Creates a plain [`MigrationError::MissingDependency`].
    pub fn missing(origin: impl Into<String>, node: NodeRef) -> Self {
        Self::MissingDependency {
            origin: origin.into(),
            node,
            message: None,
        }
    }
}

fn message_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(". {m}"))
        .unwrap_or_default()
}

/// A convenience type alias for `Result<T, MigrationError>`.
pub type MigrationResult<T> = Result<T, MigrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ref_display() {
        let node = NodeRef::new("billing", "0001_init");
        assert_eq!(node.to_string(), "billing.0001_init");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrationError::UnknownNamespace("x".into()).exit_code(), 2);
        assert_eq!(MigrationError::InvalidPlan.exit_code(), 1);
        assert_eq!(MigrationError::SchemaMissing("x".into()).exit_code(), 1);
        assert_eq!(
            MigrationError::missing("a.b", NodeRef::new("c", "d")).exit_code(),
            1
        );
    }

    #[test]
    fn test_missing_dependency_display_plain() {
        let err = MigrationError::missing("billing.0002", NodeRef::new("billing", "0001"));
        assert_eq!(
            err.to_string(),
            "Migration billing.0002 depends on nonexistent node billing.0001"
        );
    }

    #[test]
    fn test_missing_dependency_display_with_message() {
        let err = MigrationError::MissingDependency {
            origin: "billing.0004".into(),
            node: NodeRef::new("billing", "0002"),
            message: Some("tried billing.0003_squash".into()),
        };
        assert!(err.to_string().ends_with(". tried billing.0003_squash"));
    }

    #[test]
    fn test_malformed_unit_display() {
        let err = MigrationError::MalformedUnit {
            path: PathBuf::from("migrations/bad.json"),
            reason: "missing field `operations`".into(),
        };
        assert!(err.to_string().contains("migrations/bad.json"));
        assert!(err.to_string().contains("operations"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: MigrationError = io_err.into();
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("file missing"));
    }
}
