//! Unit file serialization and deserialization.
//!
//! Provides the JSON shape shared by the loader (which reads unit files) and
//! the writer used by `makemigrations` and `arrangemigrations`. A unit file
//! looks like:
//!
//! ```json
//! {
//!   "namespace": "billing",
//!   "initial": false,
//!   "dependencies": [["billing", "0001_init"], ["audit", "__first__"]],
//!   "run_before": [],
//!   "replaces": [],
//!   "operations": [
//!     {"type": "run_sql", "sql_forwards": "ALTER TABLE ...", "sql_backwards": ""}
//!   ]
//! }
//! ```
//!
//! The unit name is the file stem and is not stored in the file.

use std::path::{Path, PathBuf};

use centralmig_core::{MigrationError, MigrationResult};
use serde::{Deserialize, Serialize};

use crate::migration::{DependencyRef, MigrationUnit, UnitKey};
use crate::operations::RunSQL;

const fn default_true() -> bool {
    true
}

/// The on-disk representation of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFile {
    /// The namespace. Only consulted when the file name does not carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Whether this is the namespace's initial unit.
    #[serde(default)]
    pub initial: bool,
    /// Whether operations run inside one transaction.
    #[serde(default = "default_true")]
    pub atomic: bool,
    /// Dependencies as `[namespace, name]` pairs; sentinels allowed.
    #[serde(default)]
    pub dependencies: Vec<(String, String)>,
    /// Units that must run after this one.
    #[serde(default)]
    pub run_before: Vec<(String, String)>,
    /// Units this one supersedes.
    #[serde(default)]
    pub replaces: Vec<(String, String)>,
    /// The operations to apply.
    pub operations: Vec<SerializableOperation>,
}

/// A serializable representation of a single operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SerializableOperation {
    /// Execute raw SQL.
    RunSql {
        /// Forward SQL.
        sql_forwards: String,
        /// Backward SQL. Empty means irreversible.
        #[serde(default)]
        sql_backwards: String,
        /// Existence probe used by `--fake-initial`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        probe: Option<String>,
    },
}

impl SerializableOperation {
    /// Converts back into an executable operation.
    pub fn to_operation(&self) -> RunSQL {
        match self {
            Self::RunSql {
                sql_forwards,
                sql_backwards,
                probe,
            } => RunSQL {
                sql_forwards: sql_forwards.clone(),
                sql_backwards: sql_backwards.clone(),
                probe: probe.clone(),
            },
        }
    }
}

impl UnitFile {
    /// Deserializes a unit file from a JSON string.
    pub fn from_json(json: &str) -> MigrationResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            MigrationError::SerializationError(format!("Failed to deserialize unit: {e}"))
        })
    }

    /// Serializes this unit file to a pretty JSON string.
    pub fn to_json(&self) -> MigrationResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            MigrationError::SerializationError(format!("Failed to serialize unit: {e}"))
        })
    }

    /// Builds the unit file form of a unit.
    ///
    /// Fails if any operation has no file representation.
    pub fn from_unit(unit: &MigrationUnit) -> MigrationResult<Self> {
        let operations = unit
            .operations
            .iter()
            .map(|op| {
                op.to_serializable().ok_or_else(|| {
                    MigrationError::SerializationError(format!(
                        "Operation '{}' in {} cannot be written to a unit file",
                        op.describe(),
                        unit.key
                    ))
                })
            })
            .collect::<MigrationResult<Vec<_>>>()?;

        Ok(Self {
            namespace: Some(unit.key.namespace.clone()),
            initial: unit.initial,
            atomic: unit.atomic,
            dependencies: unit.dependencies.iter().map(DependencyRef::to_pair).collect(),
            run_before: unit.run_before.iter().map(UnitKey::to_pair).collect(),
            replaces: unit.replaces.iter().map(UnitKey::to_pair).collect(),
            operations,
        })
    }

    /// Converts into a unit with the given identity.
    pub fn into_unit(self, namespace: &str, name: &str) -> MigrationUnit {
        let mut unit = MigrationUnit::new(namespace, name);
        unit.initial = self.initial;
        unit.atomic = self.atomic;
        unit.dependencies = self
            .dependencies
            .iter()
            .map(|(ns, n)| DependencyRef::parse(ns, n))
            .collect();
        unit.run_before = self
            .run_before
            .iter()
            .map(|(ns, n)| UnitKey::new(ns, n))
            .collect();
        unit.replaces = self
            .replaces
            .iter()
            .map(|(ns, n)| UnitKey::new(ns, n))
            .collect();
        for op in &self.operations {
            unit = unit.add_operation(op.to_operation());
        }
        unit
    }
}

/// Returns the path where a unit file should be written.
pub fn unit_file_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.json"))
}

/// Writes a unit to `<dir>/<name>.json`.
///
/// With `dry_run` nothing touches the filesystem. Returns the target path and
/// the rendered file content either way.
pub fn write_unit(
    dir: &Path,
    unit: &MigrationUnit,
    dry_run: bool,
) -> MigrationResult<(PathBuf, String)> {
    let content = UnitFile::from_unit(unit)?.to_json()?;
    let path = unit_file_path(dir, unit.name());
    if !dry_run {
        std::fs::create_dir_all(dir)?;
        std::fs::write(&path, &content)?;
        tracing::debug!(path = %path.display(), unit = %unit.key, "wrote unit file");
    }
    Ok((path, content))
}

/// Creates a unit with no operations.
///
/// The unit depends on `leaf` (the namespace's current leaf) when there is
/// one, and is marked initial otherwise.
pub fn empty_unit(namespace: &str, name: &str, leaf: Option<&UnitKey>) -> MigrationUnit {
    let unit = MigrationUnit::new(namespace, name);
    match leaf {
        Some(parent) => unit.depends_on_ref(DependencyRef::Concrete(parent.clone())),
        None => unit.as_initial(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::RunRust;

    // ── UnitFile ────────────────────────────────────────────────────

    #[test]
    fn test_unit_file_defaults() {
        let file = UnitFile::from_json(r#"{"operations": []}"#).unwrap();
        assert!(file.namespace.is_none());
        assert!(!file.initial);
        assert!(file.atomic);
        assert!(file.dependencies.is_empty());
        assert!(file.replaces.is_empty());
    }

    #[test]
    fn test_unit_file_missing_operations() {
        let err = UnitFile::from_json(r#"{"initial": true}"#).unwrap_err();
        assert!(err.to_string().contains("operations"));
    }

    #[test]
    fn test_unit_file_into_unit() {
        let json = r#"{
            "dependencies": [["billing", "0001_init"], ["audit", "__first__"]],
            "run_before": [["collections", "0001_init"]],
            "operations": [
                {"type": "run_sql", "sql_forwards": "ALTER TABLE invoice ADD COLUMN due TEXT"}
            ]
        }"#;
        let unit = UnitFile::from_json(json)
            .unwrap()
            .into_unit("billing", "0002_add_field");

        assert_eq!(unit.key, UnitKey::new("billing", "0002_add_field"));
        assert_eq!(
            unit.dependencies,
            vec![
                DependencyRef::Concrete(UnitKey::new("billing", "0001_init")),
                DependencyRef::NamespaceFirst("audit".into()),
            ]
        );
        assert_eq!(unit.run_before, vec![UnitKey::new("collections", "0001_init")]);
        assert_eq!(unit.operations.len(), 1);
        assert!(!unit.operations[0].reversible());
    }

    #[test]
    fn test_unit_file_from_unit() {
        let unit = MigrationUnit::new("billing", "0003_squash")
            .replacing("billing", "0001_init")
            .replacing("billing", "0002_add_field")
            .depends_on("__setting__", "USER_NAMESPACE")
            .add_operation(RunSQL::new("SELECT 1", "SELECT 2"));
        let file = UnitFile::from_unit(&unit).unwrap();

        assert_eq!(file.namespace.as_deref(), Some("billing"));
        assert_eq!(
            file.dependencies,
            vec![("__setting__".to_string(), "USER_NAMESPACE".to_string())]
        );
        assert_eq!(file.replaces.len(), 2);
        assert_eq!(file.operations.len(), 1);
    }

    #[test]
    fn test_unit_file_rejects_rust_operations() {
        let unit = MigrationUnit::new("billing", "0004_backfill")
            .add_operation(RunRust::new("backfill", |_| Ok(())));
        let err = UnitFile::from_unit(&unit).unwrap_err();
        assert!(matches!(err, MigrationError::SerializationError(_)));
    }

    #[test]
    fn test_operation_json_tag() {
        let op = SerializableOperation::RunSql {
            sql_forwards: "SELECT 1".into(),
            sql_backwards: String::new(),
            probe: None,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "run_sql");
        assert!(json.get("probe").is_none());
    }

    // ── write_unit / empty_unit ─────────────────────────────────────

    #[test]
    fn test_write_unit_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let unit = empty_unit("billing", "0001_init", None);
        let (path, content) = write_unit(dir.path(), &unit, true).unwrap();
        assert_eq!(path, dir.path().join("0001_init.json"));
        assert!(content.contains("\"initial\": true"));
        assert!(!path.exists());
    }

    #[test]
    fn test_write_unit_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested");
        let leaf = UnitKey::new("billing", "0001_init");
        let unit = empty_unit("billing", "0002_next", Some(&leaf));
        let (path, content) = write_unit(&target, &unit, false).unwrap();

        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk, content);
        let file = UnitFile::from_json(&on_disk).unwrap();
        assert!(!file.initial);
        assert_eq!(
            file.dependencies,
            vec![("billing".to_string(), "0001_init".to_string())]
        );
    }

    #[test]
    fn test_empty_unit_initial_without_leaf() {
        let unit = empty_unit("audit", "0001_init", None);
        assert!(unit.initial);
        assert!(unit.dependencies.is_empty());
        assert!(unit.operations.is_empty());
    }
}
