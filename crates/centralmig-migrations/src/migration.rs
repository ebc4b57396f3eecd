//! Migration units, dependency references, and the in-process unit registry.
//!
//! A [`MigrationUnit`] is a named set of [`Operation`]s belonging to a
//! namespace. Units declare what they depend on through [`DependencyRef`]s,
//! which are resolved to concrete graph nodes when the graph is built.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use centralmig_core::{MigrationError, MigrationResult, NodeRef};

use crate::operations::Operation;

/// Sentinel name meaning "the first unit of a namespace".
pub const FIRST: &str = "__first__";
/// Sentinel name meaning "the latest unit of a namespace".
pub const LATEST: &str = "__latest__";
/// Sentinel namespace marking a dependency read from a swappable setting.
pub const SETTING: &str = "__setting__";

/// The `(namespace, name)` identity of a unit.
///
/// Ordering is namespace first, then name, which is also the order in which
/// plans break ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitKey {
    /// The namespace the unit belongs to (e.g. "billing").
    pub namespace: String,
    /// The unit name within the namespace.
    pub name: String,
}

impl UnitKey {
    /// Creates a new key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns the key as a pair, the shape used in unit files.
    pub fn to_pair(&self) -> (String, String) {
        (self.namespace.clone(), self.name.clone())
    }

    /// Returns the error-reporting form of this key.
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(&self.namespace, &self.name)
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl From<(&str, &str)> for UnitKey {
    fn from((namespace, name): (&str, &str)) -> Self {
        Self::new(namespace, name)
    }
}

/// A declared dependency, before resolution against the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyRef {
    /// A specific unit.
    Concrete(UnitKey),
    /// The root unit of a namespace. Ignored if the namespace is unmigrated.
    NamespaceFirst(String),
    /// The leaf unit of a namespace. Ignored if the namespace is unmigrated.
    NamespaceLatest(String),
    /// The first unit of the namespace named by a swappable setting.
    ExternalSetting(String),
}

impl DependencyRef {
    /// Parses the `(namespace, name)` pair form used in unit files.
    ///
    /// # Examples
    ///
    /// ```
    /// use centralmig_migrations::migration::{DependencyRef, UnitKey};
    ///
    /// assert_eq!(
    ///     DependencyRef::parse("billing", "__first__"),
    ///     DependencyRef::NamespaceFirst("billing".into())
    /// );
    /// assert_eq!(
    ///     DependencyRef::parse("billing", "0001_init"),
    ///     DependencyRef::Concrete(UnitKey::new("billing", "0001_init"))
    /// );
    /// ```
    pub fn parse(namespace: &str, name: &str) -> Self {
        if namespace == SETTING {
            Self::ExternalSetting(name.to_string())
        } else if name == FIRST {
            Self::NamespaceFirst(namespace.to_string())
        } else if name == LATEST {
            Self::NamespaceLatest(namespace.to_string())
        } else {
            Self::Concrete(UnitKey::new(namespace, name))
        }
    }

    /// Returns the pair form used in unit files.
    pub fn to_pair(&self) -> (String, String) {
        match self {
            Self::Concrete(key) => key.to_pair(),
            Self::NamespaceFirst(ns) => (ns.clone(), FIRST.to_string()),
            Self::NamespaceLatest(ns) => (ns.clone(), LATEST.to_string()),
            Self::ExternalSetting(setting) => (SETTING.to_string(), setting.clone()),
        }
    }

    /// Returns the concrete key, if this is a concrete reference.
    pub const fn as_concrete(&self) -> Option<&UnitKey> {
        match self {
            Self::Concrete(key) => Some(key),
            _ => None,
        }
    }

    /// Returns the namespace this reference points into, if known without
    /// consulting settings.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::Concrete(key) => Some(&key.namespace),
            Self::NamespaceFirst(ns) | Self::NamespaceLatest(ns) => Some(ns),
            Self::ExternalSetting(_) => None,
        }
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (namespace, name) = self.to_pair();
        write!(f, "{namespace}.{name}")
    }
}

/// A statically-typed unit definition registered in process.
///
/// Implement this for units that are compiled into the binary instead of
/// being read from a unit file.
pub trait UnitDescriptor: Send + Sync {
    /// The namespace the unit belongs to.
    fn namespace(&self) -> &str;

    /// The unit name.
    fn name(&self) -> &str;

    /// The operations to apply, in order.
    fn operations(&self) -> Vec<Arc<dyn Operation>>;

    /// The declared dependencies.
    fn dependencies(&self) -> Vec<DependencyRef> {
        Vec::new()
    }

    /// Units that must be sequenced after this one.
    fn run_before(&self) -> Vec<UnitKey> {
        Vec::new()
    }

    /// Units this one supersedes.
    fn replaces(&self) -> Vec<UnitKey> {
        Vec::new()
    }

    /// Whether this unit has no real predecessor in its namespace.
    fn initial(&self) -> bool {
        false
    }

    /// Whether this unit's operations run inside one transaction.
    fn atomic(&self) -> bool {
        true
    }
}

/// One schema or data change.
#[derive(Clone)]
pub struct MigrationUnit {
    /// The unit identity.
    pub key: UnitKey,
    /// The operations to apply, in order.
    pub operations: Vec<Arc<dyn Operation>>,
    /// Declared dependencies.
    pub dependencies: Vec<DependencyRef>,
    /// Units that must be applied after this one.
    pub run_before: Vec<UnitKey>,
    /// Units this one supersedes. Non-empty means this is a replacing unit.
    pub replaces: Vec<UnitKey>,
    /// Whether this is the namespace's initial unit.
    pub initial: bool,
    /// Whether the operations run inside one transaction.
    pub atomic: bool,
    /// The file the unit was read from, if any.
    pub path: Option<PathBuf>,
}

impl MigrationUnit {
    /// Creates a new, empty unit.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: UnitKey::new(namespace, name),
            operations: Vec::new(),
            dependencies: Vec::new(),
            run_before: Vec::new(),
            replaces: Vec::new(),
            initial: false,
            atomic: true,
            path: None,
        }
    }

    /// Builds a unit from a registered descriptor.
    pub fn from_descriptor(descriptor: &dyn UnitDescriptor) -> Self {
        Self {
            key: UnitKey::new(descriptor.namespace(), descriptor.name()),
            operations: descriptor.operations(),
            dependencies: descriptor.dependencies(),
            run_before: descriptor.run_before(),
            replaces: descriptor.replaces(),
            initial: descriptor.initial(),
            atomic: descriptor.atomic(),
            path: None,
        }
    }

    /// Marks this unit as the namespace's initial unit.
    pub fn as_initial(mut self) -> Self {
        self.initial = true;
        self
    }

    /// Runs operations outside a transaction.
    pub fn non_atomic(mut self) -> Self {
        self.atomic = false;
        self
    }

    /// Adds a dependency in pair form; sentinels are recognised.
    pub fn depends_on(mut self, namespace: &str, name: &str) -> Self {
        self.dependencies.push(DependencyRef::parse(namespace, name));
        self
    }

    /// Adds an already-typed dependency.
    pub fn depends_on_ref(mut self, dependency: DependencyRef) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Requires this unit to be applied before another one.
    pub fn runs_before(mut self, namespace: &str, name: &str) -> Self {
        self.run_before.push(UnitKey::new(namespace, name));
        self
    }

    /// Declares that this unit supersedes another one.
    pub fn replacing(mut self, namespace: &str, name: &str) -> Self {
        self.replaces.push(UnitKey::new(namespace, name));
        self
    }

    /// Appends an operation.
    pub fn add_operation(mut self, op: impl Operation + 'static) -> Self {
        self.operations.push(Arc::new(op));
        self
    }

    /// Records the file this unit was read from.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Returns the namespace.
    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    /// Returns the unit name.
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Returns `true` if this unit supersedes others.
    pub fn is_replacing(&self) -> bool {
        !self.replaces.is_empty()
    }

    /// Returns the first operation that cannot be reversed, if any.
    pub fn irreversible_operation(&self) -> Option<&Arc<dyn Operation>> {
        self.operations.iter().find(|op| !op.reversible())
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("key", &self.key)
            .field(
                "operations",
                &self.operations.iter().map(|op| op.describe()).collect::<Vec<_>>(),
            )
            .field("dependencies", &self.dependencies)
            .field("run_before", &self.run_before)
            .field("replaces", &self.replaces)
            .field("initial", &self.initial)
            .field("atomic", &self.atomic)
            .finish()
    }
}

impl fmt::Display for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// An explicit registry of in-process units.
///
/// Units registered here are enumerated by the loader alongside unit files.
#[derive(Default, Clone)]
pub struct UnitRegistry {
    units: BTreeMap<UnitKey, MigrationUnit>,
}

impl UnitRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a unit. Fails with [`MigrationError::DuplicateUnit`] if the
    /// identity is already taken.
    pub fn register(&mut self, unit: MigrationUnit) -> MigrationResult<()> {
        if self.units.contains_key(&unit.key) {
            return Err(MigrationError::DuplicateUnit(unit.key.node_ref()));
        }
        self.units.insert(unit.key.clone(), unit);
        Ok(())
    }

    /// Registers a descriptor.
    pub fn register_descriptor(&mut self, descriptor: &dyn UnitDescriptor) -> MigrationResult<()> {
        self.register(MigrationUnit::from_descriptor(descriptor))
    }

    /// Iterates over registered units in key order.
    pub fn units(&self) -> impl Iterator<Item = &MigrationUnit> {
        self.units.values()
    }

    /// Returns the number of registered units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::RunSQL;

    // ── UnitKey ─────────────────────────────────────────────────────

    #[test]
    fn test_unit_key_display_and_order() {
        let a = UnitKey::new("billing", "0001_init");
        let b = UnitKey::new("billing", "0002_add_field");
        let c = UnitKey::new("audit", "0001_init");
        assert_eq!(a.to_string(), "billing.0001_init");
        let mut keys = vec![b.clone(), a.clone(), c.clone()];
        keys.sort();
        assert_eq!(keys, vec![c, a, b]);
    }

    // ── DependencyRef ───────────────────────────────────────────────

    #[test]
    fn test_dependency_ref_parse_sentinels() {
        assert_eq!(
            DependencyRef::parse("billing", "__latest__"),
            DependencyRef::NamespaceLatest("billing".into())
        );
        assert_eq!(
            DependencyRef::parse("__setting__", "USER_NAMESPACE"),
            DependencyRef::ExternalSetting("USER_NAMESPACE".into())
        );
    }

    #[test]
    fn test_dependency_ref_pair_round_trip() {
        for (ns, name) in [
            ("billing", "0001_init"),
            ("billing", "__first__"),
            ("billing", "__latest__"),
            ("__setting__", "USER_NAMESPACE"),
        ] {
            let parsed = DependencyRef::parse(ns, name);
            assert_eq!(parsed.to_pair(), (ns.to_string(), name.to_string()));
        }
    }

    #[test]
    fn test_dependency_ref_namespace() {
        assert_eq!(
            DependencyRef::parse("billing", "0001").namespace(),
            Some("billing")
        );
        assert_eq!(DependencyRef::parse("__setting__", "X").namespace(), None);
    }

    // ── MigrationUnit ───────────────────────────────────────────────

    #[test]
    fn test_unit_builder() {
        let unit = MigrationUnit::new("billing", "0002_add_field")
            .depends_on("billing", "0001_init")
            .depends_on("audit", "__first__")
            .runs_before("collections", "0001_init")
            .add_operation(RunSQL::new("ALTER TABLE invoice ADD COLUMN due TEXT", ""));

        assert_eq!(unit.namespace(), "billing");
        assert_eq!(unit.dependencies.len(), 2);
        assert_eq!(unit.run_before, vec![UnitKey::new("collections", "0001_init")]);
        assert!(!unit.initial);
        assert!(unit.atomic);
        assert!(!unit.is_replacing());
    }

    #[test]
    fn test_unit_replacing() {
        let unit = MigrationUnit::new("billing", "0003_squash")
            .replacing("billing", "0001_init")
            .replacing("billing", "0002_add_field");
        assert!(unit.is_replacing());
        assert_eq!(unit.replaces.len(), 2);
    }

    #[test]
    fn test_unit_irreversible_operation() {
        let unit = MigrationUnit::new("billing", "0001_init")
            .add_operation(RunSQL::new("CREATE TABLE a (id INTEGER)", "DROP TABLE a"))
            .add_operation(RunSQL::new("INSERT INTO a VALUES (1)", ""));
        let op = unit.irreversible_operation().expect("second op is irreversible");
        assert_eq!(op.describe(), "Raw SQL: INSERT INTO a VALUES (1)");
    }

    struct InvoiceTable;

    impl UnitDescriptor for InvoiceTable {
        fn namespace(&self) -> &str {
            "billing"
        }

        fn name(&self) -> &str {
            "0001_init"
        }

        fn operations(&self) -> Vec<Arc<dyn Operation>> {
            vec![Arc::new(RunSQL::new(
                "CREATE TABLE invoice (id INTEGER PRIMARY KEY)",
                "DROP TABLE invoice",
            ))]
        }

        fn initial(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_unit_from_descriptor() {
        let unit = MigrationUnit::from_descriptor(&InvoiceTable);
        assert_eq!(unit.key, UnitKey::new("billing", "0001_init"));
        assert!(unit.initial);
        assert!(unit.atomic);
        assert_eq!(unit.operations.len(), 1);
        assert!(unit.dependencies.is_empty());
    }

    // ── UnitRegistry ────────────────────────────────────────────────

    #[test]
    fn test_registry_duplicate() {
        let mut registry = UnitRegistry::new();
        registry.register_descriptor(&InvoiceTable).unwrap();
        let err = registry.register_descriptor(&InvoiceTable).unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateUnit(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_iterates_in_key_order() {
        let mut registry = UnitRegistry::new();
        registry.register(MigrationUnit::new("b", "0001")).unwrap();
        registry.register(MigrationUnit::new("a", "0002")).unwrap();
        registry.register(MigrationUnit::new("a", "0001")).unwrap();
        let keys: Vec<String> = registry.units().map(|u| u.key.to_string()).collect();
        assert_eq!(keys, vec!["a.0001", "a.0002", "b.0001"]);
    }
}
