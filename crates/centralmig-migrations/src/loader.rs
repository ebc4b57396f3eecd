//! Unit discovery and graph construction.
//!
//! The [`MigrationLoader`] collects units from three sources, in order:
//!
//! 1. an in-process [`UnitRegistry`],
//! 2. the primary unit directory (strict: a bad file aborts the load),
//! 3. an optional retro directory (tolerant: a bad file is skipped and
//!    reported through [`LoadedUnits::skipped`]).
//!
//! Unit files are named `<prefix>__<namespace>__<description>.json`:
//!
//! ```text
//! migrations/
//!   1697712345.12__billing__init.json
//!   1697712345.13__billing__add_field.json
//!   1697712401.80__audit__init.json
//! ```
//!
//! [`LoadedUnits::build_graph`] then folds replacing units against the
//! ledger's applied set and links the survivors into a [`MigrationGraph`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use centralmig_core::{MigrationError, MigrationResult, NamespaceRegistry, Settings};

use crate::graph::MigrationGraph;
use crate::migration::{DependencyRef, MigrationUnit, UnitKey, UnitRegistry};
use crate::replacement::resolve_replacements;
use crate::serializer::UnitFile;

/// Why one unit file could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    /// The offending file.
    pub path: PathBuf,
    /// Why it was rejected.
    pub reason: String,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

impl From<LoadError> for MigrationError {
    fn from(err: LoadError) -> Self {
        Self::MalformedUnit {
            path: err.path,
            reason: err.reason,
        }
    }
}

/// Discovers units from the registry and unit directories.
#[derive(Clone, Default)]
pub struct MigrationLoader {
    directory: Option<PathBuf>,
    retro_directory: Option<PathBuf>,
    registry: UnitRegistry,
    namespaces: NamespaceRegistry,
}

impl MigrationLoader {
    /// Creates a loader with no sources.
    pub fn new(namespaces: NamespaceRegistry) -> Self {
        Self {
            namespaces,
            ..Self::default()
        }
    }

    /// Creates a loader from the `[migrations]` settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut loader = Self::new(NamespaceRegistry::from_settings(settings))
            .with_directory(&settings.migrations.directory);
        loader.retro_directory.clone_from(&settings.migrations.retro_directory);
        loader
    }

    /// Sets the primary (strict) unit directory.
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Sets the retro (tolerant) unit directory.
    pub fn with_retro_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.retro_directory = Some(directory.into());
        self
    }

    /// Sets the in-process unit registry.
    pub fn with_registry(mut self, registry: UnitRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Returns the primary unit directory.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Returns the retro unit directory.
    pub fn retro_directory(&self) -> Option<&Path> {
        self.retro_directory.as_deref()
    }

    /// Loads every unit from every source.
    pub fn load(&self) -> MigrationResult<LoadedUnits> {
        let mut units: BTreeMap<UnitKey, MigrationUnit> = BTreeMap::new();
        let mut skipped = Vec::new();

        for unit in self.registry.units() {
            insert_unit(&mut units, unit.clone())?;
        }

        if let Some(dir) = &self.directory {
            for path in unit_files(dir)? {
                insert_unit(&mut units, read_unit_file(&path)?)?;
            }
        }

        if let Some(dir) = &self.retro_directory {
            for path in unit_files(dir)? {
                match read_unit_file(&path) {
                    Ok(unit) => insert_unit(&mut units, unit)?,
                    Err(err) => skipped.push(err),
                }
            }
        }

        tracing::debug!(
            units = units.len(),
            skipped = skipped.len(),
            "loaded migration units"
        );
        Ok(LoadedUnits::new(units, skipped, self.namespaces.clone()))
    }
}

fn insert_unit(
    units: &mut BTreeMap<UnitKey, MigrationUnit>,
    unit: MigrationUnit,
) -> MigrationResult<()> {
    if units.contains_key(&unit.key) {
        return Err(MigrationError::DuplicateUnit(unit.key.node_ref()));
    }
    units.insert(unit.key.clone(), unit);
    Ok(())
}

/// Lists candidate unit files in a directory, sorted by name.
///
/// A missing directory has no units.
fn unit_files(dir: &Path) -> MigrationResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(['_', '.', '~']));
        if !hidden {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Reads one unit file.
fn read_unit_file(path: &Path) -> Result<MigrationUnit, LoadError> {
    let fail = |reason: String| LoadError {
        path: path.to_path_buf(),
        reason,
    };
    let name = path
        .file_stem()
        .and_then(|n| n.to_str())
        .ok_or_else(|| fail("file name is not valid UTF-8".into()))?;
    let content = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let file = UnitFile::from_json(&content).map_err(|e| fail(e.to_string()))?;

    let from_name = name.split("__").nth(1).filter(|ns| !ns.is_empty());
    let namespace = match (from_name, file.namespace.as_deref()) {
        (Some(a), Some(b)) if a != b => {
            return Err(fail(format!(
                "file name names namespace '{a}' but the file declares '{b}'"
            )))
        }
        (Some(ns), _) | (None, Some(ns)) => ns.to_string(),
        (None, None) => {
            return Err(fail(
                "namespace not found in file name and no `namespace` field".into(),
            ))
        }
    };

    Ok(file.into_unit(&namespace, name).with_path(path))
}

/// The result of a load: every discovered unit, before replacement folding.
#[derive(Debug, Clone)]
pub struct LoadedUnits {
    /// All units keyed by identity, replacing and normal alike.
    pub units: BTreeMap<UnitKey, MigrationUnit>,
    /// Retro files that could not be loaded.
    pub skipped: Vec<LoadError>,
    /// Namespaces with at least one unit.
    pub migrated: BTreeSet<String>,
    /// Known namespaces without any unit.
    pub unmigrated: BTreeSet<String>,
    namespaces: NamespaceRegistry,
}

impl LoadedUnits {
    /// Wraps an already-built set of units.
    pub fn new(
        units: BTreeMap<UnitKey, MigrationUnit>,
        skipped: Vec<LoadError>,
        namespaces: NamespaceRegistry,
    ) -> Self {
        let migrated: BTreeSet<String> = units.keys().map(|k| k.namespace.clone()).collect();
        let unmigrated = namespaces
            .namespaces()
            .iter()
            .filter(|ns| !migrated.contains(*ns))
            .cloned()
            .collect();
        Self {
            units,
            skipped,
            migrated,
            unmigrated,
            namespaces,
        }
    }

    /// Builds a set from units, checking for duplicates.
    pub fn from_units(
        units: impl IntoIterator<Item = MigrationUnit>,
        namespaces: NamespaceRegistry,
    ) -> MigrationResult<Self> {
        let mut map = BTreeMap::new();
        for unit in units {
            insert_unit(&mut map, unit)?;
        }
        Ok(Self::new(map, Vec::new(), namespaces))
    }

    /// Returns the namespace registry the load was made against.
    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    /// Returns `true` if the namespace has units or is registered.
    pub fn is_known_namespace(&self, namespace: &str) -> bool {
        self.migrated.contains(namespace) || self.namespaces.contains(namespace)
    }

    /// Returns the unit with the given identity.
    pub fn get(&self, key: &UnitKey) -> Option<&MigrationUnit> {
        self.units.get(key)
    }

    /// Finds the single unit in `namespace` whose name starts with `prefix`.
    pub fn get_by_prefix(&self, namespace: &str, prefix: &str) -> MigrationResult<&MigrationUnit> {
        let matches: Vec<&MigrationUnit> = self
            .units
            .values()
            .filter(|u| u.namespace() == namespace && u.name().starts_with(prefix))
            .collect();
        match matches.as_slice() {
            [unit] => Ok(*unit),
            [] => Err(MigrationError::UnknownTarget {
                namespace: namespace.to_string(),
                prefix: prefix.to_string(),
            }),
            many => Err(MigrationError::AmbiguousTarget {
                namespace: namespace.to_string(),
                prefix: prefix.to_string(),
                candidates: many
                    .iter()
                    .map(|u| u.name().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// Folds replacing units against `applied` and builds the graph.
    pub fn build_graph(&self, applied: &BTreeSet<UnitKey>) -> MigrationResult<ResolvedGraph> {
        let mut units = self.units.clone();
        for unit in units.values_mut() {
            for dependency in &mut unit.dependencies {
                if let DependencyRef::ExternalSetting(key) = dependency {
                    *dependency =
                        DependencyRef::NamespaceFirst(self.namespaces.resolve_setting(key)?);
                }
            }
        }

        let resolution = resolve_replacements(&units, applied);
        let mut graph = MigrationGraph::new();
        for key in resolution.normal.keys() {
            graph.add_node(key.clone());
        }

        let diagnose = |graph: &MigrationGraph, err: MigrationError| match err {
            MigrationError::MissingDependency {
                origin,
                node,
                message: None,
            } => {
                let missing = UnitKey::new(&node.namespace, &node.name);
                let candidates = resolution.reverse_replacements.get(&missing);
                let message = candidates
                    .filter(|c| !c.iter().any(|k| graph.contains(k)))
                    .map(|c| {
                        let tries: Vec<String> = c.iter().map(ToString::to_string).collect();
                        format!(
                            "Tried to replace {missing} with any of [{}] but was unable to \
                             because some of the replaced units are already applied",
                            tries.join(", ")
                        )
                    });
                MigrationError::MissingDependency {
                    origin,
                    node,
                    message,
                }
            }
            other => other,
        };

        for (key, unit) in &resolution.normal {
            for dependency in &unit.dependencies {
                if let DependencyRef::Concrete(parent) = dependency {
                    if parent.namespace == key.namespace {
                        graph
                            .add_dependency(key, key, parent)
                            .map_err(|e| diagnose(&graph, e))?;
                    }
                }
            }
        }

        // Own-namespace `__first__` points at a root that does not itself
        // wait on the sentinel. All of them resolve against one snapshot.
        let waiting_on_first: BTreeSet<&UnitKey> = resolution
            .normal
            .iter()
            .filter(|(key, unit)| {
                unit.dependencies.iter().any(
                    |d| matches!(d, DependencyRef::NamespaceFirst(ns) if *ns == key.namespace),
                )
            })
            .map(|(key, _)| key)
            .collect();
        let first_edges: Vec<(&UnitKey, UnitKey)> = waiting_on_first
            .iter()
            .filter_map(|key| {
                graph
                    .root_nodes(Some(key.namespace.as_str()))
                    .into_iter()
                    .find(|root| !waiting_on_first.contains(root))
                    .map(|root| (*key, root))
            })
            .collect();
        for (key, root) in &first_edges {
            graph
                .add_dependency(key, key, root)
                .map_err(|e| diagnose(&graph, e))?;
        }

        // Intra-namespace edges are complete, so the frontier is final.
        let frontier = Frontier::snapshot(&graph, &self.migrated);
        for (key, unit) in &resolution.normal {
            for dependency in &unit.dependencies {
                let intra = matches!(dependency, DependencyRef::Concrete(p) if p.namespace == key.namespace);
                if intra {
                    continue;
                }
                if let Some(parent) = self.check_key(&frontier, dependency, key)? {
                    graph
                        .add_dependency(key, key, &parent)
                        .map_err(|e| diagnose(&graph, e))?;
                }
            }
            for child in &unit.run_before {
                graph
                    .add_dependency(key, child, key)
                    .map_err(|e| diagnose(&graph, e))?;
            }
        }

        graph.ensure_not_cyclic()?;

        Ok(ResolvedGraph {
            graph,
            nodes: resolution.normal,
            replacements: resolution.replacements,
            applied: resolution.applied,
        })
    }

    /// Resolves a cross-namespace dependency to a concrete node, or `None`
    /// if it should be ignored.
    fn check_key(
        &self,
        frontier: &Frontier,
        dependency: &DependencyRef,
        current: &UnitKey,
    ) -> MigrationResult<Option<UnitKey>> {
        let (namespace, first) = match dependency {
            DependencyRef::Concrete(key) => return Ok(Some(key.clone())),
            DependencyRef::NamespaceFirst(ns) => (ns, true),
            DependencyRef::NamespaceLatest(ns) => (ns, false),
            DependencyRef::ExternalSetting(key) => {
                let resolved = DependencyRef::NamespaceFirst(self.namespaces.resolve_setting(key)?);
                return self.check_key(frontier, &resolved, current);
            }
        };

        // Own-namespace sentinels were handled with the intra-namespace edges.
        if *namespace == current.namespace {
            return Ok(None);
        }
        if self.migrated.contains(namespace.as_str()) {
            let nodes = if first {
                &frontier.roots
            } else {
                &frontier.leaves
            };
            return Ok(nodes.get(namespace.as_str()).cloned());
        }
        if self.namespaces.contains(namespace) {
            return Ok(None);
        }
        Err(MigrationError::UnknownNamespace(namespace.clone()))
    }
}

/// The first root and last leaf of each migrated namespace.
struct Frontier {
    roots: BTreeMap<String, UnitKey>,
    leaves: BTreeMap<String, UnitKey>,
}

impl Frontier {
    fn snapshot(graph: &MigrationGraph, namespaces: &BTreeSet<String>) -> Self {
        let mut roots = BTreeMap::new();
        let mut leaves = BTreeMap::new();
        for namespace in namespaces {
            if let Some(root) = graph.root_nodes(Some(namespace.as_str())).into_iter().next() {
                roots.insert(namespace.clone(), root);
            }
            if let Some(leaf) = graph.leaf_nodes(Some(namespace.as_str())).into_iter().next() {
                leaves.insert(namespace.clone(), leaf);
            }
        }
        Self { roots, leaves }
    }
}

/// A graph ready for planning.
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    /// The dependency graph over surviving units.
    pub graph: MigrationGraph,
    /// The surviving units, including folded replacements.
    pub nodes: BTreeMap<UnitKey, MigrationUnit>,
    /// Every replacing unit, folded or not.
    pub replacements: BTreeMap<UnitKey, MigrationUnit>,
    /// The applied set after folding.
    pub applied: BTreeSet<UnitKey>,
}

impl ResolvedGraph {
    /// Returns the unit behind a graph node.
    pub fn unit(&self, key: &UnitKey) -> Option<&MigrationUnit> {
        self.nodes.get(key)
    }

    /// Fails with [`MigrationError::InconsistentHistory`] if an applied unit
    /// has an unapplied parent.
    ///
    /// `applied` is the raw ledger state. A replacing parent counts as
    /// applied when everything it replaces is.
    pub fn check_consistent_history(&self, applied: &BTreeSet<UnitKey>) -> MigrationResult<()> {
        for key in applied {
            if !self.graph.contains(key) {
                continue;
            }
            for parent in self.graph.parents(key) {
                if applied.contains(parent) {
                    continue;
                }
                let replaced_applied = self
                    .replacements
                    .get(parent)
                    .is_some_and(|r| r.replaces.iter().all(|t| applied.contains(t)));
                if replaced_applied {
                    continue;
                }
                return Err(MigrationError::InconsistentHistory {
                    applied: key.node_ref(),
                    dependency: parent.node_ref(),
                });
            }
        }
        Ok(())
    }
}
