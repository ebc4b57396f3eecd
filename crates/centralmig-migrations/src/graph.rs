//! The dependency graph over unit identities.
//!
//! Nodes are [`UnitKey`]s; an edge `parent -> child` means the parent must be
//! applied before the child. Every query walks nodes in key order so plans
//! are deterministic regardless of discovery order. Cycle detection and
//! whole-graph ordering run on a `petgraph` view built in key order.

use std::collections::{BTreeMap, BTreeSet};

use centralmig_core::{MigrationError, MigrationResult};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::migration::UnitKey;

/// A directed acyclic graph of units.
#[derive(Debug, Clone, Default)]
pub struct MigrationGraph {
    nodes: BTreeSet<UnitKey>,
    parents: BTreeMap<UnitKey, BTreeSet<UnitKey>>,
    children: BTreeMap<UnitKey, BTreeSet<UnitKey>>,
}

impl MigrationGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. Adding an existing node is a no-op.
    pub fn add_node(&mut self, key: UnitKey) {
        self.parents.entry(key.clone()).or_default();
        self.children.entry(key.clone()).or_default();
        self.nodes.insert(key);
    }

    /// Adds an edge `parent -> child` declared by `origin`.
    ///
    /// Both endpoints must already be nodes; otherwise the missing one is
    /// reported as a [`MigrationError::MissingDependency`].
    pub fn add_dependency(
        &mut self,
        origin: &UnitKey,
        child: &UnitKey,
        parent: &UnitKey,
    ) -> MigrationResult<()> {
        if !self.nodes.contains(child) {
            return Err(MigrationError::missing(origin.to_string(), child.node_ref()));
        }
        if !self.nodes.contains(parent) {
            return Err(MigrationError::missing(origin.to_string(), parent.node_ref()));
        }
        self.parents
            .entry(child.clone())
            .or_default()
            .insert(parent.clone());
        self.children
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
        Ok(())
    }

    /// Returns `true` if the key is a node.
    pub fn contains(&self, key: &UnitKey) -> bool {
        self.nodes.contains(key)
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over all nodes in key order.
    pub fn nodes(&self) -> impl Iterator<Item = &UnitKey> {
        self.nodes.iter()
    }

    /// Returns the direct parents of a node in key order.
    pub fn parents(&self, key: &UnitKey) -> Vec<&UnitKey> {
        self.parents
            .get(key)
            .map(|set| set.iter().collect())
            .unwrap_or_default()
    }

    /// Returns the direct children of a node in key order.
    pub fn children(&self, key: &UnitKey) -> Vec<&UnitKey> {
        self.children
            .get(key)
            .map(|set| set.iter().collect())
            .unwrap_or_default()
    }

    /// Returns nodes with no parent in their own namespace.
    ///
    /// With `namespace` set, only that namespace's roots are returned.
    pub fn root_nodes(&self, namespace: Option<&str>) -> Vec<UnitKey> {
        self.nodes
            .iter()
            .filter(|node| namespace.map_or(true, |ns| node.namespace == ns))
            .filter(|node| {
                self.parents(node)
                    .iter()
                    .all(|parent| parent.namespace != node.namespace)
            })
            .cloned()
            .collect()
    }

    /// Returns nodes with no child in their own namespace.
    ///
    /// With `namespace` set, only that namespace's leaves are returned.
    pub fn leaf_nodes(&self, namespace: Option<&str>) -> Vec<UnitKey> {
        self.nodes
            .iter()
            .filter(|node| namespace.map_or(true, |ns| node.namespace == ns))
            .filter(|node| {
                self.children(node)
                    .iter()
                    .all(|child| child.namespace != node.namespace)
            })
            .cloned()
            .collect()
    }

    /// Returns every unit that must be applied for `target` to be applied,
    /// ending with `target` itself.
    pub fn forwards_plan(&self, target: &UnitKey) -> MigrationResult<Vec<UnitKey>> {
        self.ensure_node(target)?;
        Ok(self.iterative_dfs(target, true))
    }

    /// Returns every unit that must be unapplied for `target` to be
    /// unapplied, ending with `target` itself.
    pub fn backwards_plan(&self, target: &UnitKey) -> MigrationResult<Vec<UnitKey>> {
        self.ensure_node(target)?;
        Ok(self.iterative_dfs(target, false))
    }

    /// Returns all nodes in dependency order.
    ///
    /// Fails with [`MigrationError::CircularDependency`] naming the cycle if
    /// the graph has one.
    pub fn topological_order(&self) -> MigrationResult<Vec<UnitKey>> {
        let dag = self.to_dag();
        match toposort(&dag, None) {
            Ok(indices) => Ok(indices
                .into_iter()
                .map(|idx| UnitKey::clone(dag[idx]))
                .collect()),
            Err(cycle) => Err(MigrationError::CircularDependency(cycle_path(
                &dag,
                cycle.node_id(),
            ))),
        }
    }

    /// Fails with [`MigrationError::CircularDependency`] if the graph has a
    /// cycle.
    pub fn ensure_not_cyclic(&self) -> MigrationResult<()> {
        self.topological_order().map(|_| ())
    }

    /// Builds a `petgraph` view with edges running parent to child.
    fn to_dag(&self) -> DiGraph<&UnitKey, ()> {
        let mut dag = DiGraph::with_capacity(self.nodes.len(), 0);
        let index: BTreeMap<&UnitKey, NodeIndex> =
            self.nodes.iter().map(|node| (node, dag.add_node(node))).collect();
        for (child, parents) in &self.parents {
            for parent in parents {
                if let (Some(&from), Some(&to)) = (index.get(parent), index.get(child)) {
                    dag.add_edge(from, to, ());
                }
            }
        }
        dag
    }

    fn ensure_node(&self, key: &UnitKey) -> MigrationResult<()> {
        if self.nodes.contains(key) {
            Ok(())
        } else {
            Err(MigrationError::UnknownTarget {
                namespace: key.namespace.clone(),
                prefix: key.name.clone(),
            })
        }
    }

    /// Post-order depth-first walk, parents first when `forwards`, children
    /// first otherwise.
    fn iterative_dfs(&self, start: &UnitKey, forwards: bool) -> Vec<UnitKey> {
        let edges = if forwards {
            &self.parents
        } else {
            &self.children
        };
        let mut visited = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![(start, false)];

        while let Some((node, processed)) = stack.pop() {
            if seen.contains(node) {
                continue;
            }
            if processed {
                seen.insert(node);
                visited.push(node.clone());
            } else {
                stack.push((node, true));
                stack.extend(edges.get(node).into_iter().flatten().map(|n| (n, false)));
            }
        }
        visited
    }
}

/// Follows edges from `start` until a node repeats, for error reporting.
fn cycle_path(dag: &DiGraph<&UnitKey, ()>, start: NodeIndex) -> String {
    let mut path = vec![dag[start].to_string()];
    let mut seen = BTreeSet::from([start]);
    let mut current = start;
    while let Some(edge) = dag.edges(current).next() {
        let target = edge.target();
        path.push(dag[target].to_string());
        if !seen.insert(target) {
            break;
        }
        current = target;
    }
    path.join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ns: &str, name: &str) -> UnitKey {
        UnitKey::new(ns, name)
    }

    /// billing: 0001 <- 0002 <- 0003, audit: 0001 <- 0002 (depends on billing.0002)
    fn sample_graph() -> MigrationGraph {
        let mut graph = MigrationGraph::new();
        for (ns, name) in [
            ("billing", "0001"),
            ("billing", "0002"),
            ("billing", "0003"),
            ("audit", "0001"),
            ("audit", "0002"),
        ] {
            graph.add_node(key(ns, name));
        }
        let edges = [
            (("billing", "0002"), ("billing", "0001")),
            (("billing", "0003"), ("billing", "0002")),
            (("audit", "0002"), ("audit", "0001")),
            (("audit", "0002"), ("billing", "0002")),
        ];
        for ((cns, cname), (pns, pname)) in edges {
            let child = key(cns, cname);
            graph
                .add_dependency(&child, &child, &key(pns, pname))
                .unwrap();
        }
        graph
    }

    // ── Construction ────────────────────────────────────────────────

    #[test]
    fn test_add_node_idempotent() {
        let mut graph = MigrationGraph::new();
        graph.add_node(key("billing", "0001"));
        graph.add_node(key("billing", "0001"));
        assert_eq!(graph.len(), 1);
        assert!(graph.contains(&key("billing", "0001")));
    }

    #[test]
    fn test_add_dependency_missing_parent() {
        let mut graph = MigrationGraph::new();
        let child = key("billing", "0002");
        graph.add_node(child.clone());
        let err = graph
            .add_dependency(&child, &child, &key("billing", "0001"))
            .unwrap_err();
        match err {
            MigrationError::MissingDependency { origin, node, .. } => {
                assert_eq!(origin, "billing.0002");
                assert_eq!(node.to_string(), "billing.0001");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_add_dependency_missing_child() {
        let mut graph = MigrationGraph::new();
        let parent = key("billing", "0001");
        graph.add_node(parent.clone());
        let child = key("billing", "0002");
        let err = graph.add_dependency(&parent, &child, &parent).unwrap_err();
        assert!(matches!(err, MigrationError::MissingDependency { .. }));
    }

    // ── Roots and leaves ────────────────────────────────────────────

    #[test]
    fn test_root_nodes_ignore_cross_namespace_parents() {
        let graph = sample_graph();
        assert_eq!(
            graph.root_nodes(None),
            vec![key("audit", "0001"), key("billing", "0001")]
        );
        assert_eq!(graph.root_nodes(Some("billing")), vec![key("billing", "0001")]);
    }

    #[test]
    fn test_leaf_nodes_ignore_cross_namespace_children() {
        let graph = sample_graph();
        assert_eq!(
            graph.leaf_nodes(None),
            vec![key("audit", "0002"), key("billing", "0003")]
        );
        assert_eq!(graph.leaf_nodes(Some("audit")), vec![key("audit", "0002")]);
        assert!(graph.leaf_nodes(Some("collections")).is_empty());
    }

    // ── Plans ───────────────────────────────────────────────────────

    #[test]
    fn test_forwards_plan() {
        let graph = sample_graph();
        let plan = graph.forwards_plan(&key("audit", "0002")).unwrap();
        let pos = |k: &UnitKey| plan.iter().position(|p| p == k).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan.last(), Some(&key("audit", "0002")));
        assert!(pos(&key("billing", "0001")) < pos(&key("billing", "0002")));
        assert!(!plan.contains(&key("billing", "0003")));
    }

    #[test]
    fn test_backwards_plan() {
        let graph = sample_graph();
        let plan = graph.backwards_plan(&key("billing", "0002")).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.last(), Some(&key("billing", "0002")));
        assert!(plan.contains(&key("billing", "0003")));
        assert!(plan.contains(&key("audit", "0002")));
    }

    #[test]
    fn test_plan_unknown_node() {
        let graph = sample_graph();
        let err = graph.forwards_plan(&key("billing", "9999")).unwrap_err();
        assert!(matches!(err, MigrationError::UnknownTarget { .. }));
    }

    #[test]
    fn test_forwards_plan_diamond_visits_once() {
        let mut graph = MigrationGraph::new();
        for name in ["a", "b", "c", "d"] {
            graph.add_node(key("x", name));
        }
        let d = key("x", "d");
        let b = key("x", "b");
        let c = key("x", "c");
        graph.add_dependency(&b, &b, &key("x", "a")).unwrap();
        graph.add_dependency(&c, &c, &key("x", "a")).unwrap();
        graph.add_dependency(&d, &d, &b).unwrap();
        graph.add_dependency(&d, &d, &c).unwrap();

        let plan = graph.forwards_plan(&d).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0], key("x", "a"));
        assert_eq!(plan[3], d);
    }

    // ── Ordering and cycles ─────────────────────────────────────────

    #[test]
    fn test_topological_order() {
        let graph = sample_graph();
        let order = graph.topological_order().unwrap();
        assert_eq!(order.len(), 5);
        let position = |k: &UnitKey| order.iter().position(|o| o == k).unwrap();
        for node in graph.nodes() {
            for parent in graph.parents(node) {
                assert!(position(parent) < position(node), "{parent} after {node}");
            }
        }
        assert_eq!(graph.topological_order().unwrap(), order);
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = MigrationGraph::new();
        let a = key("x", "a");
        let b = key("x", "b");
        graph.add_node(a.clone());
        graph.add_node(b.clone());
        graph.add_dependency(&a, &a, &b).unwrap();
        graph.add_dependency(&b, &b, &a).unwrap();
        let err = graph.ensure_not_cyclic().unwrap_err();
        match err {
            MigrationError::CircularDependency(path) => {
                assert!(path.contains("x.a"));
                assert!(path.contains("x.b"));
                assert!(path.contains(" -> "));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
