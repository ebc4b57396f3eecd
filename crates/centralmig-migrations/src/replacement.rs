//! Folding replacing (squash) units into the set of normal units.
//!
//! A replacing unit R supersedes its `replaces` list once that list is
//! either fully applied (a historical squash) or fully unapplied (a fresh
//! environment). A partially applied list blocks R for this run. Folding is
//! done in two passes: rewrites `replaced -> R` are first collected into a
//! map, then applied to every dependency list at once.

use std::collections::{BTreeMap, BTreeSet};

use crate::migration::{DependencyRef, MigrationUnit, UnitKey};

/// The outcome of folding replacing units against the applied set.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Units that become graph nodes, with dependencies re-pointed.
    pub normal: BTreeMap<UnitKey, MigrationUnit>,
    /// Every replacing unit that was discovered, folded or not.
    pub replacements: BTreeMap<UnitKey, MigrationUnit>,
    /// Replacing units left out because their targets are partially applied.
    pub blocked: Vec<UnitKey>,
    /// The applied working set after folding.
    pub applied: BTreeSet<UnitKey>,
    /// `replaced -> {replacing}` index, kept for diagnostics.
    pub reverse_replacements: BTreeMap<UnitKey, BTreeSet<UnitKey>>,
}

/// Folds every replacing unit in `units` against `applied`.
pub fn resolve_replacements(
    units: &BTreeMap<UnitKey, MigrationUnit>,
    applied: &BTreeSet<UnitKey>,
) -> Resolution {
    let (mut replacements, mut normal): (BTreeMap<_, _>, BTreeMap<_, _>) = units
        .iter()
        .map(|(key, unit)| (key.clone(), unit.clone()))
        .partition(|(_, unit)| unit.is_replacing());

    let mut reverse_replacements: BTreeMap<UnitKey, BTreeSet<UnitKey>> = BTreeMap::new();
    for (key, unit) in &replacements {
        for target in &unit.replaces {
            reverse_replacements
                .entry(target.clone())
                .or_default()
                .insert(key.clone());
        }
    }

    let mut applied = applied.clone();
    let mut rewrites: BTreeMap<UnitKey, UnitKey> = BTreeMap::new();
    let mut folded = BTreeSet::new();
    let mut blocked = Vec::new();

    for (key, unit) in &replacements {
        applied.remove(key);
        let statuses: Vec<bool> = unit.replaces.iter().map(|t| applied.contains(t)).collect();
        let all_applied = statuses.iter().all(|&s| s);
        let can_replace = all_applied || !statuses.iter().any(|&s| s);
        if !can_replace {
            tracing::debug!(unit = %key, "replacement blocked by partially applied targets");
            blocked.push(key.clone());
            continue;
        }

        for target in &unit.replaces {
            normal.remove(target);
            rewrites.insert(target.clone(), key.clone());
        }
        folded.insert(key.clone());
        if all_applied {
            applied.insert(key.clone());
        }
    }

    for key in &folded {
        if let Some(unit) = replacements.get(key) {
            normal.insert(key.clone(), unit.clone());
        }
    }

    for unit in normal.values_mut() {
        materialize(unit, &rewrites, &replacements);
    }
    for (key, unit) in &mut replacements {
        if !folded.contains(key) {
            materialize(unit, &rewrites, units);
        }
    }

    Resolution {
        normal,
        replacements,
        blocked,
        applied,
        reverse_replacements,
    }
}

/// Applies the rewrite map to one unit's concrete dependencies.
///
/// A dependency is never re-pointed at the unit itself or at a replacing
/// unit that supersedes this unit.
fn materialize(
    unit: &mut MigrationUnit,
    rewrites: &BTreeMap<UnitKey, UnitKey>,
    replacing: &BTreeMap<UnitKey, MigrationUnit>,
) {
    let owner = unit.key.clone();
    let mut seen = BTreeSet::new();
    let mut dependencies = Vec::with_capacity(unit.dependencies.len());

    for dependency in &unit.dependencies {
        let resolved = match dependency {
            DependencyRef::Concrete(target) => {
                let mut current = target.clone();
                let mut hops = BTreeSet::new();
                while let Some(next) = rewrites.get(&current) {
                    let supersedes_owner = replacing
                        .get(next)
                        .is_some_and(|r| r.replaces.contains(&owner));
                    if *next == owner || supersedes_owner || !hops.insert(next.clone()) {
                        break;
                    }
                    current = next.clone();
                }
                DependencyRef::Concrete(current)
            }
            other => other.clone(),
        };
        if seen.insert(resolved.clone()) {
            dependencies.push(resolved);
        }
    }
    unit.dependencies = dependencies;
}
