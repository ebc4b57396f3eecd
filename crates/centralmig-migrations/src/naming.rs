//! Sortable unit names.
//!
//! New units are named `<secs>.<centisecs>__<namespace>__<slug>` so that a
//! plain sort of one shared directory follows creation order across
//! namespaces. Within one [`Arranger`] prefixes are strictly increasing;
//! across processes nothing is guaranteed below a centisecond.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use centralmig_core::MigrationResult;
use chrono::Utc;

use crate::graph::MigrationGraph;
use crate::migration::{DependencyRef, MigrationUnit, UnitKey};

/// Pause after each assigned name.
pub const NAME_SPACING: Duration = Duration::from_millis(10);

/// Default maximum slug length.
pub const DEFAULT_DESCRIPTION_LIMIT: usize = 100;

/// A source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_unix(&self) -> f64;

    /// Blocks for `duration`.
    fn sleep(&self, duration: Duration);
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[allow(clippy::cast_precision_loss)]
    fn now_unix(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only moves when slept on or advanced by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `unix_secs`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn at(unix_secs: f64) -> Self {
        Self {
            micros: AtomicU64::new((unix_secs * 1_000_000.0).round() as u64),
        }
    }

    /// Moves the clock forward.
    #[allow(clippy::cast_possible_truncation)]
    pub fn advance(&self, duration: Duration) {
        self.micros
            .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[allow(clippy::cast_precision_loss)]
    fn now_unix(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Assigns sortable names.
pub struct Arranger {
    clock: Arc<dyn Clock>,
    description_limit: usize,
    last_centis: Option<i64>,
}

impl Arranger {
    /// Creates an arranger over the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an arranger over the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            description_limit: DEFAULT_DESCRIPTION_LIMIT,
            last_centis: None,
        }
    }

    /// Sets the maximum slug length.
    #[must_use]
    pub fn with_description_limit(mut self, limit: usize) -> Self {
        self.description_limit = limit;
        self
    }

    /// Returns the next name for a unit in `namespace`.
    ///
    /// Sleeps [`NAME_SPACING`] before returning so that the next call lands
    /// in a later centisecond.
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_name(&mut self, namespace: &str, description: &str) -> String {
        let mut centis = (self.clock.now_unix() * 100.0).floor() as i64;
        if let Some(last) = self.last_centis {
            if centis <= last {
                centis = last + 1;
            }
        }
        self.last_centis = Some(centis);

        let name = format!(
            "{}.{:02}__{namespace}__{}",
            centis / 100,
            centis % 100,
            slugify(description, self.description_limit)
        );
        self.clock.sleep(NAME_SPACING);
        name
    }

    /// Renames a loaded unit with a fresh sortable name.
    ///
    /// Any existing sortable prefix is dropped from the description.
    /// Returns the old identity.
    pub fn rearrange(&mut self, unit: &mut MigrationUnit) -> UnitKey {
        let description = description_of(unit.name(), unit.namespace()).to_string();
        let name = self.next_name(unit.namespace(), &description);
        let old = unit.key.clone();
        unit.key.name = name;
        old
    }
}

impl Default for Arranger {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercases, replaces anything but ASCII letters and digits with `_`,
/// collapses runs, and truncates to `limit` characters.
pub fn slugify(description: &str, limit: usize) -> String {
    let mut slug = String::with_capacity(description.len());
    for c in description.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    let slug: String = slug.chars().take(limit).collect();
    if slug.is_empty() {
        "auto".to_string()
    } else {
        slug
    }
}

/// Strips a `<prefix>__<namespace>__` head from a unit name.
fn description_of<'a>(name: &'a str, namespace: &str) -> &'a str {
    let mut parts = name.splitn(3, "__");
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(ns), Some(rest)) if ns == namespace => rest,
        _ => name,
    }
}

/// The outcome of [`arrange_units`].
#[derive(Debug, Clone)]
pub struct Arrangement {
    /// Renamed units, in dependency order.
    pub units: Vec<MigrationUnit>,
    /// Old identity to new identity.
    pub renames: BTreeMap<UnitKey, UnitKey>,
}

/// Renames a batch of units in dependency order.
///
/// References between units of the batch (dependencies, `run_before`,
/// `replaces`) are rewritten to the new names. References to units outside
/// the batch are left alone.
pub fn arrange_units(
    units: Vec<MigrationUnit>,
    arranger: &mut Arranger,
) -> MigrationResult<Arrangement> {
    let mut by_key: BTreeMap<UnitKey, MigrationUnit> =
        units.into_iter().map(|u| (u.key.clone(), u)).collect();

    let mut graph = MigrationGraph::new();
    for key in by_key.keys() {
        graph.add_node(key.clone());
    }
    for (key, unit) in &by_key {
        for parent in unit.dependencies.iter().filter_map(DependencyRef::as_concrete) {
            if graph.contains(parent) {
                graph.add_dependency(key, key, parent)?;
            }
        }
        for child in &unit.run_before {
            if graph.contains(child) {
                graph.add_dependency(key, child, key)?;
            }
        }
        for replaced in &unit.replaces {
            if graph.contains(replaced) {
                graph.add_dependency(key, key, replaced)?;
            }
        }
    }
    let order = graph.topological_order()?;

    let mut renames = BTreeMap::new();
    let mut ordered = Vec::with_capacity(order.len());
    for key in order {
        if let Some(mut unit) = by_key.remove(&key) {
            let old = arranger.rearrange(&mut unit);
            tracing::debug!(from = %old, to = %unit.key, "arranged unit");
            renames.insert(old, unit.key.clone());
            ordered.push(unit);
        }
    }

    let rename = |key: &UnitKey| renames.get(key).cloned().unwrap_or_else(|| key.clone());
    for unit in &mut ordered {
        for dependency in &mut unit.dependencies {
            if let DependencyRef::Concrete(target) = dependency {
                *target = rename(target);
            }
        }
        for target in unit.run_before.iter_mut().chain(unit.replaces.iter_mut()) {
            *target = rename(target);
        }
    }

    Ok(Arrangement {
        units: ordered,
        renames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arranger_at(secs: f64) -> (Arc<ManualClock>, Arranger) {
        let clock = Arc::new(ManualClock::at(secs));
        let arranger = Arranger::with_clock(clock.clone());
        (clock, arranger)
    }

    // ── slugify ─────────────────────────────────────────────────────

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Add due date", 100), "add_due_date");
        assert_eq!(slugify("  invoice -> ledger!!", 100), "invoice_ledger");
        assert_eq!(slugify("abcdef", 3), "abc");
        assert_eq!(slugify("???", 100), "auto");
    }

    // ── next_name ───────────────────────────────────────────────────

    #[test]
    fn test_next_name_format() {
        let (_clock, mut arranger) = arranger_at(1_697_712_345.123);
        assert_eq!(
            arranger.next_name("billing", "init"),
            "1697712345.12__billing__init"
        );
    }

    #[test]
    fn test_next_name_sleeps_between_names() {
        let (clock, mut arranger) = arranger_at(1_000.0);
        arranger.next_name("billing", "a");
        assert!((clock.now_unix() - 1_000.01).abs() < 1e-9);
    }

    #[test]
    fn test_names_strictly_increase_on_frozen_clock() {
        struct Frozen;
        impl Clock for Frozen {
            fn now_unix(&self) -> f64 {
                1_000.0
            }
            fn sleep(&self, _duration: Duration) {}
        }

        let mut arranger = Arranger::with_clock(Arc::new(Frozen));
        let names: Vec<String> = (0..5)
            .map(|i| arranger.next_name("billing", &format!("step {i}")))
            .collect();
        let prefixes: Vec<&str> = names.iter().map(|n| n.split("__").next().unwrap()).collect();
        assert_eq!(
            prefixes,
            vec!["1000.00", "1000.01", "1000.02", "1000.03", "1000.04"]
        );
    }

    #[test]
    fn test_description_limit() {
        let (_clock, arranger) = arranger_at(1.0);
        let mut arranger = arranger.with_description_limit(4);
        assert_eq!(arranger.next_name("audit", "truncate me"), "1.00__audit__trun");
    }

    // ── rearrange ───────────────────────────────────────────────────

    #[test]
    fn test_rearrange_strips_existing_prefix() {
        let (_clock, mut arranger) = arranger_at(2_000.0);
        let mut unit = MigrationUnit::new("billing", "1500.00__billing__add_field");
        let old = arranger.rearrange(&mut unit);
        assert_eq!(old.name, "1500.00__billing__add_field");
        assert_eq!(unit.name(), "2000.00__billing__add_field");
    }

    #[test]
    fn test_rearrange_legacy_name() {
        let (_clock, mut arranger) = arranger_at(2_000.0);
        let mut unit = MigrationUnit::new("billing", "0001_initial");
        arranger.rearrange(&mut unit);
        assert_eq!(unit.name(), "2000.00__billing__0001_initial");
    }

    // ── arrange_units ───────────────────────────────────────────────

    #[test]
    fn test_arrange_units_follows_dependencies() {
        let (_clock, mut arranger) = arranger_at(3_000.0);
        let units = vec![
            // Key order puts audit first, dependency order puts it last.
            MigrationUnit::new("audit", "0001_init").depends_on("billing", "0002_add_field"),
            MigrationUnit::new("billing", "0001_init").as_initial(),
            MigrationUnit::new("billing", "0002_add_field")
                .depends_on("billing", "0001_init")
                .depends_on("accounts", "__first__"),
        ];
        let arrangement = arrange_units(units, &mut arranger).unwrap();

        let names: Vec<&str> = arrangement.units.iter().map(MigrationUnit::name).collect();
        assert_eq!(
            names,
            vec![
                "3000.00__billing__0001_init",
                "3000.01__billing__0002_add_field",
                "3000.02__audit__0001_init",
            ]
        );
        let field = &arrangement.units[1];
        assert_eq!(
            field.dependencies,
            vec![
                DependencyRef::Concrete(UnitKey::new("billing", "3000.00__billing__0001_init")),
                DependencyRef::NamespaceFirst("accounts".into()),
            ]
        );
        assert_eq!(
            arrangement.renames[&UnitKey::new("audit", "0001_init")].name,
            "3000.02__audit__0001_init"
        );
    }

    #[test]
    fn test_arrange_units_rewrites_replaces_and_run_before() {
        let (_clock, mut arranger) = arranger_at(10.0);
        let units = vec![
            MigrationUnit::new("billing", "0001"),
            MigrationUnit::new("billing", "0002_squash").replacing("billing", "0001"),
            MigrationUnit::new("billing", "0000_pre").runs_before("billing", "0001"),
        ];
        let arrangement = arrange_units(units, &mut arranger).unwrap();
        let names: Vec<&str> = arrangement.units.iter().map(MigrationUnit::name).collect();
        assert_eq!(
            names,
            vec!["10.00__billing__0000_pre", "10.01__billing__0001", "10.02__billing__0002_squash"]
        );
        assert_eq!(
            arrangement.units[0].run_before,
            vec![UnitKey::new("billing", "10.01__billing__0001")]
        );
        assert_eq!(
            arrangement.units[2].replaces,
            vec![UnitKey::new("billing", "10.01__billing__0001")]
        );
    }
}
