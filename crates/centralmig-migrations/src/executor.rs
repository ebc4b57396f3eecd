//! Planning and execution.
//!
//! The [`MigrationExecutor`] turns targets into a [`MigrationPlan`] against
//! the graph built from the current ledger state, then applies or unapplies
//! the plan one unit at a time. A plan is always purely forward or purely
//! backward; a mixed plan is rejected before anything runs.
//!
//! Each unit's side effects and its ledger row are committed on their own.
//! A failure stops the run and leaves the rows of earlier units in place, so
//! re-planning against the same targets resumes where the run stopped.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use centralmig_backends::DatabaseBackend;
use centralmig_core::{MigrationError, MigrationResult};

use crate::graph::MigrationGraph;
use crate::ledger::Ledger;
use crate::loader::{LoadedUnits, ResolvedGraph};
use crate::migration::{MigrationUnit, UnitKey};
use crate::operations::Operation;

/// What a caller asks to migrate to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MigrationTarget {
    /// Bring this unit (and everything it needs) to applied, or roll back
    /// everything after it in its namespace if it is already applied.
    Unit(UnitKey),
    /// Unapply every unit of a namespace.
    Zero(String),
}

impl fmt::Display for MigrationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit(key) => write!(f, "{key}"),
            Self::Zero(namespace) => write!(f, "{namespace}.zero"),
        }
    }
}

/// A single step in a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    /// The unit to apply or unapply.
    pub unit: UnitKey,
    /// If `true`, this step unapplies the unit.
    pub backwards: bool,
}

impl MigrationStep {
    /// Creates a forward step.
    pub const fn forward(unit: UnitKey) -> Self {
        Self {
            unit,
            backwards: false,
        }
    }

    /// Creates a backward step.
    pub const fn backward(unit: UnitKey) -> Self {
        Self {
            unit,
            backwards: true,
        }
    }
}

/// An ordered list of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    /// The ordered steps to execute.
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Appends a step.
    pub fn add_step(&mut self, step: MigrationStep) {
        self.steps.push(step);
    }

    /// Returns whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if no step is backward. Vacuously true when empty.
    pub fn all_forwards(&self) -> bool {
        self.steps.iter().all(|s| !s.backwards)
    }

    /// Returns `true` if every step is backward. Vacuously true when empty.
    pub fn all_backwards(&self) -> bool {
        self.steps.iter().all(|s| s.backwards)
    }

    /// Returns the units of the plan, in order.
    pub fn units(&self) -> impl Iterator<Item = &UnitKey> {
        self.steps.iter().map(|s| &s.unit)
    }
}

/// A progress notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressAction {
    /// Before the state pass.
    RenderStart,
    /// After the state pass.
    RenderSuccess,
    /// Before a unit is applied.
    ApplyStart,
    /// After a unit is applied and recorded.
    ApplySuccess,
    /// Before a unit is unapplied.
    UnapplyStart,
    /// After a unit is unapplied and unrecorded.
    UnapplySuccess,
}

impl ProgressAction {
    /// Returns the action tag.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RenderStart => "render_start",
            Self::RenderSuccess => "render_success",
            Self::ApplyStart => "apply_start",
            Self::ApplySuccess => "apply_success",
            Self::UnapplyStart => "unapply_start",
            Self::UnapplySuccess => "unapply_success",
        }
    }
}

impl fmt::Display for ProgressAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives progress notifications: the action, the unit (none for the
/// render actions), and whether the unit is being faked.
///
/// Purely informational; it cannot influence the run.
pub type ProgressCallback = Arc<dyn Fn(ProgressAction, Option<&UnitKey>, bool) + Send + Sync>;

/// Flags for [`MigrationExecutor::migrate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Record (or unrecord) without running any operation.
    pub fake: bool,
    /// Record an initial unit without running it when its effects are
    /// already present.
    pub fake_initial: bool,
}

/// Plans and runs units against one database and one ledger.
pub struct MigrationExecutor {
    loaded: LoadedUnits,
    resolved: ResolvedGraph,
    ledger: Arc<dyn Ledger>,
    backend: Arc<dyn DatabaseBackend>,
    progress: Option<ProgressCallback>,
}

impl MigrationExecutor {
    /// Creates an executor, building the graph from the ledger's current
    /// applied set.
    pub async fn new(
        loaded: LoadedUnits,
        ledger: Arc<dyn Ledger>,
        backend: Arc<dyn DatabaseBackend>,
    ) -> MigrationResult<Self> {
        let applied = ledger.applied_units().await?;
        let resolved = loaded.build_graph(&applied)?;
        Ok(Self {
            loaded,
            resolved,
            ledger,
            backend,
            progress: None,
        })
    }

    /// Installs a progress callback.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Rebuilds the graph from the ledger's current state.
    pub async fn reload(&mut self) -> MigrationResult<()> {
        let applied = self.ledger.applied_units().await?;
        self.resolved = self.loaded.build_graph(&applied)?;
        Ok(())
    }

    /// Returns the loaded units.
    pub fn loaded(&self) -> &LoadedUnits {
        &self.loaded
    }

    /// Returns the resolved graph.
    pub fn resolved(&self) -> &ResolvedGraph {
        &self.resolved
    }

    /// Returns the dependency graph.
    pub fn graph(&self) -> &MigrationGraph {
        &self.resolved.graph
    }

    /// Returns the applied set the graph was built against.
    pub fn applied(&self) -> &BTreeSet<UnitKey> {
        &self.resolved.applied
    }

    /// Returns the ledger.
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Targets the leaf of every namespace.
    pub fn leaf_targets(&self) -> Vec<MigrationTarget> {
        self.resolved
            .graph
            .leaf_nodes(None)
            .into_iter()
            .map(MigrationTarget::Unit)
            .collect()
    }

    /// Fails with [`MigrationError::InconsistentHistory`] if the ledger
    /// records a unit whose parent is not recorded.
    pub async fn check_consistent_history(&self) -> MigrationResult<()> {
        let applied = self.ledger.applied_units().await?;
        self.resolved.check_consistent_history(&applied)
    }

    /// Computes the plan that brings the database to `targets`.
    ///
    /// With `clean_start` the plan is computed as if nothing were applied.
    pub fn migration_plan(
        &self,
        targets: &[MigrationTarget],
        clean_start: bool,
    ) -> MigrationResult<MigrationPlan> {
        let graph = &self.resolved.graph;
        let mut applied = if clean_start {
            BTreeSet::new()
        } else {
            self.resolved.applied.clone()
        };
        let mut plan = MigrationPlan::new();

        for target in targets {
            match target {
                MigrationTarget::Zero(namespace) => {
                    for root in graph.root_nodes(Some(namespace.as_str())) {
                        for key in graph.backwards_plan(&root)? {
                            if applied.remove(&key) {
                                plan.add_step(MigrationStep::backward(key));
                            }
                        }
                    }
                }
                MigrationTarget::Unit(key) if !graph.contains(key) => {
                    return Err(MigrationError::UnknownTarget {
                        namespace: key.namespace.clone(),
                        prefix: key.name.clone(),
                    });
                }
                MigrationTarget::Unit(key) if applied.contains(key) => {
                    // Roll back only through the target's children in its own
                    // namespace, not through other namespaces' dependents of
                    // the target itself.
                    let next_in_namespace: Vec<UnitKey> = graph
                        .children(key)
                        .into_iter()
                        .filter(|child| child.namespace == key.namespace)
                        .cloned()
                        .collect();
                    for child in next_in_namespace {
                        for key in graph.backwards_plan(&child)? {
                            if applied.remove(&key) {
                                plan.add_step(MigrationStep::backward(key));
                            }
                        }
                    }
                }
                MigrationTarget::Unit(key) => {
                    for key in graph.forwards_plan(key)? {
                        if applied.insert(key.clone()) {
                            plan.add_step(MigrationStep::forward(key));
                        }
                    }
                }
            }
        }
        Ok(plan)
    }

    /// Migrates the database to `targets`.
    ///
    /// When `plan` is `None` it is computed from `targets`. An empty plan is a
    /// no-op; a plan mixing directions fails with
    /// [`MigrationError::InvalidPlan`] before the ledger is touched. Replacing
    /// units whose targets end up fully applied are recorded at the end.
    pub async fn migrate(
        &self,
        targets: &[MigrationTarget],
        plan: Option<MigrationPlan>,
        options: MigrateOptions,
    ) -> MigrationResult<()> {
        self.ledger.ensure_schema().await?;

        let plan = match plan {
            Some(plan) => plan,
            None => self.migration_plan(targets, false)?,
        };
        let all_forwards = plan.all_forwards();
        let all_backwards = plan.all_backwards();
        if plan.is_empty() {
            tracing::info!("no migrations to apply");
        } else if all_forwards == all_backwards {
            return Err(MigrationError::InvalidPlan);
        } else if all_forwards {
            // The clean-start plan fixes the apply order; it is only needed here.
            let full_plan = self.migration_plan(&self.leaf_targets(), true)?;
            self.migrate_all_forwards(&plan, &full_plan, options).await?;
        } else {
            self.migrate_all_backwards(&plan, options.fake).await?;
        }

        self.check_replacements().await
    }

    async fn migrate_all_forwards(
        &self,
        plan: &MigrationPlan,
        full_plan: &MigrationPlan,
        options: MigrateOptions,
    ) -> MigrationResult<()> {
        let mut to_run: HashSet<&UnitKey> = plan.units().collect();
        let known: HashSet<&UnitKey> = full_plan.units().collect();
        if let Some(key) = to_run.iter().filter(|key| !known.contains(*key)).min() {
            return Err(MigrationError::UnknownTarget {
                namespace: key.namespace.clone(),
                prefix: key.name.clone(),
            });
        }
        let mut rendered = false;

        for key in full_plan.units() {
            if to_run.is_empty() {
                break;
            }
            if !to_run.remove(key) {
                continue;
            }
            if !rendered {
                self.notify(ProgressAction::RenderStart, None, false);
                self.notify(ProgressAction::RenderSuccess, None, false);
                rendered = true;
            }
            let unit = self.unit(key)?;
            self.apply_unit(unit, options).await?;
        }
        Ok(())
    }

    async fn migrate_all_backwards(
        &self,
        plan: &MigrationPlan,
        fake: bool,
    ) -> MigrationResult<()> {
        self.notify(ProgressAction::RenderStart, None, false);
        let units = plan
            .units()
            .map(|key| self.unit(key))
            .collect::<MigrationResult<Vec<_>>>()?;
        if !fake {
            for unit in &units {
                if let Some(op) = unit.irreversible_operation() {
                    return Err(MigrationError::IrreversibleUnit {
                        unit: unit.key.node_ref(),
                        reason: format!("operation '{}' cannot be reversed", op.describe()),
                    });
                }
            }
        }
        self.notify(ProgressAction::RenderSuccess, None, false);

        for unit in units {
            self.unapply_unit(unit, fake).await?;
        }
        Ok(())
    }

    /// Applies one unit and records it.
    pub async fn apply_unit(
        &self,
        unit: &MigrationUnit,
        options: MigrateOptions,
    ) -> MigrationResult<()> {
        let mut fake = options.fake;
        self.notify(ProgressAction::ApplyStart, Some(&unit.key), fake);

        if !fake && options.fake_initial && self.detect_soft_applied(unit).await? {
            tracing::info!(unit = %unit.key, "initial unit already present, faking");
            fake = true;
        }
        if fake {
            tracing::info!(unit = %unit.key, "recording unit without running it");
        } else {
            tracing::info!(unit = %unit.key, "applying unit");
            self.run_operations(unit, false).await?;
        }

        self.record_applied(unit).await?;
        self.notify(ProgressAction::ApplySuccess, Some(&unit.key), fake);
        Ok(())
    }

    /// Unapplies one unit and removes its ledger rows.
    pub async fn unapply_unit(&self, unit: &MigrationUnit, fake: bool) -> MigrationResult<()> {
        self.notify(ProgressAction::UnapplyStart, Some(&unit.key), fake);
        if fake {
            tracing::info!(unit = %unit.key, "unrecording unit without running it");
        } else {
            tracing::info!(unit = %unit.key, "unapplying unit");
            self.run_operations(unit, true).await?;
        }

        for key in &unit.replaces {
            self.ledger.record_unapplied(key).await?;
        }
        self.ledger.record_unapplied(&unit.key).await?;
        self.notify(ProgressAction::UnapplySuccess, Some(&unit.key), fake);
        Ok(())
    }

    /// Records a unit. A replacing unit records each unit it replaces.
    pub async fn record_applied(&self, unit: &MigrationUnit) -> MigrationResult<()> {
        if unit.is_replacing() {
            for key in &unit.replaces {
                self.ledger.record_applied(key).await?;
            }
        } else {
            self.ledger.record_applied(&unit.key).await?;
        }
        Ok(())
    }

    /// Records every replacing unit whose replaced units are all recorded.
    pub async fn check_replacements(&self) -> MigrationResult<()> {
        let applied = self.ledger.applied_units().await?;
        for (key, unit) in &self.resolved.replacements {
            let all_applied = unit.replaces.iter().all(|t| applied.contains(t));
            if all_applied && !applied.contains(key) {
                tracing::debug!(unit = %key, "recording fully applied replacement");
                self.ledger.record_applied(key).await?;
            }
        }
        Ok(())
    }

    /// Returns `true` if `unit` is initial and every probe it carries finds
    /// its effect already present.
    ///
    /// A unit without any probe is never considered soft-applied.
    pub async fn detect_soft_applied(&self, unit: &MigrationUnit) -> MigrationResult<bool> {
        if !unit.initial {
            return Ok(false);
        }
        let probes: Vec<&str> = unit.operations.iter().filter_map(|op| op.probe_sql()).collect();
        if probes.is_empty() {
            return Ok(false);
        }
        for probe in probes {
            if self.backend.query(probe, &[]).await?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn run_operations(&self, unit: &MigrationUnit, backwards: bool) -> MigrationResult<()> {
        if unit.atomic {
            self.backend.begin_transaction().await?;
        }
        let result = self.run_statements(unit, backwards).await;
        match (unit.atomic, result) {
            (true, Ok(())) => self.backend.commit().await,
            (true, Err(err)) => {
                if let Err(rollback_err) = self.backend.rollback().await {
                    tracing::warn!(unit = %unit.key, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
            (false, result) => result,
        }
    }

    async fn run_statements(&self, unit: &MigrationUnit, backwards: bool) -> MigrationResult<()> {
        let namespace = unit.namespace();
        let operations: Vec<&Arc<dyn Operation>> = if backwards {
            unit.operations.iter().rev().collect()
        } else {
            unit.operations.iter().collect()
        };
        for op in operations {
            let statements = if backwards {
                op.database_backwards(namespace)?
            } else {
                op.database_forwards(namespace)?
            };
            for sql in &statements {
                if sql.trim_start().starts_with("--") {
                    continue;
                }
                tracing::debug!(unit = %unit.key, sql = %sql, "executing");
                self.backend.execute(sql, &[]).await?;
            }
        }
        Ok(())
    }

    fn unit(&self, key: &UnitKey) -> MigrationResult<&MigrationUnit> {
        self.resolved
            .unit(key)
            .ok_or_else(|| MigrationError::UnknownTarget {
                namespace: key.namespace.clone(),
                prefix: key.name.clone(),
            })
    }

    fn notify(&self, action: ProgressAction, unit: Option<&UnitKey>, fake: bool) {
        if let Some(progress) = &self.progress {
            progress(action, unit, fake);
        }
    }
}
