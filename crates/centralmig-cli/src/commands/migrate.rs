//! The `migrate` management command.
//!
//! Brings the database to a target state. With no arguments every namespace
//! is migrated to its leaf; with a namespace only that namespace is; with a
//! namespace and a unit name prefix the database is moved forward or back to
//! that unit; `zero` unapplies the namespace entirely.

use async_trait::async_trait;
use centralmig_core::{MigrationError, MigrationResult, Settings};
use centralmig_migrations::{MigrateOptions, MigrationExecutor, MigrationPlan, MigrationTarget};

use crate::command::ManagementCommand;
use crate::reporter::ConsoleReporter;

use super::{database_arg, open_executor, verbosity, verbosity_arg};

/// Applies or unapplies migration units.
#[derive(Default)]
pub struct MigrateCommand {
    reporter: Option<ConsoleReporter>,
}

impl MigrateCommand {
    /// Creates the command writing to the given reporter instead of stdout.
    pub fn with_reporter(reporter: ConsoleReporter) -> Self {
        Self {
            reporter: Some(reporter),
        }
    }
}

#[async_trait]
impl ManagementCommand for MigrateCommand {
    fn name(&self) -> &'static str {
        "migrate"
    }

    fn help(&self) -> &'static str {
        "Apply or unapply migration units"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("namespace")
                .help("Namespace to migrate")
                .required(false),
        )
        .arg(
            clap::Arg::new("target")
                .help("Unit name prefix to migrate to, or `zero` to unapply everything")
                .required(false),
        )
        .arg(
            clap::Arg::new("fake")
                .long("fake")
                .action(clap::ArgAction::SetTrue)
                .help("Mark units as run without actually running them"),
        )
        .arg(
            clap::Arg::new("fake-initial")
                .long("fake-initial")
                .action(clap::ArgAction::SetTrue)
                .help("Mark initial units as run if their effects already exist"),
        )
        .arg(
            clap::Arg::new("plan")
                .long("plan")
                .action(clap::ArgAction::SetTrue)
                .help("Show the operations that would run, without running them"),
        )
        .arg(database_arg())
        .arg(verbosity_arg())
    }

    async fn handle(&self, matches: &clap::ArgMatches, settings: &Settings) -> MigrationResult<()> {
        let reporter = self
            .reporter
            .clone()
            .unwrap_or_default()
            .with_verbosity(verbosity(matches));
        let database = matches
            .get_one::<String>("database")
            .map_or("default", String::as_str);
        let namespace = matches.get_one::<String>("namespace").map(String::as_str);
        let target = matches.get_one::<String>("target").map(String::as_str);
        let options = MigrateOptions {
            fake: matches.get_flag("fake"),
            fake_initial: matches.get_flag("fake-initial"),
        };

        tracing::info!(database, "running migrate");
        let executor = open_executor(settings, database).await?;
        executor.check_consistent_history().await?;

        let targets = resolve_targets(&executor, namespace, target)?;
        let plan = executor.migration_plan(&targets, false)?;

        if matches.get_flag("plan") {
            report_plan(&reporter, &executor, &plan);
            return Ok(());
        }

        reporter.line("Operations to perform:");
        match (namespace, targets.as_slice()) {
            (None, _) => {
                let mut namespaces: Vec<&str> =
                    executor.loaded().migrated.iter().map(String::as_str).collect();
                namespaces.sort_unstable();
                reporter.line(format!("  Apply all units: {}", namespaces.join(", ")));
            }
            (Some(ns), [MigrationTarget::Zero(_)]) => {
                reporter.line(format!("  Unapply all units: {ns}"));
            }
            (Some(ns), _) if target.is_none() => {
                reporter.line(format!("  Apply all units: {ns}"));
            }
            (Some(ns), [MigrationTarget::Unit(key)]) => {
                reporter.line(format!("  Target specific unit: {}, from {ns}", key.name));
            }
            (Some(ns), _) => reporter.line(format!("  Apply all units: {ns}")),
        }

        reporter.line("Running migrations:");
        if plan.is_empty() {
            reporter.line("  No migrations to apply.");
        }
        let executor = executor.with_progress(reporter.progress_callback());
        executor.migrate(&targets, Some(plan), options).await
    }
}

/// Turns the command-line namespace and target into executor targets.
pub(crate) fn resolve_targets(
    executor: &MigrationExecutor,
    namespace: Option<&str>,
    target: Option<&str>,
) -> MigrationResult<Vec<MigrationTarget>> {
    let Some(namespace) = namespace else {
        return Ok(executor.leaf_targets());
    };
    let loaded = executor.loaded();
    if !loaded.is_known_namespace(namespace) {
        return Err(MigrationError::UnknownNamespace(namespace.to_string()));
    }
    if !loaded.migrated.contains(namespace) {
        return Err(MigrationError::ConfigurationError(format!(
            "Namespace '{namespace}' does not have migrations"
        )));
    }

    match target {
        Some("zero") => Ok(vec![MigrationTarget::Zero(namespace.to_string())]),
        Some(prefix) => {
            let unit = loaded.get_by_prefix(namespace, prefix)?;
            Ok(vec![MigrationTarget::Unit(unit.key.clone())])
        }
        None => Ok(executor
            .graph()
            .leaf_nodes(Some(namespace))
            .into_iter()
            .map(MigrationTarget::Unit)
            .collect()),
    }
}

fn report_plan(reporter: &ConsoleReporter, executor: &MigrationExecutor, plan: &MigrationPlan) {
    reporter.line("Planned operations:");
    if plan.is_empty() {
        reporter.line("  No planned migration operations.");
        return;
    }
    for step in &plan.steps {
        reporter.line(step.unit.to_string());
        let Some(unit) = executor.resolved().unit(&step.unit) else {
            continue;
        };
        for op in &unit.operations {
            let irreversible = step.backwards && !op.reversible();
            let prefix = if step.backwards { "Undo " } else { "" };
            let suffix = if irreversible { " -> IRREVERSIBLE" } else { "" };
            reporter.line(format!("    {prefix}{}{suffix}", op.describe()));
        }
    }
}
