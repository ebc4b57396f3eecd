//! The `showmigrations` management command.
//!
//! Lists units per namespace with `[X]` for applied and `[ ]` for pending,
//! or with `--plan` the order a full migrate would run them in.

use std::collections::BTreeSet;

use async_trait::async_trait;
use centralmig_core::{MigrationError, MigrationResult, Settings};
use centralmig_migrations::{MigrationExecutor, UnitKey};

use crate::command::ManagementCommand;
use crate::reporter::ConsoleReporter;

use super::{database_arg, open_executor, verbosity, verbosity_arg};

/// Lists all units and whether they are applied.
#[derive(Default)]
pub struct ShowmigrationsCommand {
    reporter: Option<ConsoleReporter>,
}

impl ShowmigrationsCommand {
    /// Creates the command writing to the given reporter instead of stdout.
    pub fn with_reporter(reporter: ConsoleReporter) -> Self {
        Self {
            reporter: Some(reporter),
        }
    }
}

#[async_trait]
impl ManagementCommand for ShowmigrationsCommand {
    fn name(&self) -> &'static str {
        "showmigrations"
    }

    fn help(&self) -> &'static str {
        "Show migration status"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("namespace")
                .help("Namespace(s) to show units for")
                .num_args(0..)
                .required(false),
        )
        .arg(database_arg())
        .arg(
            clap::Arg::new("plan")
                .long("plan")
                .action(clap::ArgAction::SetTrue)
                .help("Show units in the order they will be applied"),
        )
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
        let namespaces: Vec<String> = matches
            .get_many::<String>("namespace")
            .map_or_else(Vec::new, |values| values.cloned().collect());

        let executor = open_executor(settings, database).await?;
        if matches.get_flag("plan") {
            show_plan(&reporter, &executor)
        } else {
            show_list(&reporter, &executor, namespaces)
        }
    }
}

fn show_list(
    reporter: &ConsoleReporter,
    executor: &MigrationExecutor,
    namespaces: Vec<String>,
) -> MigrationResult<()> {
    let loaded = executor.loaded();
    let namespaces: Vec<String> = if namespaces.is_empty() {
        let mut all: BTreeSet<String> = loaded.migrated.clone();
        all.extend(loaded.unmigrated.iter().cloned());
        all.into_iter().collect()
    } else {
        for namespace in &namespaces {
            if !loaded.is_known_namespace(namespace) {
                return Err(MigrationError::UnknownNamespace(namespace.clone()));
            }
        }
        namespaces
    };

    let graph = executor.graph();
    for namespace in &namespaces {
        reporter.line(namespace);
        let mut shown: BTreeSet<UnitKey> = BTreeSet::new();
        for leaf in graph.leaf_nodes(Some(namespace.as_str())) {
            for key in graph.forwards_plan(&leaf)? {
                if key.namespace != *namespace || shown.contains(&key) {
                    continue;
                }
                let mut title = key.name.clone();
                if let Some(unit) = executor.resolved().unit(&key) {
                    if unit.is_replacing() {
                        title.push_str(&format!(" ({} squashed units)", unit.replaces.len()));
                    }
                }
                let mark = if executor.applied().contains(&key) { "X" } else { " " };
                reporter.line(format!(" [{mark}] {title}"));
                shown.insert(key);
            }
        }
        if shown.is_empty() {
            reporter.line(" (no migrations)");
        }
    }
    Ok(())
}

fn show_plan(reporter: &ConsoleReporter, executor: &MigrationExecutor) -> MigrationResult<()> {
    let graph = executor.graph();
    let mut seen: BTreeSet<UnitKey> = BTreeSet::new();
    let mut plan: Vec<UnitKey> = Vec::new();
    for leaf in graph.leaf_nodes(None) {
        for key in graph.forwards_plan(&leaf)? {
            if seen.insert(key.clone()) {
                plan.push(key);
            }
        }
    }

    for key in &plan {
        let mark = if executor.applied().contains(key) { "X" } else { " " };
        let mut line = format!("[{mark}]  {key}");
        if reporter.verbosity() >= 2 {
            let parents: Vec<String> = graph.parents(key).iter().map(ToString::to_string).collect();
            if !parents.is_empty() {
                line.push_str(&format!(" ... ({})", parents.join(", ")));
            }
        }
        reporter.line(line);
    }
    if plan.is_empty() {
        reporter.line("(no migrations)");
    }
    Ok(())
}
