//! The `makemigrations` management command.
//!
//! Creates a new, empty unit file for each named namespace. The unit depends
//! on the namespace's current leaf and gets a sortable name from the
//! [`Arranger`], so files list in creation order.

use std::collections::BTreeSet;

use async_trait::async_trait;
use centralmig_core::{MigrationError, MigrationResult, Settings};
use centralmig_migrations::serializer::{empty_unit, write_unit};
use centralmig_migrations::Arranger;

use crate::command::ManagementCommand;
use crate::reporter::ConsoleReporter;

use super::{load_units, verbosity, verbosity_arg};

/// Generates new unit files.
#[derive(Default)]
pub struct MakemigrationsCommand {
    reporter: Option<ConsoleReporter>,
}

impl MakemigrationsCommand {
    /// Creates the command writing to the given reporter instead of stdout.
    pub fn with_reporter(reporter: ConsoleReporter) -> Self {
        Self {
            reporter: Some(reporter),
        }
    }
}

#[async_trait]
impl ManagementCommand for MakemigrationsCommand {
    fn name(&self) -> &'static str {
        "makemigrations"
    }

    fn help(&self) -> &'static str {
        "Create new, empty migration units"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("namespace")
                .help("Namespace(s) to create units for")
                .num_args(1..)
                .required(true),
        )
        .arg(
            clap::Arg::new("dry-run")
                .long("dry-run")
                .action(clap::ArgAction::SetTrue)
                .help("Show what would be written without writing it"),
        )
        .arg(
            clap::Arg::new("name")
                .short('n')
                .long("name")
                .help("Description used in the generated unit name"),
        )
        .arg(verbosity_arg())
    }

    async fn handle(&self, matches: &clap::ArgMatches, settings: &Settings) -> MigrationResult<()> {
        let reporter = self
            .reporter
            .clone()
            .unwrap_or_default()
            .with_verbosity(verbosity(matches));
        let dry_run = matches.get_flag("dry-run");
        let description = matches
            .get_one::<String>("name")
            .map_or("auto", String::as_str);
        let namespaces: Vec<&str> = matches
            .get_many::<String>("namespace")
            .map_or_else(Vec::new, |values| values.map(String::as_str).collect());

        let loaded = load_units(settings)?;
        for namespace in &namespaces {
            if !loaded.is_known_namespace(namespace) {
                return Err(MigrationError::UnknownNamespace((*namespace).to_string()));
            }
        }
        let resolved = loaded.build_graph(&BTreeSet::new())?;

        let mut arranger =
            Arranger::new().with_description_limit(settings.migrations.name_description_limit);
        let directory = &settings.migrations.directory;
        for namespace in namespaces {
            let leaves = resolved.graph.leaf_nodes(Some(namespace));
            if leaves.len() > 1 {
                let names: Vec<String> = leaves.iter().map(|k| k.name.clone()).collect();
                return Err(MigrationError::ConfigurationError(format!(
                    "Conflicting units detected; multiple leaf nodes in the graph: ({}) in {namespace}",
                    names.join(", ")
                )));
            }

            let name = arranger.next_name(namespace, description);
            let unit = empty_unit(namespace, &name, leaves.first());
            let (path, content) = write_unit(directory, &unit, dry_run)?;
            tracing::info!(unit = %unit.key, dry_run, "created unit");

            reporter.line(format!("Units for '{namespace}':"));
            reporter.line(format!("  {}", path.display()));
            reporter.line("    - (no operations)");
            if dry_run && reporter.verbosity() >= 3 {
                reporter.line(content);
            }
        }
        Ok(())
    }
}
