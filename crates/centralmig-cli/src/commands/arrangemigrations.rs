//! The `arrangemigrations` management command.
//!
//! Renames legacy units (numbered per namespace, e.g. `0001_init`) into
//! globally sortable names and writes them to the retro directory, rewriting
//! the references between them so the renamed set still forms the same graph.

use std::path::PathBuf;

use async_trait::async_trait;
use centralmig_core::{MigrationError, MigrationResult, NamespaceRegistry, Settings};
use centralmig_migrations::serializer::write_unit;
use centralmig_migrations::{arrange_units, Arranger, MigrationLoader};

use crate::command::ManagementCommand;
use crate::reporter::ConsoleReporter;

use super::{verbosity, verbosity_arg};

/// Renames legacy units into the retro directory.
#[derive(Default)]
pub struct ArrangemigrationsCommand {
    reporter: Option<ConsoleReporter>,
}

impl ArrangemigrationsCommand {
    /// Creates the command writing to the given reporter instead of stdout.
    pub fn with_reporter(reporter: ConsoleReporter) -> Self {
        Self {
            reporter: Some(reporter),
        }
    }
}

#[async_trait]
impl ManagementCommand for ArrangemigrationsCommand {
    fn name(&self) -> &'static str {
        "arrangemigrations"
    }

    fn help(&self) -> &'static str {
        "Rename legacy units with sortable names into the retro directory"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("source")
                .long("source")
                .required(true)
                .help("Directory holding the legacy unit files"),
        )
        .arg(
            clap::Arg::new("dest")
                .long("dest")
                .help("Output directory (defaults to the configured retro directory)"),
        )
        .arg(
            clap::Arg::new("dry-run")
                .long("dry-run")
                .action(clap::ArgAction::SetTrue)
                .help("Show the renames without writing files"),
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
        let source = matches
            .get_one::<String>("source")
            .map(PathBuf::from)
            .ok_or_else(|| MigrationError::ConfigurationError("--source is required".into()))?;
        let dest = matches
            .get_one::<String>("dest")
            .map(PathBuf::from)
            .or_else(|| settings.migrations.retro_directory.clone())
            .ok_or_else(|| {
                MigrationError::ConfigurationError(
                    "No output directory: pass --dest or set migrations.retro_directory".into(),
                )
            })?;

        let loaded = MigrationLoader::new(NamespaceRegistry::from_settings(settings))
            .with_directory(&source)
            .load()?;
        let units: Vec<_> = loaded.units.into_values().collect();
        if units.is_empty() {
            reporter.line("No units to arrange.");
            return Ok(());
        }

        let mut arranger =
            Arranger::new().with_description_limit(settings.migrations.name_description_limit);
        let arrangement = arrange_units(units, &mut arranger)?;

        for unit in &arrangement.units {
            let old = arrangement
                .renames
                .iter()
                .find_map(|(old, new)| (*new == unit.key).then_some(old));
            let (path, _) = write_unit(&dest, unit, dry_run)?;
            if let Some(old) = old {
                reporter.line(format!("  {old} -> {}", unit.key));
            }
            tracing::debug!(path = %path.display(), dry_run, "arranged unit");
        }
        tracing::info!(
            units = arrangement.units.len(),
            dest = %dest.display(),
            dry_run,
            "arranged legacy units"
        );
        Ok(())
    }
}
