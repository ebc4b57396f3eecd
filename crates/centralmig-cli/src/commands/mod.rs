//! Built-in management commands.
//!
//! Each command implements the
//! [`ManagementCommand`](crate::command::ManagementCommand) trait and writes
//! its output through a [`ConsoleReporter`](crate::reporter::ConsoleReporter).

pub mod arrangemigrations;
pub mod makemigrations;
pub mod migrate;
pub mod showmigrations;

use std::sync::Arc;

pub use arrangemigrations::ArrangemigrationsCommand;
pub use makemigrations::MakemigrationsCommand;
pub use migrate::MigrateCommand;
pub use showmigrations::ShowmigrationsCommand;

use centralmig_core::{MigrationError, MigrationResult, Settings};
use centralmig_migrations::{DatabaseLedger, LoadedUnits, MigrationExecutor, MigrationLoader};

use crate::command::CommandRegistry;

/// Registers all built-in management commands into the given registry.
pub fn register_builtin_commands(registry: &mut CommandRegistry) {
    registry.register(Box::new(MigrateCommand::default()));
    registry.register(Box::new(MakemigrationsCommand::default()));
    registry.register(Box::new(ShowmigrationsCommand::default()));
    registry.register(Box::new(ArrangemigrationsCommand::default()));
}

/// Loads every unit named by `settings`, logging skipped retro files.
pub(crate) fn load_units(settings: &Settings) -> MigrationResult<LoadedUnits> {
    let loaded = MigrationLoader::from_settings(settings).load()?;
    for skipped in &loaded.skipped {
        tracing::warn!(
            path = %skipped.path.display(),
            reason = %skipped.reason,
            "skipping unreadable retro unit file"
        );
    }
    Ok(loaded)
}

/// Connects to the `database` alias and builds an executor over its ledger.
pub(crate) async fn open_executor(
    settings: &Settings,
    database: &str,
) -> MigrationResult<MigrationExecutor> {
    let db = settings.database(database).ok_or_else(|| {
        MigrationError::ConfigurationError(format!("Database alias '{database}' is not configured"))
    })?;
    let backend = centralmig_backends::connect(db)?;
    let ledger = Arc::new(DatabaseLedger::with_table(
        backend.clone(),
        settings.migrations.ledger_table.clone(),
    ));
    MigrationExecutor::new(load_units(settings)?, ledger, backend).await
}

/// The `--database` option shared by commands that touch the ledger.
pub(crate) fn database_arg() -> clap::Arg {
    clap::Arg::new("database")
        .long("database")
        .default_value("default")
        .help("Database alias to use")
}

/// The `-v/--verbosity` option.
pub(crate) fn verbosity_arg() -> clap::Arg {
    clap::Arg::new("verbosity")
        .short('v')
        .long("verbosity")
        .value_parser(clap::value_parser!(u8).range(0..=3))
        .default_value("1")
        .help("Verbosity level: 0 = minimal, 1 = normal, 2 = verbose, 3 = very verbose")
}

pub(crate) fn verbosity(matches: &clap::ArgMatches) -> u8 {
    matches.get_one::<u8>("verbosity").copied().unwrap_or(1)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_builtin_commands() {
        let mut registry = CommandRegistry::new();
        register_builtin_commands(&mut registry);
        assert_eq!(
            registry.names(),
            vec!["arrangemigrations", "makemigrations", "migrate", "showmigrations"]
        );
    }

    #[tokio::test]
    async fn test_open_executor_unknown_alias() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_support::settings(dir.path(), &["billing"]);
        let result = open_executor(&settings, "replica").await;
        assert!(matches!(result, Err(MigrationError::ConfigurationError(_))));
    }
}
