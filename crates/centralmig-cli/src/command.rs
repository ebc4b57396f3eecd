//! Command dispatch for the `centralmig` binary.
//!
//! A [`ManagementCommand`] is one subcommand (`migrate`, `makemigrations`,
//! `showmigrations`, `arrangemigrations`). [`CommandRegistry`] assembles the
//! clap tree, resolves settings from `--settings` or the environment, runs the
//! selected command inside a `run` span and turns failures into process exit
//! codes.

use std::collections::BTreeMap;
use std::process::ExitCode;

use async_trait::async_trait;
use centralmig_core::logging::{run_span, setup_logging};
use centralmig_core::{settings_loader, MigrationError, MigrationResult, Settings, SETTINGS};
use tracing::Instrument;

use crate::commands::register_builtin_commands;

/// The name of the binary, used as the top-level clap command.
pub const BINARY_NAME: &str = "centralmig";

/// One subcommand of the `centralmig` binary.
#[async_trait]
pub trait ManagementCommand: Send + Sync {
    /// The subcommand name as typed on the command line.
    fn name(&self) -> &'static str;

    /// One-line help shown by `centralmig --help`.
    fn help(&self) -> &'static str;

    /// Adds the subcommand's own arguments. The `--settings` flag is global
    /// and must not be redeclared here.
    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd
    }

    /// Runs the subcommand against already-resolved settings.
    async fn handle(&self, matches: &clap::ArgMatches, settings: &Settings) -> MigrationResult<()>;
}

/// The subcommands known to the binary, keyed and listed by name.
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, Box<dyn ManagementCommand>>,
}

impl CommandRegistry {
    /// Creates a registry with no subcommands.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the four built-in subcommands.
    pub fn with_builtin_commands() -> Self {
        let mut registry = Self::new();
        register_builtin_commands(&mut registry);
        registry
    }

    /// Registers `command`, replacing any subcommand with the same name.
    pub fn register(&mut self, command: Box<dyn ManagementCommand>) {
        self.commands.insert(command.name(), command);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ManagementCommand> {
        self.commands.get(name).map(AsRef::as_ref)
    }

    /// Registered subcommand names in alphabetical order.
    pub fn names(&self) -> Vec<&'static str> {
        self.commands.keys().copied().collect()
    }

    /// Builds the clap tree: the global `--settings` flag plus one
    /// subcommand per registered command.
    pub fn build_cli(&self) -> clap::Command {
        let app = clap::Command::new(BINARY_NAME)
            .about("Centralized migration planner and executor")
            .subcommand_required(true)
            .arg(
                clap::Arg::new("settings")
                    .long("settings")
                    .global(true)
                    .help("Path to a TOML or JSON settings file"),
            );

        self.commands.values().fold(app, |app, cmd| {
            app.subcommand(cmd.add_arguments(clap::Command::new(cmd.name()).about(cmd.help())))
        })
    }

    /// Dispatches the selected subcommand inside a `run` span.
    pub async fn execute(
        &self,
        matches: &clap::ArgMatches,
        settings: &Settings,
    ) -> MigrationResult<()> {
        let (name, sub_matches) = matches.subcommand().ok_or_else(|| {
            MigrationError::ConfigurationError("No subcommand specified".to_string())
        })?;
        let cmd = self
            .get(name)
            .ok_or_else(|| MigrationError::ConfigurationError(format!("Unknown command: {name}")))?;

        cmd.handle(sub_matches, settings)
            .instrument(run_span(name))
            .await
    }

    /// Runs one invocation of the binary: loads settings, installs logging,
    /// publishes the settings to [`SETTINGS`] and dispatches.
    ///
    /// # Panics
    ///
    /// Panics if [`SETTINGS`] was already configured in this process.
    pub async fn run(&self, matches: &clap::ArgMatches) -> ExitCode {
        let settings = match load_settings(matches) {
            Ok(settings) => settings,
            Err(err) => return report_failure(&err),
        };
        setup_logging(&settings);
        SETTINGS.configure(settings);

        match self.execute(matches, SETTINGS.get()).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                tracing::error!(error = %err, "command failed");
                report_failure(&err)
            }
        }
    }
}

/// Resolves settings from the `--settings` file when given, otherwise from
/// defaults; `CENTRALMIG_*` variables override either way.
pub fn load_settings(matches: &clap::ArgMatches) -> MigrationResult<Settings> {
    match matches.get_one::<String>("settings") {
        Some(path) => settings_loader::from_file_with_env(path),
        None => Ok(settings_loader::from_env()),
    }
}

/// The process status for `err`, clamped into the `u8` range.
pub fn exit_status(err: &MigrationError) -> u8 {
    u8::try_from(err.exit_code()).unwrap_or(1)
}

fn report_failure(err: &MigrationError) -> ExitCode {
    eprintln!("Error: {err}");
    ExitCode::from(exit_status(err))
}
