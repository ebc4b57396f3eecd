//! The `centralmig` binary.

use std::process::ExitCode;

use centralmig_cli::CommandRegistry;

#[tokio::main]
async fn main() -> ExitCode {
    let registry = CommandRegistry::with_builtin_commands();
    let matches = registry.build_cli().get_matches();
    registry.run(&matches).await
}
