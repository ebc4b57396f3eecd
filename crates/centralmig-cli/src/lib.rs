//! # centralmig-cli
//!
//! Management commands for centralmig.
//!
//! This crate provides:
//!
//! - **Management commands** - A framework for defining and registering CLI
//!   commands, plus the built-in `migrate`, `makemigrations`,
//!   `showmigrations`, and `arrangemigrations`
//! - **Console reporting** - Human-readable output and progress lines
//!
//! ## Quick Start
//!
//! ```rust
//! use centralmig_cli::command::{CommandRegistry, BINARY_NAME};
//!
//! let registry = CommandRegistry::with_builtin_commands();
//! assert!(registry.names().contains(&"migrate"));
//!
//! let matches = registry
//!     .build_cli()
//!     .try_get_matches_from([BINARY_NAME, "showmigrations", "--plan"])
//!     .unwrap();
//! assert_eq!(matches.subcommand_name(), Some("showmigrations"));
//! ```

// These clippy lints are intentionally allowed:
// - result_large_err: MigrationError is the workspace-wide error type
// - doc_markdown: backtick requirements for documentation items are too strict
// - missing_const_for_fn: some functions may gain runtime logic later
// - module_name_repetitions: re-exports make module-prefixed names redundant
// - unused_async: command handlers maintain consistent async signatures
#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::unused_async)]

pub mod command;
pub mod commands;
pub mod reporter;

// Re-export primary types at the crate root for convenience.
pub use command::{exit_status, load_settings, CommandRegistry, ManagementCommand, BINARY_NAME};
pub use commands::register_builtin_commands;
pub use reporter::{ConsoleReporter, SharedBuffer};
