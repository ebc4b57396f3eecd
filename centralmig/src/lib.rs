//! # centralmig
//!
//! A centralized migration graph builder, planner and executor.
//!
//! This is the meta-crate that re-exports all sub-crates for convenient access.
//! You can depend on `centralmig` to get everything, or depend on individual
//! crates for finer-grained control.

/// Core types, settings, namespace registry, and error types.
pub use centralmig_core as core;

/// Database backends: `PostgreSQL`, `SQLite`.
pub use centralmig_backends as backends;

/// Unit loading, dependency graph, ledger, planning, and execution.
#[cfg(feature = "migrations")]
pub use centralmig_migrations as migrations;

/// Management commands (CLI).
#[cfg(feature = "cli")]
pub use centralmig_cli as cli;
