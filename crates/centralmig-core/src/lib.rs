//! # centralmig-core
//!
//! Core types, settings, namespace registry, and error types for centralmig.
//! This crate has no workspace dependencies and provides the foundation for
//! all other crates.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Run settings and global configuration
//! - [`settings_loader`] - Loading settings from TOML/JSON and the environment
//! - [`apps`] - Namespace registry
//! - [`logging`] - Tracing-based logging integration

pub mod apps;
pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use apps::NamespaceRegistry;
pub use error::{MigrationError, MigrationResult, NodeRef};
pub use settings::{Settings, SETTINGS};
