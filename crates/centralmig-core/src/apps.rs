//! Namespace registry for centralmig.
//!
//! A namespace is a named group of migration units (one per business domain).
//! The [`NamespaceRegistry`] records every namespace the run knows about:
//! those declared in settings plus those discovered while loading units.
//! Declared namespaces with no unit are "unmigrated"; dependencies on them
//! are silently dropped, while dependencies on namespaces the registry has
//! never heard of are an error.

use std::collections::HashMap;

use crate::error::{MigrationError, MigrationResult};
use crate::settings::Settings;

/// The set of namespaces known to a run, in registration order.
///
/// # Examples
///
/// ```
/// use centralmig_core::apps::NamespaceRegistry;
///
/// let mut registry = NamespaceRegistry::new();
/// registry.register("billing");
/// registry.register("collections");
/// assert!(registry.contains("billing"));
/// assert_eq!(registry.namespaces(), &["billing", "collections"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct NamespaceRegistry {
    namespaces: Vec<String>,
    index: HashMap<String, usize>,
    swappable: HashMap<String, String>,
}

impl NamespaceRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry seeded with the namespaces and swappable settings
    /// declared in `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut registry = Self::new();
        for namespace in &settings.namespaces {
            registry.register(namespace);
        }
        registry.swappable.clone_from(&settings.swappable);
        registry
    }

    /// Registers a namespace. Returns `false` if it was already known.
    pub fn register(&mut self, namespace: impl Into<String>) -> bool {
        let namespace = namespace.into();
        if self.index.contains_key(&namespace) {
            return false;
        }
        self.index.insert(namespace.clone(), self.namespaces.len());
        self.namespaces.push(namespace);
        true
    }

    /// Returns `true` if the namespace is known.
    pub fn contains(&self, namespace: &str) -> bool {
        self.index.contains_key(namespace)
    }

    /// Returns all known namespaces in registration order.
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// Returns the number of known namespaces.
    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    /// Returns `true` if no namespace has been registered.
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Resolves a `("__setting__", KEY)` dependency to the namespace the
    /// setting names.
    ///
    /// Values of the form `namespace.Thing` resolve to `namespace`.
    pub fn resolve_setting(&self, key: &str) -> MigrationResult<String> {
        let value = self.swappable.get(key).ok_or_else(|| {
            MigrationError::ConfigurationError(format!(
                "Dependency refers to setting '{key}', which is not configured"
            ))
        })?;
        let namespace = value.split('.').next().unwrap_or(value);
        Ok(namespace.to_string())
    }
}
